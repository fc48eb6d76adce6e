//! Toggle logic of the notification modal.
//!
//! The page wires three click sources to one [`NotificationModal`]: the bell
//! trigger, the overlay itself and the rest of the document. Each click
//! returns the fades to apply, in order. The state lives in the value, one
//! per page.

use std::time::Duration;

/// How long every fade takes.
pub const FADE: Duration = Duration::from_millis(200);

/// Dimmed backdrop behind the modal.
pub const CONTAINER: &str = ".container-modalNotif";
/// The modal itself.
pub const MODAL: &str = ".modalNotification";
/// Element that opens and closes the modal.
pub const TRIGGER: &str = ".notification";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Trigger,
    /// Anywhere inside the modal. Clicks here never reach the document.
    Overlay,
    /// Anywhere else on the page.
    Outside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    FadeIn(&'static str, Duration),
    FadeOut(&'static str, Duration),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotificationModal {
    open: bool,
}

impl NotificationModal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn click(&mut self, target: Target) -> Vec<Effect> {
        match target {
            Target::Trigger if self.open => self.close(),
            Target::Trigger => self.open(),
            Target::Outside if self.open => self.close(),
            Target::Outside | Target::Overlay => Vec::new(),
        }
    }

    fn open(&mut self) -> Vec<Effect> {
        self.open = true;
        vec![Effect::FadeIn(CONTAINER, FADE), Effect::FadeIn(MODAL, FADE)]
    }

    fn close(&mut self) -> Vec<Effect> {
        self.open = false;
        vec![Effect::FadeOut(MODAL, FADE), Effect::FadeOut(CONTAINER, FADE)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_opens_and_outside_closes() {
        let mut modal = NotificationModal::new();

        let effects = modal.click(Target::Trigger);
        assert!(modal.is_open());
        assert_eq!(
            effects,
            vec![
                Effect::FadeIn(CONTAINER, FADE),
                Effect::FadeIn(MODAL, FADE)
            ]
        );

        let effects = modal.click(Target::Outside);
        assert!(!modal.is_open());
        assert_eq!(
            effects,
            vec![
                Effect::FadeOut(MODAL, FADE),
                Effect::FadeOut(CONTAINER, FADE)
            ]
        );
    }

    #[test]
    fn test_overlay_click_keeps_modal_open() {
        let mut modal = NotificationModal::new();
        modal.click(Target::Trigger);

        assert!(modal.click(Target::Overlay).is_empty());
        assert!(modal.is_open());
    }

    #[test]
    fn test_trigger_toggles() {
        let mut modal = NotificationModal::new();
        modal.click(Target::Trigger);
        let effects = modal.click(Target::Trigger);

        assert!(!modal.is_open());
        assert_eq!(effects.len(), 2);
        assert!(effects.iter().all(|e| matches!(e, Effect::FadeOut(..))));
    }

    #[test]
    fn test_outside_click_while_closed_does_nothing() {
        let mut modal = NotificationModal::new();
        assert!(modal.click(Target::Outside).is_empty());
        assert!(!modal.is_open());
    }

    #[test]
    fn test_pages_keep_separate_state() {
        let mut a = NotificationModal::new();
        let b = NotificationModal::new();
        a.click(Target::Trigger);

        assert!(a.is_open());
        assert!(!b.is_open());
    }
}
