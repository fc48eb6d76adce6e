//! Watch mode maps file-system changes to the tasks they invalidate.
//!
//! The [`Dispatcher`] holds the bindings and nothing else, which keeps the
//! mapping testable without touching the file system. Arming it registers the
//! watchers and yields an [`Armed`] dispatcher that loops until the process
//! exits. There is no way back to the idle state.
//!
//! ## The Loop
//!
//! 1. Events are debounced, so a burst of saves arrives as one batch.
//! 2. Every path in the batch is made relative to the project root and
//!    matched against the bindings; each binding fires at most once.
//! 3. All bound tasks re-run as a single phase. Rejections are logged and
//!    the loop carries on with the previous output in place.
//! 4. Signals reach the browser as the tasks finish.

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

use crate::task::TaskName;

#[cfg(feature = "live")]
pub use live::Armed;

/// What a binding does when one of its paths changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Re-run these tasks.
    Tasks(&'static [TaskName]),
    /// Only tell the browser to reload.
    Reload,
}

#[derive(Debug, Clone)]
pub struct Binding {
    /// Glob relative to the project root.
    pub glob: &'static str,
    pub action: Action,
}

pub const BINDINGS: [Binding; 5] = [
    Binding {
        glob: "src/styles/**/*.scss",
        action: Action::Tasks(&TaskName::STYLES),
    },
    Binding {
        glob: "src/templates/**/*.html",
        action: Action::Tasks(&[TaskName::RenderPages, TaskName::MinifyHtml]),
    },
    Binding {
        glob: "dist/html_min/**/*.html",
        action: Action::Reload,
    },
    Binding {
        glob: "src/scripts/**/*.js",
        action: Action::Tasks(&[TaskName::Scripts]),
    },
    Binding {
        glob: "src/assets/**/*",
        action: Action::Tasks(&[TaskName::CopyImages]),
    },
];

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Work triggered by one batch of changes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Deduplicated, in binding order.
    pub tasks: Vec<TaskName>,
    pub reload: bool,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && !self.reload
    }
}

/// Idle dispatcher: bindings compiled, nothing watched yet.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    bindings: Vec<(Pattern, Binding)>,
}

impl Dispatcher {
    pub fn new(bindings: &[Binding]) -> Result<Self, glob::PatternError> {
        let bindings = bindings
            .iter()
            .map(|binding| Ok((Pattern::new(binding.glob)?, binding.clone())))
            .collect::<Result<_, glob::PatternError>>()?;

        Ok(Self { bindings })
    }

    pub fn standard() -> Result<Self, glob::PatternError> {
        Self::new(&BINDINGS)
    }

    /// Maps project-relative paths to the work they trigger. A binding
    /// matched by several paths fires once.
    pub fn dispatch<P: AsRef<Utf8Path>>(&self, paths: &[P]) -> Batch {
        let mut batch = Batch::default();

        for (pattern, binding) in &self.bindings {
            let fired = paths
                .iter()
                .any(|path| pattern.matches_with(path.as_ref().as_str(), MATCH));

            if !fired {
                continue;
            }

            match binding.action {
                Action::Tasks(tasks) => {
                    for &task in tasks {
                        if !batch.tasks.contains(&task) {
                            batch.tasks.push(task);
                        }
                    }
                }
                Action::Reload => batch.reload = true,
            }
        }

        batch
    }

    /// Directories that have to be watched to see every bound path.
    pub fn roots(&self) -> Vec<Utf8PathBuf> {
        let mut roots: Vec<_> = self
            .bindings
            .iter()
            .map(|(_, binding)| static_prefix(binding.glob))
            .collect();
        roots.sort();
        roots.dedup();
        roots
    }
}

/// The part of a glob before its first wildcard component.
fn static_prefix(glob: &str) -> Utf8PathBuf {
    Utf8Path::new(glob)
        .components()
        .take_while(|c| !c.as_str().contains(['*', '?', '[']))
        .collect()
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(mut paths: Vec<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(feature = "live")]
mod live {
    use std::convert::Infallible;
    use std::sync::mpsc::{Receiver, channel};
    use std::time::Duration;

    use camino::{Utf8Path, Utf8PathBuf};
    use notify::{EventKind, RecommendedWatcher, RecursiveMode};
    use notify_debouncer_full::{
        DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache, new_debouncer,
    };

    use super::{Dispatcher, collapse_watch_paths};
    use crate::error::WatchError;
    use crate::layout::Layout;
    use crate::schedule::{Notify, Signal, run_phase};
    use crate::task::Registry;

    const DEBOUNCE: Duration = Duration::from_millis(100);

    /// Dispatcher with live watchers. Only exits through an error.
    pub struct Armed {
        dispatcher: Dispatcher,
        registry: Registry,
        notify: Box<dyn Notify>,
        root: Utf8PathBuf,
        rx: Receiver<DebounceEventResult>,
        _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    }

    impl Dispatcher {
        pub fn arm(
            self,
            layout: &Layout,
            registry: Registry,
            notify: Box<dyn Notify>,
        ) -> Result<Armed, WatchError> {
            let root = layout.root().canonicalize_utf8()?;

            let (tx, rx) = channel();
            let mut debouncer = new_debouncer(DEBOUNCE, None, tx)?;

            let mut watched = Vec::new();
            for prefix in self.roots() {
                match root.join(&prefix).canonicalize_utf8() {
                    Ok(path) => watched.push(path),
                    Err(e) => tracing::warn!("not watching {prefix}: {e}"),
                }
            }

            for path in collapse_watch_paths(watched) {
                tracing::info!("watching {path}");
                debouncer.watch(&path, RecursiveMode::Recursive)?;
            }

            Ok(Armed {
                dispatcher: self,
                registry,
                notify,
                root,
                rx,
                _debouncer: debouncer,
            })
        }
    }

    impl Armed {
        pub fn run(self) -> Result<Infallible, WatchError> {
            tracing::info!("watching for changes...");

            loop {
                match self.rx.recv()? {
                    Ok(events) => self.handle(&events),
                    Err(errors) => {
                        for e in errors {
                            tracing::error!("watch error: {e}");
                        }
                    }
                }
            }
        }

        fn handle(&self, events: &[DebouncedEvent]) {
            let paths = relative_paths(&self.root, events);
            let batch = self.dispatcher.dispatch(paths.as_slice());

            if batch.is_empty() {
                return;
            }

            tracing::info!("change detected in {} file(s)", paths.len());

            if !batch.tasks.is_empty() {
                let report = run_phase(&self.registry, &batch.tasks, self.notify.as_ref());
                let failures = report.failures();
                if !failures.is_empty() {
                    tracing::warn!("{} task(s) failed, keeping previous output", failures.len());
                }
            }

            if batch.reload {
                self.notify.notify(Signal::Reload);
            }
        }
    }

    fn relative_paths(root: &Utf8Path, events: &[DebouncedEvent]) -> Vec<Utf8PathBuf> {
        let mut paths: Vec<_> = events
            .iter()
            .filter(|de| {
                matches!(
                    de.event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                )
            })
            .flat_map(|de| &de.event.paths)
            .filter_map(|path| Utf8Path::from_path(path))
            .filter_map(|path| path.strip_prefix(root).ok())
            .map(Utf8Path::to_path_buf)
            .collect();

        paths.sort();
        paths.dedup();
        paths
    }
}
