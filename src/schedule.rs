//! Phased execution of registry tasks.
//!
//! A [`Schedule`] is an ordered list of [`Phase`]s. Tasks of one phase run
//! concurrently on the rayon pool and the phase returns only once every one of
//! them settled, so a phase is a join barrier for the next. A rejected task is
//! recorded in the [`Report`] and never stops the remaining phases.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::{BuildError, TaskError};
use crate::task::{Registry, Task, TaskName, TaskResult};
use crate::utils::{as_overhead, get_style_phase, get_style_task};

/// Message pushed to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Reload the whole page.
    Reload,
    /// Re-fetch these stylesheets in place.
    Inject(Vec<Utf8PathBuf>),
}

impl Signal {
    /// The signal a task that wrote `paths` should push, if any. Source maps
    /// don't count; a stylesheet with its map is still injected.
    pub fn for_outputs(paths: &[Utf8PathBuf]) -> Option<Self> {
        if paths.is_empty() {
            return None;
        }

        let rest: Vec<_> = paths
            .iter()
            .filter(|path| path.extension() != Some("map"))
            .cloned()
            .collect();

        if rest.is_empty() {
            None
        } else if rest.iter().all(|path| path.extension() == Some("css")) {
            Some(Signal::Inject(rest))
        } else {
            Some(Signal::Reload)
        }
    }
}

/// Receiver of signals after each successful task.
pub trait Notify: Send + Sync {
    fn notify(&self, signal: Signal);
}

/// Drops every signal. Used when nobody is listening.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Notify for Silent {
    fn notify(&self, _: Signal) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    tasks: Vec<TaskName>,
}

impl Phase {
    pub fn new(tasks: impl Into<Vec<TaskName>>) -> Self {
        Self {
            tasks: tasks.into(),
        }
    }

    pub fn tasks(&self) -> &[TaskName] {
        &self.tasks
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    phases: Vec<Phase>,
}

impl Schedule {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { phases }
    }

    /// Everything derived from sources first, then the minified copies.
    pub fn build() -> Self {
        Self::new(vec![
            Phase::new([
                TaskName::RenderPages,
                TaskName::CompileCoreStyles,
                TaskName::CompileIndexStyles,
                TaskName::CompileAdminStyles,
                TaskName::CompileCustomerStyles,
                TaskName::CopyImages,
                TaskName::Scripts,
            ]),
            Phase::new([TaskName::MinifyHtml, TaskName::MinifyScripts]),
        ])
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn run(&self, registry: &Registry, notify: &dyn Notify) -> Report {
        let start = Instant::now();

        let phases = self
            .phases
            .iter()
            .map(|phase| run_phase(registry, phase.tasks(), notify))
            .collect();

        let report = Report { phases };
        tracing::info!(
            "build settled, {} failed {}",
            report.failures().len(),
            as_overhead(start)
        );
        report
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Outcome of a single task within a phase.
#[derive(Debug)]
pub struct Settled {
    pub name: TaskName,
    pub result: TaskResult,
    pub execution: TaskExecution,
}

#[derive(Debug, Default)]
pub struct PhaseReport {
    /// In the order the phase listed its tasks.
    pub settled: Vec<Settled>,
}

impl PhaseReport {
    pub fn failures(&self) -> Vec<TaskName> {
        self.settled
            .iter()
            .filter(|s| s.result.is_err())
            .map(|s| s.name)
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct Report {
    pub phases: Vec<PhaseReport>,
}

impl Report {
    pub fn failures(&self) -> Vec<TaskName> {
        self.phases.iter().flat_map(PhaseReport::failures).collect()
    }

    pub fn log_timings(&self) {
        for settled in self.phases.iter().flat_map(|p| &p.settled) {
            tracing::debug!(
                task = %settled.name,
                ok = settled.result.is_ok(),
                "took {:.2?}",
                settled.execution.duration
            );
        }
    }

    pub fn into_result(self) -> Result<(), BuildError> {
        let failures = self.failures();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BuildError::Failed(failures))
        }
    }
}

fn run_guarded(task: &Task) -> TaskResult {
    match catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                String::from("unknown payload")
            };

            Err(TaskError::Panicked(msg))
        }
    }
}

/// Runs every task concurrently and waits for all of them to settle.
///
/// Rejections are logged here; successful tasks push their signal as soon as
/// they finish, not when the whole phase does.
pub fn run_phase(registry: &Registry, tasks: &[TaskName], notify: &dyn Notify) -> PhaseReport {
    if tasks.is_empty() {
        return PhaseReport::default();
    }

    let phase_span = tracing::span!(Level::INFO, "phase");
    phase_span.pb_set_length(tasks.len() as u64);
    if let Ok(style) = get_style_phase() {
        phase_span.pb_set_style(&style);
    }
    phase_span.pb_set_message("Running tasks...");
    let _enter = phase_span.enter();

    let settled = tasks
        .par_iter()
        .map(|&name| {
            let span = tracing::span!(parent: &phase_span, Level::INFO, "task", name = %name);
            if let Ok(style) = get_style_task() {
                span.pb_set_style(&style);
            }
            span.pb_set_message(&format!("Running {name}"));
            let _enter = span.enter();

            let start = Instant::now();
            let result = match registry.get(name) {
                Some(task) => run_guarded(task),
                None => Err(TaskError::Unregistered(name)),
            };
            let duration = start.elapsed();

            match &result {
                Ok(paths) => {
                    if let Some(signal) = Signal::for_outputs(paths) {
                        notify.notify(signal);
                    }
                }
                Err(err) => tracing::error!(task = %name, "{err}"),
            }

            phase_span.pb_inc(1);

            Settled {
                name,
                result,
                execution: TaskExecution { start, duration },
            }
        })
        .collect();

    PhaseReport { settled }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use std::thread::sleep;

    use camino::Utf8Path;

    use super::*;
    use crate::adapter::script::Bundle;
    use crate::adapter::{ScriptEngine, StyleAdapter};
    use crate::error::ScriptError;
    use crate::layout::Layout;
    use crate::task::Engines;
    use crate::watch::Dispatcher;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Signal>>);

    impl Notify for Recorder {
        fn notify(&self, signal: Signal) {
            self.0.lock().unwrap().push(signal);
        }
    }

    struct Identity;

    impl ScriptEngine for Identity {
        fn minify(&self, bundle: &Bundle) -> Result<Bundle, ScriptError> {
            Ok(bundle.clone())
        }
    }

    fn paths(list: &[&str]) -> Vec<Utf8PathBuf> {
        list.iter().map(Utf8PathBuf::from).collect()
    }

    #[test]
    fn test_signal_for_outputs() {
        assert_eq!(Signal::for_outputs(&[]), None);
        assert_eq!(
            Signal::for_outputs(&paths(&["dist/styles/core.css"])),
            Some(Signal::Inject(paths(&["dist/styles/core.css"])))
        );
        assert_eq!(
            Signal::for_outputs(&paths(&["dist/styles/core.css", "dist/index.html"])),
            Some(Signal::Reload)
        );
        assert_eq!(
            Signal::for_outputs(&paths(&[
                "dist/styles/core.css",
                "dist/styles/css_map/core.css.map"
            ])),
            Some(Signal::Inject(paths(&["dist/styles/core.css"])))
        );
        assert_eq!(
            Signal::for_outputs(&paths(&[
                "dist/scripts/main.min.js",
                "dist/scripts/js_map/main.min.js.map"
            ])),
            Some(Signal::Reload)
        );
    }

    #[test]
    fn test_build_schedule_shape() {
        let schedule = Schedule::build();
        assert_eq!(schedule.phases().len(), 2);

        let mut all: Vec<_> = schedule
            .phases()
            .iter()
            .flat_map(|p| p.tasks().to_vec())
            .collect();
        all.sort();
        let mut expected = TaskName::ALL.to_vec();
        expected.sort();
        assert_eq!(all, expected);

        assert_eq!(
            schedule.phases()[1].tasks(),
            &[TaskName::MinifyHtml, TaskName::MinifyScripts]
        );
    }

    #[test]
    fn test_phase_barrier_with_failing_task() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();

        let slow = log.clone();
        registry.insert(Task::new(TaskName::RenderPages, move || {
            sleep(Duration::from_millis(50));
            slow.lock().unwrap().push("renderPages");
            Ok(vec![])
        }));
        registry.insert(Task::new(TaskName::CopyImages, || {
            Err(std::io::Error::other("disk on fire").into())
        }));
        let late = log.clone();
        registry.insert(Task::new(TaskName::MinifyHtml, move || {
            late.lock().unwrap().push("minifyHtml");
            Ok(vec![])
        }));

        let schedule = Schedule::new(vec![
            Phase::new([TaskName::RenderPages, TaskName::CopyImages]),
            Phase::new([TaskName::MinifyHtml]),
        ]);
        let report = schedule.run(&registry, &Silent);

        assert_eq!(*log.lock().unwrap(), vec!["renderPages", "minifyHtml"]);
        assert_eq!(report.failures(), vec![TaskName::CopyImages]);
        assert!(report.phases[1].settled[0].result.is_ok());
        assert!(matches!(
            report.into_result(),
            Err(BuildError::Failed(names)) if names == vec![TaskName::CopyImages]
        ));
    }

    #[test]
    fn test_panics_and_missing_tasks_reject() {
        let mut registry = Registry::new();
        registry.insert(Task::new(TaskName::Scripts, || panic!("boom")));

        let report = run_phase(
            &registry,
            &[TaskName::Scripts, TaskName::MinifyScripts],
            &Silent,
        );

        assert!(matches!(
            &report.settled[0].result,
            Err(TaskError::Panicked(msg)) if msg == "boom"
        ));
        assert!(matches!(
            &report.settled[1].result,
            Err(TaskError::Unregistered(TaskName::MinifyScripts))
        ));
    }

    #[test]
    fn test_signals_follow_outputs() {
        let mut registry = Registry::new();
        registry.insert(Task::new(TaskName::CompileCoreStyles, || {
            Ok(paths(&["dist/styles/core.css"]))
        }));
        registry.insert(Task::new(TaskName::RenderPages, || {
            Ok(paths(&["dist/index.html"]))
        }));
        registry.insert(Task::new(TaskName::Scripts, || Ok(vec![])));
        registry.insert(Task::new(TaskName::CopyImages, || {
            Err(std::io::Error::other("nope").into())
        }));

        let recorder = Recorder::default();
        run_phase(
            &registry,
            &[
                TaskName::CompileCoreStyles,
                TaskName::RenderPages,
                TaskName::Scripts,
                TaskName::CopyImages,
            ],
            &recorder,
        );

        let signals = recorder.0.into_inner().unwrap();
        assert_eq!(signals.len(), 2);
        assert!(signals.contains(&Signal::Inject(paths(&["dist/styles/core.css"]))));
        assert!(signals.contains(&Signal::Reload));
    }

    fn project() -> (tempfile::TempDir, Layout) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let files: &[(&str, &[u8])] = &[
            ("src/styles/_vars.scss", b"$accent: #c33;\n"),
            ("src/styles/core.scss", b"@use 'vars';\nbody { color: vars.$accent; }\n"),
            ("src/styles/index.scss", b".hero { .title { margin: 0 auto; } }\n"),
            ("src/styles/pages/admin/admin.scss", b".admin { display: flex; }\n"),
            ("src/styles/pages/customer/customers.scss", b".customer { padding: 1px; }\n"),
            ("src/scripts/main.js", b"//= require helpers\nrun();\n"),
            ("src/scripts/modules/helpers.js", b"function run() {}\n"),
            ("src/templates/index.html", b"<html>\n  <body>\n    <p>hi</p>\n  </body>\n</html>\n"),
            ("src/templates/admin/users.html", b"<div>\n  <span>a</span>\n</div>\n"),
            ("src/assets/logo.png", &[0x89, b'P', b'N', b'G', 0]),
        ];

        for (path, content) in files {
            let path = root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        (dir, Layout::new(root))
    }

    fn snapshot(dist: &Utf8Path) -> Vec<(String, Vec<u8>)> {
        let mut files: Vec<_> = glob::glob(&format!("{dist}/**/*"))
            .unwrap()
            .map(|entry| entry.unwrap())
            .filter(|path| path.is_file())
            .map(|path| (path.display().to_string(), fs::read(&path).unwrap()))
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_full_build_is_disjoint_and_idempotent() {
        let (_dir, layout) = project();
        let engines = Engines {
            style: StyleAdapter::new().unwrap(),
            bundle: Arc::new(Identity),
            minify: Arc::new(Identity),
        };
        let registry = Registry::standard(&layout, engines);

        let report = Schedule::build().run(&registry, &Silent);
        assert!(report.failures().is_empty());

        let written: Vec<_> = report
            .phases
            .iter()
            .flat_map(|p| &p.settled)
            .flat_map(|s| s.result.as_ref().unwrap().clone())
            .collect();
        let unique: HashSet<_> = written.iter().collect();
        assert_eq!(unique.len(), written.len());

        for path in [
            "dist/index.html",
            "dist/admin/users.html",
            "dist/html_min/index.html",
            "dist/styles/core.css",
            "dist/styles/css_map/core.css.map",
            "dist/styles/admin-page.css",
            "dist/styles/css_map/admin-page.css.map",
            "dist/styles/customer-page.css",
            "dist/scripts/main.min.js",
            "dist/scripts/js_map/main.min.js.map",
            "dist/scripts_min/main.min.js",
            "dist/scripts_min/modules/helpers.min.js",
            "dist/assets/logo.png",
        ] {
            assert!(layout.path(path).is_file(), "{path} is missing");
        }

        let css = fs::read_to_string(layout.path("dist/styles/core.css")).unwrap();
        let (code, _) = css.split_once('\n').unwrap();
        assert!(!code.is_empty());
        assert!(css.contains("sourceMappingURL=css_map/core.css.map"));

        let html = fs::read_to_string(layout.path("dist/html_min/index.html")).unwrap();
        assert_eq!(html, "<html><body><p>hi</p></body></html>");

        let dist = layout.path(Layout::DIST);
        let first = snapshot(&dist);
        let report = Schedule::build().run(&registry, &Silent);
        assert!(report.failures().is_empty());
        assert_eq!(snapshot(&dist), first);
    }

    #[test]
    fn test_template_change_refreshes_both_page_trees() {
        let (_dir, layout) = project();
        let engines = Engines {
            style: StyleAdapter::new().unwrap(),
            bundle: Arc::new(Identity),
            minify: Arc::new(Identity),
        };
        let registry = Registry::standard(&layout, engines);
        assert!(Schedule::build().run(&registry, &Silent).failures().is_empty());

        fs::write(layout.path("src/templates/index.html"), "<p>\n  edited\n</p>\n").unwrap();

        let batch = Dispatcher::standard()
            .unwrap()
            .dispatch(&["src/templates/index.html"][..]);
        let recorder = Recorder::default();
        let report = run_phase(&registry, &batch.tasks, &recorder);
        assert!(report.failures().is_empty());

        let raw = fs::read_to_string(layout.path("dist/index.html")).unwrap();
        let min = fs::read_to_string(layout.path("dist/html_min/index.html")).unwrap();
        assert_eq!(raw, "<p>\n  edited\n</p>\n");
        assert_eq!(min, "<p>edited</p>");

        let signals = recorder.0.into_inner().unwrap();
        assert!(signals.iter().all(|s| *s == Signal::Reload));
        assert_eq!(signals.len(), batch.tasks.len());
    }

    #[test]
    fn test_missing_style_entry_rejects_only_that_task() {
        let (_dir, layout) = project();
        fs::remove_file(layout.path("src/styles/index.scss")).unwrap();

        let engines = Engines {
            style: StyleAdapter::new().unwrap(),
            bundle: Arc::new(Identity),
            minify: Arc::new(Identity),
        };
        let registry = Registry::standard(&layout, engines);
        let report = Schedule::build().run(&registry, &Silent);

        assert_eq!(report.failures(), vec![TaskName::CompileIndexStyles]);
        assert!(layout.path("dist/html_min/index.html").is_file());
    }
}
