#![forbid(unsafe_code)]
//! Asset pipeline for a single front-end project.
//!
//! Sources under `src/` are compiled into `dist/` by a fixed set of named
//! [tasks](task::TaskName). A one-shot build runs them in two phases: first
//! everything derived from sources directly, then the minified copies. The
//! development loop does the same build, starts a static server with live
//! reload and re-runs the affected tasks whenever a watched file changes.
//!
//! ```no_run
//! use kumade::{Layout, Pipeline};
//!
//! let pipeline = Pipeline::standard(Layout::current()?)?;
//! pipeline.build()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod adapter;
pub mod error;
pub mod layout;
pub mod modal;
pub mod output;
pub mod schedule;
#[cfg(feature = "server")]
pub mod server;
pub mod task;
mod utils;
pub mod watch;

#[cfg(feature = "live")]
use std::convert::Infallible;

use camino::Utf8PathBuf;

pub use crate::error::*;
pub use crate::layout::{DEFAULT_PORT, Layout};
pub use crate::output::Output;
pub use crate::schedule::{Notify, Schedule, Signal, Silent};
#[cfg(feature = "server")]
pub use crate::server::DevServer;
pub use crate::task::{Engines, Registry, Task, TaskName};
pub use crate::utils::init_logging;
pub use crate::watch::Dispatcher;

/// A project layout together with the tasks that build it.
#[derive(Debug, Clone)]
pub struct Pipeline {
    layout: Layout,
    registry: Registry,
}

impl Pipeline {
    pub fn new(layout: Layout, registry: Registry) -> Self {
        Self { layout, registry }
    }

    /// The standard tasks backed by `grass`, `lightningcss` and `esbuild`.
    pub fn standard(layout: Layout) -> Result<Self, StyleError> {
        let registry = Registry::standard(&layout, Engines::esbuild()?);
        Ok(Self::new(layout, registry))
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Runs the build schedule once. Every phase runs even when an earlier
    /// one had failures; all of them are reported together at the end.
    pub fn build(&self) -> Result<(), BuildError> {
        let report = Schedule::build().run(&self.registry, &Silent);
        report.log_timings();
        report.into_result()
    }

    /// Runs a single task on its own.
    pub fn run(&self, name: TaskName) -> Result<Vec<Utf8PathBuf>, TaskError> {
        let report = schedule::run_phase(&self.registry, &[name], &Silent);

        report
            .settled
            .into_iter()
            .next()
            .map_or(Err(TaskError::Unregistered(name)), |settled| settled.result)
    }

    /// Builds, serves `dist/` on `port` and rebuilds on changes. Task
    /// failures are only logged; this returns only on a server or watcher
    /// failure.
    #[cfg(feature = "live")]
    pub fn dev(self, port: u16) -> Result<Infallible, DevError> {
        let report = Schedule::build().run(&self.registry, &Silent);
        report.log_timings();

        let server = DevServer::start(self.layout.path(Layout::DIST), port)?;

        let armed = Dispatcher::standard()
            .map_err(WatchError::from)?
            .arm(&self.layout, self.registry, Box::new(server))?;

        Ok(armed.run()?)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_run_single_task() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let layout = Layout::new(root.clone());

        let dest = layout.path(Layout::DIST);
        let mut registry = Registry::new();
        registry.insert(Task::new(TaskName::RenderPages, move || {
            Ok(output::save(&dest, &[Output::text("index.html", "<p>x</p>")])?)
        }));

        let pipeline = Pipeline::new(layout, registry);
        let written = pipeline.run(TaskName::RenderPages).unwrap();

        assert_eq!(written, vec![root.join("dist/index.html")]);
        assert_eq!(fs::read_to_string(&written[0]).unwrap(), "<p>x</p>");
        assert!(matches!(
            pipeline.run(TaskName::Scripts),
            Err(TaskError::Unregistered(TaskName::Scripts))
        ));
    }

    #[test]
    fn test_build_reports_failures() {
        let mut registry = Registry::new();
        for name in TaskName::ALL {
            registry.insert(Task::new(name, || Ok(vec![])));
        }
        registry.insert(Task::new(TaskName::MinifyScripts, || {
            Err(std::io::Error::other("read-only").into())
        }));

        let pipeline = Pipeline::new(Layout::new("/project"), registry);
        let err = pipeline.build().unwrap_err();

        assert_eq!(err.to_string(), "1 task(s) failed: minifyScripts");
    }
}
