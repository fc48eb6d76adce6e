//! Named build tasks and the registry that holds them.
//!
//! A [`Task`] is a function with no inputs: it reads whatever its adapter is
//! pointed at, writes the results and reports the paths it produced. Tasks
//! keep no state between runs, so re-running one with the same sources
//! produces the same files.

use std::collections::HashMap;
use std::fmt::{self, Debug, Display};
use std::str::FromStr;
use std::sync::Arc;

use camino::Utf8PathBuf;

use crate::adapter::{
    Adapter, CopyAdapter, Esbuild, HtmlAdapter, PageAdapter, ScriptAdapter, ScriptEngine,
    ScriptMinifyAdapter, Selector, StyleAdapter,
};
use crate::error::{AdapterError, StyleError, TaskError, UnknownTask};
use crate::layout::{Layout, STYLE_ENTRIES, StyleEntry};
use crate::output;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskName {
    Scripts,
    CompileCoreStyles,
    CompileIndexStyles,
    CompileAdminStyles,
    CompileCustomerStyles,
    CopyImages,
    RenderPages,
    MinifyHtml,
    MinifyScripts,
}

impl TaskName {
    pub const ALL: [TaskName; 9] = [
        TaskName::Scripts,
        TaskName::CompileCoreStyles,
        TaskName::CompileIndexStyles,
        TaskName::CompileAdminStyles,
        TaskName::CompileCustomerStyles,
        TaskName::CopyImages,
        TaskName::RenderPages,
        TaskName::MinifyHtml,
        TaskName::MinifyScripts,
    ];

    pub const STYLES: [TaskName; 4] = [
        TaskName::CompileCoreStyles,
        TaskName::CompileIndexStyles,
        TaskName::CompileAdminStyles,
        TaskName::CompileCustomerStyles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::Scripts => "scripts",
            TaskName::CompileCoreStyles => "compileCoreStyles",
            TaskName::CompileIndexStyles => "compileIndexStyles",
            TaskName::CompileAdminStyles => "compileAdminStyles",
            TaskName::CompileCustomerStyles => "compileCustomerStyles",
            TaskName::CopyImages => "copyImages",
            TaskName::RenderPages => "renderPages",
            TaskName::MinifyHtml => "minifyHtml",
            TaskName::MinifyScripts => "minifyScripts",
        }
    }
}

impl Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskName {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownTask(s.to_string()))
    }
}

/// Result from a single executed task: every file it wrote.
pub type TaskResult = Result<Vec<Utf8PathBuf>, TaskError>;

type TaskFn = Arc<dyn Fn() -> TaskResult + Send + Sync>;

#[derive(Clone)]
pub struct Task {
    name: TaskName,
    func: TaskFn,
}

impl Task {
    pub fn new<F>(name: TaskName, func: F) -> Self
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        Self {
            name,
            func: Arc::new(func),
        }
    }

    /// One adapter invocation whose outputs are written under `dest`.
    ///
    /// Compile errors are logged and leave the task with no output for this
    /// run; everything else rejects the task.
    pub fn from_adapter(
        name: TaskName,
        adapter: Arc<dyn Adapter>,
        input: Selector,
        dest: Utf8PathBuf,
    ) -> Self {
        Self::new(name, move || {
            let outputs = match adapter.run(&input) {
                Ok(outputs) => outputs,
                Err(AdapterError::Compile(err)) => {
                    tracing::error!(task = %name, "{err}");
                    return Ok(Vec::new());
                }
                Err(AdapterError::Task(err)) => return Err(err),
            };

            Ok(output::save(&dest, &outputs)?)
        })
    }

    pub fn name(&self) -> TaskName {
        self.name
    }

    pub fn run(&self) -> TaskResult {
        (self.func)()
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.name)
    }
}

/// The engines the standard tasks delegate to.
#[derive(Clone)]
pub struct Engines {
    pub style: StyleAdapter,
    /// Bundles `main.js`: down-levels and minifies.
    pub bundle: Arc<dyn ScriptEngine>,
    /// Minifies single scripts.
    pub minify: Arc<dyn ScriptEngine>,
}

impl Engines {
    pub fn esbuild() -> Result<Self, StyleError> {
        Ok(Self {
            style: StyleAdapter::new()?,
            bundle: Arc::new(Esbuild::new()),
            minify: Arc::new(Esbuild::minify_only()),
        })
    }
}

fn style_task(layout: &Layout, entry: &StyleEntry, adapter: &StyleAdapter) -> Task {
    Task::from_adapter(
        entry.task,
        Arc::new(adapter.clone().named(entry.file)),
        Selector::file(layout.path(entry.entry)),
        layout.path(Layout::DIST_STYLES),
    )
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    tasks: HashMap<TaskName, Task>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every task of the project, wired to its sources and destinations.
    pub fn standard(layout: &Layout, engines: Engines) -> Self {
        let mut registry = Self::new();

        for entry in &STYLE_ENTRIES {
            registry.insert(style_task(layout, entry, &engines.style));
        }

        registry.insert(Task::from_adapter(
            TaskName::Scripts,
            Arc::new(ScriptAdapter::new(engines.bundle, layout.path(Layout::MODULES))),
            Selector::glob(layout.path(Layout::SCRIPTS), "**/*.js"),
            layout.path(Layout::DIST_SCRIPTS),
        ));

        registry.insert(Task::from_adapter(
            TaskName::CopyImages,
            Arc::new(CopyAdapter),
            Selector::glob(layout.path(Layout::ASSETS), "**/*"),
            layout.path(Layout::DIST_ASSETS),
        ));

        registry.insert(Task::from_adapter(
            TaskName::RenderPages,
            Arc::new(PageAdapter),
            Selector::glob(layout.path(Layout::TEMPLATES), "**/*.html"),
            layout.path(Layout::DIST),
        ));

        registry.insert(Task::from_adapter(
            TaskName::MinifyHtml,
            Arc::new(HtmlAdapter),
            Selector::glob(layout.path(Layout::TEMPLATES), "**/*.html"),
            layout.path(Layout::DIST_HTML_MIN),
        ));

        registry.insert(Task::from_adapter(
            TaskName::MinifyScripts,
            Arc::new(ScriptMinifyAdapter::new(engines.minify)),
            Selector::glob(layout.path(Layout::SCRIPTS), "**/*.js"),
            layout.path(Layout::DIST_SCRIPTS_MIN),
        ));

        registry
    }

    /// Adds a task, replacing any previous task with the same name.
    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.name(), task);
    }

    pub fn get(&self, name: TaskName) -> Option<&Task> {
        self.tasks.get(&name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8Path;

    use super::*;
    use crate::error::{CompileError, ScriptError};
    use crate::output::Output;

    struct Fixed(fn() -> Result<Vec<Output>, AdapterError>);

    impl Adapter for Fixed {
        fn run(&self, _: &Selector) -> Result<Vec<Output>, AdapterError> {
            (self.0)()
        }
    }

    fn dest() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_names_roundtrip() {
        for name in TaskName::ALL {
            assert_eq!(name.as_str().parse::<TaskName>().unwrap(), name);
        }
        assert!("compileSass".parse::<TaskName>().is_err());
    }

    #[test]
    fn test_adapter_task_writes_under_dest() {
        let (_dir, dest) = dest();
        let task = Task::from_adapter(
            TaskName::CompileIndexStyles,
            Arc::new(Fixed(|| {
                Ok(vec![
                    Output::text("index.css", "a{b:c}"),
                    Output::text("css_map/index.css.map", "{}"),
                ])
            })),
            Selector::file("unused"),
            dest.clone(),
        );

        let written = task.run().unwrap();
        assert_eq!(
            written,
            vec![dest.join("index.css"), dest.join("css_map/index.css.map")]
        );
        assert_eq!(fs::read_to_string(&written[0]).unwrap(), "a{b:c}");
        assert!(Utf8Path::new(&dest.join("css_map")).is_dir());
    }

    #[test]
    fn test_compile_error_resolves_without_output() {
        let (_dir, dest) = dest();
        let task = Task::from_adapter(
            TaskName::Scripts,
            Arc::new(Fixed(|| {
                Err(AdapterError::Compile(CompileError::Script(
                    ScriptError::MissingMap,
                )))
            })),
            Selector::file("unused"),
            dest.clone(),
        );

        assert_eq!(task.run().unwrap(), Vec::<Utf8PathBuf>::new());
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[test]
    fn test_io_error_rejects() {
        let (_dir, dest) = dest();
        let task = Task::from_adapter(
            TaskName::CopyImages,
            Arc::new(Fixed(|| {
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").into())
            })),
            Selector::file("unused"),
            dest,
        );

        assert!(matches!(task.run(), Err(TaskError::FileSystem(_))));
    }

    #[test]
    fn test_standard_registry_has_every_task() {
        let layout = Layout::new("/project");
        let registry = Registry::standard(&layout, Engines::esbuild().unwrap());

        assert_eq!(registry.len(), TaskName::ALL.len());
        for name in TaskName::ALL {
            assert_eq!(registry.get(name).unwrap().name(), name);
        }
    }
}
