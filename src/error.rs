#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

pub use crate::adapter::script::ScriptError;
pub use crate::adapter::style::StyleError;
use crate::task::TaskName;

/// Errors that reject a task: the run produced no trustworthy output and the
/// caller has to decide whether that is fatal.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Couldn't read or write file.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Path '{0}' is not inside '{1}'")]
    OutsideBase(Utf8PathBuf, Utf8PathBuf),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task '{0}' is not registered")]
    Unregistered(TaskName),
}

/// Malformed sources. These are logged and never stop a pipeline.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Style(#[from] StyleError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        AdapterError::Task(TaskError::FileSystem(e))
    }
}

impl From<glob::PatternError> for AdapterError {
    fn from(e: glob::PatternError) -> Self {
        AdapterError::Task(TaskError::GlobPattern(e))
    }
}

impl From<glob::GlobError> for AdapterError {
    fn from(e: glob::GlobError) -> Self {
        AdapterError::Task(TaskError::Glob(e))
    }
}

impl From<camino::FromPathBufError> for AdapterError {
    fn from(e: camino::FromPathBufError) -> Self {
        AdapterError::Task(TaskError::PathFormat(e))
    }
}

impl From<StyleError> for AdapterError {
    fn from(e: StyleError) -> Self {
        AdapterError::Compile(CompileError::Style(e))
    }
}

impl From<ScriptError> for AdapterError {
    fn from(e: ScriptError) -> Self {
        AdapterError::Compile(CompileError::Script(e))
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{} task(s) failed: {}", .0.len(), join_names(.0))]
    Failed(Vec<TaskName>),
}

fn join_names(names: &[TaskName]) -> String {
    names
        .iter()
        .map(TaskName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
#[error("Unknown task '{0}'")]
pub struct UnknownTask(pub String);

#[cfg(feature = "server")]
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Port {port} is already in use")]
    PortInUse {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[error(transparent)]
    PathFormat(#[from] camino::FromPathBufError),
}

/// Fatal failures of the development loop.
#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum DevError {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}
