//! Adapters wrap the engines that do the actual transformations.
//!
//! Every adapter has the same shape: it takes a [`Selector`] describing its
//! input files and returns the [`Output`]s it produced, with paths relative to
//! whatever destination the caller picks. Adapters never write to disk.

pub mod copy;
pub mod html;
pub mod script;
pub mod sourcemap;
pub mod style;

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;

use crate::error::{AdapterError, TaskError};
use crate::output::Output;

pub use copy::CopyAdapter;
pub use html::{HtmlAdapter, PageAdapter};
pub use script::{Esbuild, ScriptAdapter, ScriptEngine, ScriptMinifyAdapter};
pub use style::StyleAdapter;

/// Uniform contract over an external transformation engine.
pub trait Adapter: Send + Sync {
    fn run(&self, input: &Selector) -> Result<Vec<Output>, AdapterError>;
}

/// Describes which files an adapter reads.
#[derive(Debug, Clone)]
pub enum Selector {
    /// Exactly one file, which must exist.
    File(Utf8PathBuf),
    /// Every regular file below `base` matched by `glob`. A missing `base`
    /// selects nothing.
    Glob {
        base: Utf8PathBuf,
        glob: &'static str,
    },
}

/// A selected input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Full path used for reading.
    pub path: Utf8PathBuf,
    /// Path relative to the selector base, used to name outputs.
    pub relative: Utf8PathBuf,
}

impl Selector {
    pub fn file(path: impl Into<Utf8PathBuf>) -> Self {
        Selector::File(path.into())
    }

    pub fn glob(base: impl Into<Utf8PathBuf>, glob: &'static str) -> Self {
        Selector::Glob {
            base: base.into(),
            glob,
        }
    }

    /// Directory that relative output paths are computed from.
    pub fn base(&self) -> &Utf8Path {
        match self {
            Selector::File(path) => path.parent().unwrap_or(Utf8Path::new("")),
            Selector::Glob { base, .. } => base,
        }
    }

    /// Resolves the selector into concrete files in sorted path order.
    pub fn resolve(&self) -> Result<Vec<Source>, TaskError> {
        match self {
            Selector::File(path) => {
                fs::metadata(path)?;
                let relative = Utf8PathBuf::from(path.file_name().unwrap_or(path.as_str()));
                Ok(vec![Source {
                    path: path.clone(),
                    relative,
                }])
            }
            Selector::Glob { base, glob } => {
                let pattern = format!("{}/{}", Pattern::escape(base.as_str()), glob);
                let mut sources = Vec::new();

                for entry in glob::glob(&pattern)? {
                    let path = Utf8PathBuf::try_from(entry?)?;
                    if !path.is_file() {
                        continue;
                    }

                    let relative = path
                        .strip_prefix(base)
                        .map_err(|_| TaskError::OutsideBase(path.clone(), base.clone()))?
                        .to_path_buf();

                    sources.push(Source { path, relative });
                }

                sources.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(sources)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("assets/img")).unwrap();
        fs::write(root.join("assets/b.png"), [1, 2, 3]).unwrap();
        fs::write(root.join("assets/img/a.png"), [4, 5]).unwrap();
        (dir, root)
    }

    #[test]
    fn test_glob_selects_nested_files_sorted() {
        let (_dir, root) = fixture();
        let sources = Selector::glob(root.join("assets"), "**/*").resolve().unwrap();

        let relative: Vec<_> = sources.iter().map(|s| s.relative.as_str()).collect();
        assert_eq!(relative, vec!["b.png", "img/a.png"]);
    }

    #[test]
    fn test_glob_with_missing_base_is_empty() {
        let (_dir, root) = fixture();
        let sources = Selector::glob(root.join("nope"), "**/*").resolve().unwrap();
        assert!(sources.is_empty());
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let (_dir, root) = fixture();
        let err = Selector::file(root.join("missing.scss")).resolve().unwrap_err();
        assert!(matches!(err, TaskError::FileSystem(_)));
    }
}
