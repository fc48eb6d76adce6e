//! The directory layout of the project being built.
//!
//! The layout is fixed: sources live under `src/`, everything generated lands
//! under `dist/`. Only the project root can vary, which keeps tests free to
//! build inside temporary directories.

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TaskError;
use crate::task::TaskName;

/// Port of the development server unless overridden on the command line.
pub const DEFAULT_PORT: u16 = 4000;

/// One compiled stylesheet: which entry file it starts from and the name of
/// the CSS file it produces in `dist/styles`.
#[derive(Debug, Clone, Copy)]
pub struct StyleEntry {
    pub task: TaskName,
    pub entry: &'static str,
    pub file: &'static str,
}

pub const STYLE_ENTRIES: [StyleEntry; 4] = [
    StyleEntry {
        task: TaskName::CompileCoreStyles,
        entry: "src/styles/core.scss",
        file: "core.css",
    },
    StyleEntry {
        task: TaskName::CompileIndexStyles,
        entry: "src/styles/index.scss",
        file: "index.css",
    },
    StyleEntry {
        task: TaskName::CompileAdminStyles,
        entry: "src/styles/pages/admin/admin.scss",
        file: "admin-page.css",
    },
    StyleEntry {
        task: TaskName::CompileCustomerStyles,
        entry: "src/styles/pages/customer/customers.scss",
        file: "customer-page.css",
    },
];

#[derive(Debug, Clone)]
pub struct Layout {
    root: Utf8PathBuf,
}

impl Layout {
    pub const SCRIPTS: &'static str = "src/scripts";
    pub const MODULES: &'static str = "src/scripts/modules";
    pub const STYLES: &'static str = "src/styles";
    pub const TEMPLATES: &'static str = "src/templates";
    pub const ASSETS: &'static str = "src/assets";

    pub const DIST: &'static str = "dist";
    pub const DIST_SCRIPTS: &'static str = "dist/scripts";
    pub const DIST_SCRIPTS_MIN: &'static str = "dist/scripts_min";
    pub const DIST_STYLES: &'static str = "dist/styles";
    pub const DIST_HTML_MIN: &'static str = "dist/html_min";
    pub const DIST_ASSETS: &'static str = "dist/assets";

    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at the current working directory.
    pub fn current() -> Result<Self, TaskError> {
        let root = Utf8PathBuf::try_from(std::env::current_dir()?)?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Resolve a layout-relative path against the project root.
    pub fn path(&self, relative: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(relative)
    }

    /// Inverse of [`Layout::path`]; `None` for paths outside the project.
    pub fn relative<'a>(&self, path: &'a Utf8Path) -> Option<&'a Utf8Path> {
        path.strip_prefix(&self.root).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_roundtrip() {
        let layout = Layout::new("/project");
        let path = layout.path(Layout::TEMPLATES).join("index.html");

        assert_eq!(path, Utf8Path::new("/project/src/templates/index.html"));
        assert_eq!(
            layout.relative(&path),
            Some(Utf8Path::new("src/templates/index.html"))
        );
        assert_eq!(layout.relative(Utf8Path::new("/elsewhere/a.html")), None);
    }

    #[test]
    fn test_style_destinations_are_unique() {
        let mut files: Vec<_> = STYLE_ENTRIES.iter().map(|e| e.file).collect();
        files.sort();
        files.dedup();
        assert_eq!(files.len(), STYLE_ENTRIES.len());
    }
}
