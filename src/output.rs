//! Output files and the code that puts them on disk.
//!
//! Adapters never touch the destination directory themselves. They return
//! [`Output`] values with paths relative to some destination root, and the
//! task that owns them decides where that root is and calls [`save`].

use std::fs;
use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

/// The content of an [`Output`] file.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum OutputData {
    /// Text content (UTF-8).
    Utf8(String),
    /// Binary content (raw bytes).
    Binary(Vec<u8>),
}

impl AsRef<[u8]> for OutputData {
    fn as_ref(&self) -> &[u8] {
        match self {
            OutputData::Utf8(s) => s.as_bytes(),
            OutputData::Binary(b) => b.as_slice(),
        }
    }
}

/// A single file produced by an adapter, relative to a destination root.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Output {
    pub path: Utf8PathBuf,
    pub data: OutputData,
}

impl Output {
    pub fn text(path: impl AsRef<Utf8Path>, data: impl Into<String>) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            data: OutputData::Utf8(data.into()),
        }
    }

    pub fn binary(path: impl AsRef<Utf8Path>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            data: OutputData::Binary(data.into()),
        }
    }
}

fn digest(bytes: &[u8]) -> blake3::Hash {
    blake3::hash(bytes)
}

/// Writes outputs under `dest`, creating directories as needed, and returns
/// the absolute paths of every output.
///
/// A file whose bytes are already identical on disk is left alone, so a
/// rebuild with unchanged sources doesn't touch any timestamps.
pub fn save(dest: &Utf8Path, outputs: &[Output]) -> io::Result<Vec<Utf8PathBuf>> {
    let mut written = Vec::with_capacity(outputs.len());

    for output in outputs {
        let path = dest.join(&output.path);

        let unchanged = match fs::read(&path) {
            Ok(existing) => digest(&existing) == digest(output.data.as_ref()),
            Err(_) => false,
        };

        if !unchanged {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &output.data)?;
            tracing::trace!(%path, "wrote file");
        }

        written.push(path);
    }

    Ok(written)
}
