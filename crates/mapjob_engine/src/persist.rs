use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::Builder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("cannot use {path} for output: {reason}")]
    Directory { path: PathBuf, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Creates `dir` when missing and checks that files can be created in it.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    let unusable = |reason: String| PersistError::Directory {
        path: dir.to_path_buf(),
        reason,
    };
    if dir.exists() && !dir.is_dir() {
        return Err(unusable("not a directory".to_string()));
    }
    fs::create_dir_all(dir).map_err(|err| unusable(err.to_string()))?;
    temp_in(dir).map_err(|err| unusable(err.to_string()))?;
    Ok(())
}

fn temp_in(dir: &Path) -> io::Result<tempfile::NamedTempFile> {
    Builder::new().prefix(".mapjob-").suffix(".part").tempfile_in(dir)
}

/// Replaces whole files inside one directory. Content is staged in a
/// sibling temp file and renamed over the target once synced.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_dir(&self.dir)?;
        let mut staged = temp_in(&self.dir)?;
        staged.write_all(content)?;
        staged.as_file().sync_all()?;

        let target = self.dir.join(filename);
        staged.persist(&target).map_err(|err| err.error)?;
        Ok(target)
    }

    /// Deletes `filename` if present.
    pub fn remove(&self, filename: &str) -> Result<(), PersistError> {
        fs::remove_file(self.dir.join(filename)).or_else(|err| match err.kind() {
            io::ErrorKind::NotFound => Ok(()),
            _ => Err(err.into()),
        })
    }
}
