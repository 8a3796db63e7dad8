use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock name '{name}' is too short: at least {min} characters are required")]
    NameTooShort { name: String, min: usize },

    #[error("Failed to create lock file {path}: {source}")]
    CreateFailed { path: PathBuf, source: io::Error },

    #[error("Failed to read lock file {path}: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },

    #[error("Failed to write owner to lock file {path}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },

    #[error("Failed to remove lock file {path}: {source}")]
    RemoveFailed { path: PathBuf, source: io::Error },

    #[error("Failed to probe process {pid}: {source}")]
    ProbeFailed { pid: u32, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LockError {
    /// The lock file this error concerns, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            LockError::CreateFailed { path, .. }
            | LockError::ReadFailed { path, .. }
            | LockError::WriteFailed { path, .. }
            | LockError::RemoveFailed { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.io_source()
            .map(|e| e.kind() == io::ErrorKind::PermissionDenied)
            .unwrap_or(false)
    }

    fn io_source(&self) -> Option<&io::Error> {
        match self {
            LockError::CreateFailed { source, .. }
            | LockError::ReadFailed { source, .. }
            | LockError::WriteFailed { source, .. }
            | LockError::RemoveFailed { source, .. }
            | LockError::ProbeFailed { source, .. } => Some(source),
            LockError::Io(e) => Some(e),
            LockError::NameTooShort { .. } => None,
        }
    }

    pub(crate) fn name_too_short(name: impl Into<String>, min: usize) -> Self {
        LockError::NameTooShort {
            name: name.into(),
            min,
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
