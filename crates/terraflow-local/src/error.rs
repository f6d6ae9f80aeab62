//! Local adapter error types

use std::io::ErrorKind;
use std::path::PathBuf;
use terraflow_cloud::AdapterError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("Attribute '{name}' must be {expected}")]
    InvalidAttribute { name: String, expected: &'static str },

    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{} is not a {expected}", path.display())]
    WrongType { path: PathBuf, expected: &'static str },

    #[error("Cannot change '{0}' in place")]
    Immutable(String),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl LocalError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == ErrorKind::NotFound {
            LocalError::NotFound(path)
        } else {
            LocalError::Io { path, source }
        }
    }
}

impl From<LocalError> for AdapterError {
    fn from(err: LocalError) -> Self {
        match &err {
            LocalError::NotFound(_) => AdapterError::NotFound(err.to_string()),
            LocalError::Immutable(_) => AdapterError::Unsupported(err.to_string()),
            LocalError::Io { source, .. }
                if matches!(
                    source.kind(),
                    ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                ) =>
            {
                AdapterError::Transient(err.to_string())
            }
            _ => AdapterError::Failed(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LocalError>;
