//! Error types for the mirror state files.

use std::path::PathBuf;

use thiserror::Error;

/// Errors reading or writing the per-sync-type state files.
#[derive(Error, Debug)]
pub enum StateError {
    /// A state file could not be read or written.
    #[error("State file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The watermark file does not hold a revision number.
    #[error("State file {path} does not contain a revision number: {contents:?}")]
    Corrupt { path: PathBuf, contents: String },
}

impl StateError {
    /// Create an Io error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
