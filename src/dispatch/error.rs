use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use super::protocol::ProtocolError;
use crate::state::StateError;

/// Ways the worker pool itself can break, as opposed to a single item
/// failing to download.
#[derive(Debug, Error)]
pub enum PoolFault {
    #[error("Failed to read work list {path}: {source}")]
    WorkList {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to start worker {program} for {item}: {source}")]
    Spawn {
        program: PathBuf,
        item: String,
        source: std::io::Error,
    },

    #[error("Failed to read output of worker for {item}: {source}")]
    Output {
        item: String,
        source: LinesCodecError,
    },

    #[error("Failed to wait for worker for {item}: {source}")]
    Wait {
        item: String,
        source: std::io::Error,
    },

    #[error("Worker for {item} exited with {status}")]
    WorkerExit { item: String, status: ExitStatus },

    #[error("Worker pool should not still be running after its output closed")]
    StillRunning,

    #[error("Worker pool task failed: {0}")]
    Panicked(String),

    #[error("Worker output ended after {reported} of {total} items reported")]
    Incomplete { reported: usize, total: usize },
}

/// Fatal conditions that abort a sync run.
///
/// Individual download failures are not errors: they are counted and
/// logged, and the run continues.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Error from download worker: {details}")]
    Worker { details: String },

    #[error(transparent)]
    Pool(#[from] PoolFault),

    #[error(transparent)]
    State(#[from] StateError),
}
