//! Persistent per-sync-type state.
//!
//! Each sync type keeps a small set of files next to its mirrored items:
//! - `.last-revision`: the highest upstream revision fully present locally
//! - `.failed_downloads`: append-only log of items whose download failed
//! - `.to_download`: the work list handed to the worker pool

pub mod error;
pub mod files;

pub use error::StateError;
pub use files::{MirrorDir, StateStore};
