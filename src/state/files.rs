//! State store trait and the plain-file implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::StateError;
use crate::types::SyncType;

const LAST_REVISION_FILE: &str = ".last-revision";
const FAILED_DOWNLOADS_FILE: &str = ".failed_downloads";
const WORK_LIST_FILE: &str = ".to_download";

/// Trait for the state a sync run persists as it goes.
///
/// Object-safe so the dispatcher can hold an `Arc<dyn StateStore>`.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the last fully synced revision, or `None` if no sync has
    /// recorded one yet.
    async fn read_last_revision(&self) -> Result<Option<u64>, StateError>;

    /// Replace the last synced revision. The previous value stays intact
    /// if the write fails part way.
    async fn write_last_revision(&self, revision: u64) -> Result<(), StateError>;

    /// Append one item to the failure log.
    async fn append_failure(&self, item: &str) -> Result<(), StateError>;

    /// Write the newline-delimited work list and return its path.
    async fn write_work_list(&self, items: &[String]) -> Result<PathBuf, StateError>;
}

/// State files for one sync type, kept in that sync type's directory under
/// the mirror root.
#[derive(Debug, Clone)]
pub struct MirrorDir {
    directory: PathBuf,
}

impl MirrorDir {
    pub fn new(root: &Path, sync_type: SyncType) -> Self {
        Self {
            directory: root.join(sync_type.directory_name()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn last_revision_path(&self) -> PathBuf {
        self.directory.join(LAST_REVISION_FILE)
    }

    fn failures_path(&self) -> PathBuf {
        self.directory.join(FAILED_DOWNLOADS_FILE)
    }

    async fn ensure_directory(&self) -> Result<(), StateError> {
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| StateError::io(&self.directory, e))
    }

    /// Read every item recorded in the failure log, oldest first.
    pub async fn read_failures(&self) -> Result<Vec<String>, StateError> {
        let path = self.failures_path();
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StateError::io(path, e)),
        }
    }
}

#[async_trait]
impl StateStore for MirrorDir {
    async fn read_last_revision(&self) -> Result<Option<u64>, StateError> {
        let path = self.last_revision_path();
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(path, e)),
        };
        contents
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| StateError::Corrupt { path, contents })
    }

    async fn write_last_revision(&self, revision: u64) -> Result<(), StateError> {
        self.ensure_directory().await?;
        let path = self.last_revision_path();
        let tmp_path = path.with_extension("tmp");

        // Write next to the target and rename over it so readers never see
        // a half-written number.
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| StateError::io(&tmp_path, e))?;
        file.write_all(format!("{}\n", revision).as_bytes())
            .await
            .map_err(|e| StateError::io(&tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::io(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StateError::io(&path, e))?;
        tracing::debug!(revision, path = %path.display(), "Recorded last synced revision");
        Ok(())
    }

    async fn append_failure(&self, item: &str) -> Result<(), StateError> {
        self.ensure_directory().await?;
        let path = self.failures_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StateError::io(&path, e))?;
        file.write_all(format!("{}\n", item).as_bytes())
            .await
            .map_err(|e| StateError::io(&path, e))?;
        file.flush().await.map_err(|e| StateError::io(&path, e))?;
        Ok(())
    }

    async fn write_work_list(&self, items: &[String]) -> Result<PathBuf, StateError> {
        self.ensure_directory().await?;
        let path = self.directory.join(WORK_LIST_FILE);
        let mut contents = items.join("\n");
        contents.push('\n');
        fs::write(&path, contents)
            .await
            .map_err(|e| StateError::io(&path, e))?;
        Ok(path)
    }
}
