//! Bounded pool of worker processes.
//!
//! Every item gets its own worker invocation, `<program> [args..]
//! <sync-type> <item>`, with at most `concurrency` running at once. Each
//! worker's stdout is framed into lines and forwarded into one channel, so
//! the dispatcher sees a single stream in arrival order regardless of which
//! worker produced it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};

use super::error::PoolFault;
use crate::types::SyncType;

/// Longest protocol line accepted from a worker.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Lines buffered between the workers and the dispatcher.
const LINE_BUFFER: usize = 256;

/// How long the pool may take to wind down once its output has closed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Source of raw protocol lines for the dispatcher.
#[async_trait]
pub trait EventSource: Send {
    /// Next line from any worker, or `None` once all output has closed.
    async fn next_line(&mut self) -> Option<String>;

    /// Called once the stream has closed; reports how the pool ended.
    async fn finish(&mut self) -> Result<(), PoolFault>;
}

/// The external program that downloads a single item.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    /// Fixed arguments placed before the sync type and item.
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    command: Arc<WorkerCommand>,
    sync_type: SyncType,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(command: WorkerCommand, sync_type: SyncType, concurrency: usize) -> Self {
        Self {
            command: Arc::new(command),
            sync_type,
            concurrency: concurrency.max(1),
        }
    }

    /// Start working through the items listed in `work_list`.
    pub async fn spawn(&self, work_list: &Path) -> Result<RunningPool, PoolFault> {
        let contents =
            tokio::fs::read_to_string(work_list)
                .await
                .map_err(|source| PoolFault::WorkList {
                    path: work_list.to_path_buf(),
                    source,
                })?;
        let items: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        tracing::debug!(
            items = items.len(),
            concurrency = self.concurrency,
            program = %self.command.program.display(),
            "Starting worker pool",
        );

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let command = Arc::clone(&self.command);
        let sync_type = self.sync_type;
        let concurrency = self.concurrency;

        let driver = tokio::spawn(async move {
            let outcomes: Vec<Result<(), PoolFault>> = stream::iter(items)
                .map(|item| run_worker(Arc::clone(&command), sync_type, item, tx.clone()))
                .buffer_unordered(concurrency)
                .collect()
                .await;
            // Report the first fault.
            outcomes.into_iter().collect::<Result<(), PoolFault>>()
        });

        Ok(RunningPool {
            lines: rx,
            driver: Some(driver),
            exit_grace: EXIT_GRACE,
        })
    }
}

/// Run one worker to completion, forwarding its output lines.
async fn run_worker(
    command: Arc<WorkerCommand>,
    sync_type: SyncType,
    item: String,
    lines: mpsc::Sender<String>,
) -> Result<(), PoolFault> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .arg(sync_type.as_str())
        .arg(&item)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| PoolFault::Spawn {
            program: command.program.clone(),
            item: item.clone(),
            source,
        })?;

    if let Some(stdout) = child.stdout.take() {
        let mut framed = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        while let Some(line) = framed.next().await {
            let line = line.map_err(|source| PoolFault::Output {
                item: item.clone(),
                source,
            })?;
            if lines.send(line).await.is_err() {
                // Dispatcher stopped listening; the child is killed on drop.
                tracing::debug!(item = %item, "Dropping worker after dispatcher exit");
                return Ok(());
            }
        }
    }

    let status = child.wait().await.map_err(|source| PoolFault::Wait {
        item: item.clone(),
        source,
    })?;
    if status.success() {
        Ok(())
    } else {
        tracing::warn!(item = %item, %status, "Worker exited unsuccessfully");
        Err(PoolFault::WorkerExit { item, status })
    }
}

/// Handle to a pool that has been started.
///
/// Dropping the handle before [`EventSource::finish`] succeeds aborts the
/// pool and kills any workers still running.
pub struct RunningPool {
    lines: mpsc::Receiver<String>,
    driver: Option<JoinHandle<Result<(), PoolFault>>>,
    exit_grace: Duration,
}

#[async_trait]
impl EventSource for RunningPool {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    async fn finish(&mut self) -> Result<(), PoolFault> {
        let Some(driver) = self.driver.as_mut() else {
            return Ok(());
        };
        let outcome = tokio::time::timeout(self.exit_grace, driver).await;
        let result = match outcome {
            Err(_elapsed) => return Err(PoolFault::StillRunning),
            Ok(Err(join_error)) => Err(PoolFault::Panicked(join_error.to_string())),
            Ok(Ok(result)) => result,
        };
        self.driver = None;
        result
    }
}

impl Drop for RunningPool {
    fn drop(&mut self) {
        if let Some(driver) = &self.driver {
            driver.abort();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh_worker(script: &str) -> WorkerCommand {
        // sh -c SCRIPT worker <sync-type> <item>  =>  $1 = sync type, $2 = item
        WorkerCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into(), "worker".into()],
        }
    }

    async fn work_list(dir: &Path, items: &[&str]) -> PathBuf {
        let path = dir.join(".to_download");
        tokio::fs::write(&path, items.join("\n")).await.unwrap();
        path
    }

    async fn drain(pool: &mut RunningPool) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = pool.next_line().await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_pool_multiplexes_worker_output() {
        let dir = tempfile::tempdir().unwrap();
        let list = work_list(dir.path(), &["alpha", "beta", "gamma"]).await;
        let pool = WorkerPool::new(
            sh_worker(r#"printf '{"type":"done","plugin":"%s","sync":"%s"}\n' "$2" "$1""#),
            SyncType::Readme,
            2,
        );

        let mut running = pool.spawn(&list).await.unwrap();
        let mut lines = drain(&mut running).await;
        running.finish().await.unwrap();

        lines.sort();
        assert_eq!(
            lines,
            vec![
                r#"{"type":"done","plugin":"alpha","sync":"readme"}"#,
                r#"{"type":"done","plugin":"beta","sync":"readme"}"#,
                r#"{"type":"done","plugin":"gamma","sync":"readme"}"#,
            ]
        );
    }

    #[tokio::test]
    async fn test_pool_reports_nonzero_worker_exit() {
        let dir = tempfile::tempdir().unwrap();
        let list = work_list(dir.path(), &["broken"]).await;
        let pool = WorkerPool::new(sh_worker("exit 3"), SyncType::All, 4);

        let mut running = pool.spawn(&list).await.unwrap();
        assert!(drain(&mut running).await.is_empty());
        let err = running.finish().await.unwrap_err();
        assert!(matches!(err, PoolFault::WorkerExit { ref item, .. } if item == "broken"));
    }

    #[tokio::test]
    async fn test_pool_reports_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let list = work_list(dir.path(), &["a"]).await;
        let pool = WorkerPool::new(
            WorkerCommand {
                program: dir.path().join("no-such-worker"),
                args: Vec::new(),
            },
            SyncType::All,
            1,
        );

        let mut running = pool.spawn(&list).await.unwrap();
        assert!(drain(&mut running).await.is_empty());
        assert!(matches!(
            running.finish().await,
            Err(PoolFault::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_work_list() {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::new(sh_worker("true"), SyncType::All, 1);
        let err = pool
            .spawn(&dir.path().join("missing"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PoolFault::WorkList { .. }));
    }

    #[tokio::test]
    async fn test_blank_lines_in_work_list_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let list = work_list(dir.path(), &["", "only", "  ", ""]).await;
        let pool = WorkerPool::new(sh_worker(r#"echo "$2""#), SyncType::All, 3);

        let mut running = pool.spawn(&list).await.unwrap();
        assert_eq!(drain(&mut running).await, vec!["only"]);
        running.finish().await.unwrap();
    }
}
