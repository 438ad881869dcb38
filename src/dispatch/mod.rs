//! Runs download workers and turns their progress reports into stats,
//! persisted revisions and status lines.

pub mod error;
pub mod liveness;
pub mod pool;
pub mod protocol;
pub mod report;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use error::{DispatchError, PoolFault};
pub use liveness::{HttpSizeProbe, SizeProbe};
pub use pool::{EventSource, WorkerCommand, WorkerPool};
pub use report::{StatusSink, TerminalSink};

use crate::format::DEFAULT_WIDTH;
use crate::ledger::{FailurePolicy, RevisionLedger};
use crate::state::StateStore;
use liveness::InProgress;
use protocol::{ProgressEvent, ProtocolError};
use report::{format_duration, Annotation, Outcome};

/// Default time before an unfinished download is reported as stalled.
pub const DEFAULT_STALL_AFTER: Duration = Duration::from_secs(30);

/// Counts for one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
}

impl SyncStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn completed(&self) -> usize {
        self.updated + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == self.total
    }
}

/// Dispatcher settings, decoupled from CLI parsing.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Column width for status lines.
    pub width: usize,
    pub stall_after: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            stall_after: DEFAULT_STALL_AFTER,
            failure_policy: FailurePolicy::default(),
        }
    }
}

pub struct Dispatcher {
    config: SyncConfig,
    state: Arc<dyn StateStore>,
    probe: Arc<dyn SizeProbe>,
}

impl Dispatcher {
    pub fn new(config: SyncConfig, state: Arc<dyn StateStore>, probe: Arc<dyn SizeProbe>) -> Self {
        Self {
            config,
            state,
            probe,
        }
    }

    /// Download `items` through `pool`.
    ///
    /// With a ledger this is a partial sync: each finished item is marked
    /// satisfied and every advance of the watermark is persisted before the
    /// next event is read.
    pub async fn run(
        &self,
        pool: &WorkerPool,
        items: &[String],
        mut ledger: Option<&mut RevisionLedger>,
        sink: &mut dyn StatusSink,
    ) -> Result<SyncStats, DispatchError> {
        let started = Instant::now();

        if items.is_empty() {
            tracing::info!("Nothing to download");
            if let Some(ledger) = ledger {
                if let Some(revision) = ledger.advance_watermark() {
                    self.state.write_last_revision(revision).await?;
                    tracing::info!(revision, "Local copy advanced");
                }
            }
            sink.finish();
            return Ok(SyncStats::new(0));
        }

        let work_list = self.state.write_work_list(items).await?;
        tracing::info!(
            items = items.len(),
            partial = ledger.is_some(),
            "Starting downloads"
        );

        let mut running = pool.spawn(&work_list).await?;
        let result = self
            .drive(&mut running, items, ledger.as_deref_mut(), sink)
            .await;
        sink.finish();
        let stats = result?;

        tracing::info!("── Summary ──");
        tracing::info!(
            "  {} updated, {} failed, {} total",
            stats.updated,
            stats.failed,
            stats.total
        );
        if let Some(ledger) = ledger {
            match ledger.watermark() {
                Some(revision) => tracing::info!("  local copy at r{}", revision),
                None => tracing::info!("  no revision recorded yet"),
            }
        }
        tracing::info!("  elapsed: {}", format_duration(started.elapsed()));
        Ok(stats)
    }

    /// Consume every event from `source` until the workers are done.
    ///
    /// Every finished item must be one of `items`.
    async fn drive(
        &self,
        source: &mut dyn EventSource,
        items: &[String],
        mut ledger: Option<&mut RevisionLedger>,
        sink: &mut dyn StatusSink,
    ) -> Result<SyncStats, DispatchError> {
        let queued: HashSet<&str> = items.iter().map(String::as_str).collect();
        let total = items.len();
        let mut stats = SyncStats::new(total);
        let mut in_progress = InProgress::new(self.config.stall_after);

        while let Some(line) = source.next_line().await {
            let (outcome, item) = match ProgressEvent::parse(&line)? {
                ProgressEvent::Started {
                    item,
                    download_path,
                    download_url,
                } => {
                    if ledger.is_some() {
                        in_progress.start(item, download_path, download_url);
                    }
                    continue;
                }
                ProgressEvent::Done { item } => (Outcome::Updated, item),
                ProgressEvent::Failed { item } => (Outcome::Failed, item),
                ProgressEvent::Error { details } => {
                    return Err(DispatchError::Worker { details });
                }
            };

            if !queued.contains(item.as_str()) {
                return Err(ProtocolError::UnknownItem { item }.into());
            }
            if stats.is_complete() {
                return Err(ProtocolError::Overreported { item, total }.into());
            }
            in_progress.finish(&item);

            match outcome {
                Outcome::Updated => {
                    stats.updated += 1;
                    tracing::debug!(item = %item, in_flight = in_progress.len(), "Updated");
                }
                Outcome::Failed => {
                    stats.failed += 1;
                    tracing::warn!(item = %item, "Download failed");
                    self.state.append_failure(&item).await?;
                }
            }

            let annotation = match ledger.as_deref_mut() {
                Some(ledger) => {
                    self.update_ledger(ledger, &item, outcome, &mut in_progress)
                        .await?
                }
                None => None,
            };

            let line = report::status_line(
                outcome,
                &stats,
                &item,
                annotation.as_ref(),
                self.config.width,
            );
            sink.status(line, stats.completed() as u64);
        }

        source.finish().await?;
        if !stats.is_complete() {
            return Err(PoolFault::Incomplete {
                reported: stats.completed(),
                total,
            }
            .into());
        }
        Ok(stats)
    }

    /// Apply one finished item to the ledger and persist any advance.
    ///
    /// Without an advance, the annotation falls back to a stalled transfer
    /// if there is one.
    async fn update_ledger(
        &self,
        ledger: &mut RevisionLedger,
        item: &str,
        outcome: Outcome,
        in_progress: &mut InProgress,
    ) -> Result<Option<Annotation>, DispatchError> {
        if outcome == Outcome::Updated || self.config.failure_policy == FailurePolicy::Satisfy {
            ledger.mark_satisfied(item);
        }

        if let Some(revision) = ledger.advance_watermark() {
            self.state.write_last_revision(revision).await?;
            tracing::info!(revision, pending = ledger.len(), "Local copy advanced");
            return Ok(Some(Annotation::Advanced(revision)));
        }

        Ok(in_progress
            .stall_report(&self.probe, Instant::now())
            .await
            .map(Annotation::Stalled))
    }
}
