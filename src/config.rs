use std::path::PathBuf;
use std::time::Duration;

use crate::cli::SyncArgs;
use crate::dispatch::{SyncConfig, WorkerCommand};
use crate::ledger::FailurePolicy;
use crate::types::SyncType;

/// Where the items for a sync come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncInput {
    /// Newline-delimited list of every item to download.
    Full(PathBuf),
    /// JSON file of pending revisions.
    Partial(PathBuf),
}

/// Validated settings for a sync run.
#[derive(Debug, Clone)]
pub struct Config {
    pub directory: PathBuf,
    pub input: SyncInput,
    pub worker: WorkerCommand,
    pub stall_after: Duration,
    pub probe_timeout: Duration,
    pub width: usize,
    pub threads_num: u16,
    pub sync_type: SyncType,
    pub failure_policy: FailurePolicy,
    pub no_progress_bar: bool,
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(directory: &str, no_progress_bar: bool, args: SyncArgs) -> anyhow::Result<Self> {
        if args.threads_num == 0 {
            anyhow::bail!("--threads-num must be at least 1");
        }
        if args.width == 0 {
            anyhow::bail!("--width must be at least 1");
        }

        let input = match (args.items, args.revisions) {
            (Some(items), None) => SyncInput::Full(items),
            (None, Some(revisions)) => SyncInput::Partial(revisions),
            (Some(_), Some(_)) => anyhow::bail!("--items and --revisions cannot be combined"),
            (None, None) => anyhow::bail!("one of --items or --revisions is required"),
        };

        Ok(Self {
            directory: expand_tilde(directory),
            input,
            worker: WorkerCommand {
                program: args.worker,
                args: args.worker_args,
            },
            stall_after: Duration::from_secs(args.stall_after),
            probe_timeout: Duration::from_secs(args.probe_timeout),
            width: args.width,
            threads_num: args.threads_num,
            sync_type: args.sync_type,
            failure_policy: if args.hold_on_failure {
                FailurePolicy::Hold
            } else {
                FailurePolicy::Satisfy
            },
            no_progress_bar,
        })
    }

    /// The subset of settings the dispatcher needs.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            width: self.width,
            stall_after: self.stall_after,
            failure_policy: self.failure_policy,
        }
    }
}
