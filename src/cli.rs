use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::*;

#[derive(Parser, Debug)]
#[command(
    name = "plugin-mirror",
    about = "Keep a local mirror of a plugin repository up to date"
)]
pub struct Cli {
    /// Mirror root; each sync type keeps its files in a subdirectory
    #[arg(short = 'd', long, global = true, default_value = ".")]
    pub directory: String,

    /// Log level
    #[arg(long, value_enum, global = true, default_value = "info")]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long, global = true)]
    pub no_progress_bar: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download items and record progress
    Sync(SyncArgs),

    /// Show the last synced revision and recorded failures
    Status(StatusArgs),
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// What to download
    #[arg(short = 't', long = "type", value_enum, default_value = "all")]
    pub sync_type: SyncType,

    /// File listing items to download, one per line (full sync)
    #[arg(long, conflicts_with = "revisions", required_unless_present = "revisions")]
    pub items: Option<PathBuf>,

    /// JSON file of pending revisions and the items each one touches
    /// (partial sync)
    #[arg(long)]
    pub revisions: Option<PathBuf>,

    /// Number of concurrent download workers
    #[arg(short = 'j', long, default_value_t = 12)]
    pub threads_num: u16,

    /// Program that downloads a single item
    #[arg(long, default_value = "./download", env = "PLUGIN_MIRROR_WORKER")]
    pub worker: PathBuf,

    /// Extra argument passed to the worker before the sync type and item
    /// (repeatable)
    #[arg(long = "worker-arg", allow_hyphen_values = true)]
    pub worker_args: Vec<String>,

    /// Column width for status lines
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Seconds before an unfinished download is reported as stalled
    #[arg(long, default_value_t = 30)]
    pub stall_after: u64,

    /// Timeout in seconds for the size probe used in stall reports
    #[arg(long, default_value_t = 5)]
    pub probe_timeout: u64,

    /// Keep a revision pending when one of its downloads fails
    #[arg(long)]
    pub hold_on_failure: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[arg(short = 't', long = "type", value_enum, default_value = "all")]
    pub sync_type: SyncType,

    /// List every item in the failure log
    #[arg(long)]
    pub failed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_defaults() {
        let cli = Cli::try_parse_from(["plugin-mirror", "sync", "--items", "list.txt"]).unwrap();
        assert_eq!(cli.directory, ".");
        assert_eq!(cli.log_level, LogLevel::Info);
        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.sync_type, SyncType::All);
        assert_eq!(args.items, Some(PathBuf::from("list.txt")));
        assert_eq!(args.threads_num, 12);
        assert_eq!(args.width, 80);
        assert_eq!(args.stall_after, 30);
        assert!(!args.hold_on_failure);
    }

    #[test]
    fn test_items_and_revisions_conflict() {
        assert!(Cli::try_parse_from([
            "plugin-mirror",
            "sync",
            "--items",
            "a",
            "--revisions",
            "b"
        ])
        .is_err());
    }

    #[test]
    fn test_sync_needs_an_input() {
        assert!(Cli::try_parse_from(["plugin-mirror", "sync"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "plugin-mirror",
            "status",
            "--type",
            "readme",
            "--directory",
            "/srv/mirror",
            "--failed",
        ])
        .unwrap();
        assert_eq!(cli.directory, "/srv/mirror");
        let Command::Status(args) = cli.command else {
            panic!("expected status");
        };
        assert_eq!(args.sync_type, SyncType::Readme);
        assert!(args.failed);
    }

    #[test]
    fn test_worker_args_repeat() {
        let cli = Cli::try_parse_from([
            "plugin-mirror",
            "sync",
            "--revisions",
            "pending.json",
            "--worker",
            "php",
            "--worker-arg",
            "download",
            "--worker-arg",
            "--quiet",
        ])
        .unwrap();
        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.worker, PathBuf::from("php"));
        assert_eq!(args.worker_args, vec!["download", "--quiet"]);
    }
}
