//! plugin-mirror keeps a local copy of a plugin repository current.
//!
//! Downloads are delegated to an external worker program, one process per
//! item, run in parallel. Workers report progress as JSON lines on stdout.
//! A partial sync also tracks which upstream revisions are fully mirrored
//! and records the highest one so the next run can pick up from there.

#![warn(clippy::all)]

mod cli;
mod config;
mod dispatch;
mod format;
mod ledger;
mod state;
mod types;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Command, StatusArgs, SyncArgs};
use config::{Config, SyncInput};
use dispatch::{Dispatcher, HttpSizeProbe, TerminalSink, WorkerPool};
use ledger::RevisionLedger;
use state::{MirrorDir, StateStore};

/// Items from a newline-delimited list, each kept once in first-seen order.
fn parse_item_list(contents: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(String::from)
        .collect()
}

async fn read_item_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read item list {}", path.display()))?;
    Ok(parse_item_list(&contents))
}

/// Run the sync command.
async fn run_sync(directory: &str, no_progress_bar: bool, args: SyncArgs) -> anyhow::Result<()> {
    let config = Config::from_cli(directory, no_progress_bar, args)?;
    let mirror = MirrorDir::new(&config.directory, config.sync_type);
    tracing::info!(
        concurrency = config.threads_num,
        sync_type = config.sync_type.as_str(),
        directory = %mirror.directory().display(),
        "Starting plugin-mirror"
    );

    let (items, mut ledger) = match &config.input {
        SyncInput::Full(path) => (read_item_list(path).await?, None),
        SyncInput::Partial(path) => {
            let last_synced = mirror.read_last_revision().await?;
            let ledger = RevisionLedger::load(path)?.with_watermark(last_synced);
            tracing::info!(
                pending = ledger.len(),
                last_synced = ?last_synced,
                target = ?ledger.target(),
                "Loaded pending revisions"
            );
            (ledger.items(), Some(ledger))
        }
    };

    let probe = HttpSizeProbe::new(config.probe_timeout)
        .context("Failed to build HTTP client for size probes")?;
    let pool = WorkerPool::new(
        config.worker.clone(),
        config.sync_type,
        usize::from(config.threads_num),
    );
    let state: Arc<dyn StateStore> = Arc::new(mirror);
    let dispatcher = Dispatcher::new(config.sync_config(), state, Arc::new(probe));
    let mut sink = TerminalSink::new(config.no_progress_bar, items.len() as u64);

    let stats = dispatcher
        .run(&pool, &items, ledger.as_mut(), &mut sink)
        .await?;

    if let Some(ledger) = &ledger {
        if !ledger.is_empty() {
            tracing::warn!(
                pending = ledger.len(),
                watermark = ?ledger.watermark(),
                "Revisions still pending; run the sync again to catch up"
            );
        }
    }
    if stats.failed > 0 {
        tracing::warn!(
            failed = stats.failed,
            "Some downloads failed and were added to the failure log"
        );
    }
    Ok(())
}

/// Run the status command.
async fn run_status(directory: &str, args: StatusArgs) -> anyhow::Result<()> {
    let mirror = MirrorDir::new(&config::expand_tilde(directory), args.sync_type);
    let last_synced = mirror.read_last_revision().await?;
    let failures = mirror.read_failures().await?;

    println!("Mirror directory: {}", mirror.directory().display());
    println!();
    println!("Last synced revision: {}", last_synced.unwrap_or(0));
    println!("Failed downloads:     {}", failures.len());

    if args.failed && !failures.is_empty() {
        println!();
        println!("Failed items:");
        for item in &failures {
            println!("  {}", item);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Sync(args) => run_sync(&cli.directory, cli.no_progress_bar, args).await,
        Command::Status(args) => run_status(&cli.directory, args).await,
    };

    if let Err(e) = result {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}
