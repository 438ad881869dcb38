//! Per-item status lines.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use super::liveness::Stall;
use super::SyncStats;
use crate::format::{self, Segment, Template};

/// How a single item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Updated,
    Failed,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Updated => " OK ",
            Outcome::Failed => "FAIL",
        }
    }
}

/// Extra information shown to the right of a status line during a
/// partial sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    /// The local copy just reached this revision.
    Advanced(u64),
    /// A transfer that has been running for a while.
    Stalled(Stall),
}

/// Receives rendered status lines.
pub trait StatusSink: Send {
    fn status(&mut self, line: String, completed: u64);

    fn finish(&mut self) {}
}

impl StatusSink for Vec<String> {
    fn status(&mut self, line: String, _completed: u64) {
        self.push(line);
    }
}

/// Prints status lines above a progress bar, or plainly when the bar is
/// disabled or stdout is not a terminal.
pub struct TerminalSink {
    bar: ProgressBar,
}

impl TerminalSink {
    pub fn new(no_progress_bar: bool, total: u64) -> Self {
        Self {
            bar: create_progress_bar(no_progress_bar, total),
        }
    }
}

impl StatusSink for TerminalSink {
    fn status(&mut self, line: String, completed: u64) {
        if self.bar.is_hidden() {
            println!("{}", line);
        } else {
            self.bar.println(line);
            self.bar.set_position(completed);
        }
    }

    fn finish(&mut self) {
        self.bar.finish_and_clear();
    }
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar`
/// or stdout is not a TTY (e.g. piped output, cron jobs).
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    match ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
    ) {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => tracing::debug!(error = %e, "Falling back to default progress style"),
    }
    pb
}

/// Render `[ OK ]  42.0%  item`, plus an optional annotation, fitted to
/// `width` columns.
pub fn status_line(
    outcome: Outcome,
    stats: &SyncStats,
    item: &str,
    annotation: Option<&Annotation>,
    width: usize,
) -> String {
    let primary = Template::with_slot(
        format!("[{}] {}  ", outcome.label(), percent_label(stats)),
        "",
    );
    let primary = Segment::new(&primary, item);

    match annotation {
        None => format::fit(primary, None, width),
        Some(Annotation::Advanced(revision)) => {
            let notice = Template::literal(format!("(local copy now at r{})", revision));
            format::fit(primary, Some(Segment::new(&notice, "")), width)
        }
        Some(Annotation::Stalled(stall)) => {
            let notice = Template::with_slot(
                "(",
                format!(" {}% after {})", stall.percent, format_duration(stall.elapsed)),
            );
            format::fit(primary, Some(Segment::new(&notice, &stall.item)), width)
        }
    }
}

/// Completion as a right-aligned, six-column percentage such as ` 42.0%`.
fn percent_label(stats: &SyncStats) -> String {
    let percent = if stats.total == 0 {
        100.0
    } else {
        100.0 * stats.completed() as f64 / stats.total as f64
    };
    format!("{:>6}", format!("{:.1}%", percent))
}

pub(crate) fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
