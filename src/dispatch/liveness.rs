//! Display-only tracking of downloads that are still in flight.
//!
//! Nothing here affects what gets counted or persisted. It only lets the
//! status line point at a transfer that has been running for a while and
//! estimate how far along it is.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use reqwest::Client;
use tokio::task::JoinHandle;

/// Looks up the full size of a remote download.
#[async_trait]
pub trait SizeProbe: Send + Sync {
    /// Size in bytes, or `None` if it cannot be determined.
    async fn remote_size(&self, url: &str) -> Option<u64>;
}

/// Probes sizes with a `HEAD` request and the `Content-Length` header.
#[derive(Debug, Clone)]
pub struct HttpSizeProbe {
    client: Client,
}

impl HttpSizeProbe {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SizeProbe for HttpSizeProbe {
    async fn remote_size(&self, url: &str) -> Option<u64> {
        let response = match self.client.head(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(url, error = %e, "Size probe failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::debug!(url, status = %response.status(), "Size probe rejected");
            return None;
        }
        response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }
}

#[derive(Debug)]
enum ProbedSize {
    Unprobed,
    /// A probe is running in the background.
    Pending(JoinHandle<Option<u64>>),
    Known(u64),
    Unavailable,
}

impl ProbedSize {
    /// Pick up the result of a finished background probe.
    fn settle(&mut self) {
        let ProbedSize::Pending(handle) = self else {
            return;
        };
        let Some(outcome) = handle.now_or_never() else {
            return;
        };
        *self = match outcome {
            Ok(Some(size)) if size > 0 => ProbedSize::Known(size),
            Ok(_) => ProbedSize::Unavailable,
            Err(e) => {
                tracing::debug!(error = %e, "Size probe task failed");
                ProbedSize::Unavailable
            }
        };
    }
}

impl Drop for ProbedSize {
    fn drop(&mut self) {
        if let ProbedSize::Pending(handle) = self {
            handle.abort();
        }
    }
}

#[derive(Debug)]
pub struct InProgressEntry {
    pub item: String,
    pub started_at: Instant,
    pub download_url: String,
    pub download_path: PathBuf,
    known_size: ProbedSize,
}

/// A transfer that has been running longer than the stall threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stall {
    pub item: String,
    pub percent: u64,
    pub elapsed: Duration,
}

/// Items that have started but not yet finished.
#[derive(Debug)]
pub struct InProgress {
    entries: HashMap<String, InProgressEntry>,
    stall_after: Duration,
}

impl InProgress {
    pub fn new(stall_after: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            stall_after,
        }
    }

    pub fn start(&mut self, item: String, download_path: PathBuf, download_url: String) {
        self.start_at(item, download_path, download_url, Instant::now());
    }

    fn start_at(
        &mut self,
        item: String,
        download_path: PathBuf,
        download_url: String,
        started_at: Instant,
    ) {
        let entry = InProgressEntry {
            item: item.clone(),
            started_at,
            download_url,
            download_path,
            known_size: ProbedSize::Unprobed,
        };
        self.entries.insert(item, entry);
    }

    pub fn finish(&mut self, item: &str) {
        self.entries.remove(item);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Wait until no background probe is still running.
    #[cfg(test)]
    pub(crate) async fn probes_finished(&self) {
        while self
            .entries
            .values()
            .any(|e| matches!(&e.known_size, ProbedSize::Pending(h) if !h.is_finished()))
        {
            tokio::task::yield_now().await;
        }
    }

    /// Find the longest-running stalled transfer whose size is known, and
    /// estimate its progress from the bytes on disk.
    ///
    /// Sizes are probed in the background, at most once per item, starting
    /// the first time the item is seen stalled. Until a probe finishes its
    /// item is skipped, as is any item whose probe failed.
    pub async fn stall_report(
        &mut self,
        probe: &Arc<dyn SizeProbe>,
        now: Instant,
    ) -> Option<Stall> {
        let mut stalled: Vec<(Instant, String)> = self
            .entries
            .values()
            .filter(|e| now.saturating_duration_since(e.started_at) >= self.stall_after)
            .map(|e| (e.started_at, e.item.clone()))
            .collect();
        stalled.sort();

        for (started_at, item) in stalled {
            let Some(entry) = self.entries.get_mut(&item) else {
                continue;
            };
            if matches!(entry.known_size, ProbedSize::Unprobed) {
                let probe = Arc::clone(probe);
                let url = entry.download_url.clone();
                entry.known_size =
                    ProbedSize::Pending(tokio::spawn(async move { probe.remote_size(&url).await }));
            }
            entry.known_size.settle();
            let ProbedSize::Known(total) = entry.known_size else {
                continue;
            };

            let on_disk = tokio::fs::metadata(&entry.download_path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            return Some(Stall {
                item,
                percent: (on_disk.saturating_mul(100) / total).min(100),
                elapsed: now.saturating_duration_since(started_at),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Returns a fixed size and counts how often it was asked.
    struct FixedProbe {
        size: Option<u64>,
        calls: AtomicUsize,
    }

    impl FixedProbe {
        fn new(size: Option<u64>) -> Arc<Self> {
            Arc::new(Self {
                size,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SizeProbe for FixedProbe {
        async fn remote_size(&self, _url: &str) -> Option<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.size
        }
    }

    /// Never answers.
    struct HangingProbe;

    #[async_trait]
    impl SizeProbe for HangingProbe {
        async fn remote_size(&self, _url: &str) -> Option<u64> {
            std::future::pending().await
        }
    }

    /// Ask once to start the probes, let them finish, then ask again.
    async fn settled_report(
        tracker: &mut InProgress,
        probe: &Arc<dyn SizeProbe>,
        now: Instant,
    ) -> Option<Stall> {
        tracker.stall_report(probe, now).await;
        tracker.probes_finished().await;
        tracker.stall_report(probe, now).await
    }

    #[tokio::test]
    async fn test_nothing_reported_before_threshold() {
        let mut tracker = InProgress::new(Duration::from_secs(60));
        tracker.start("a".into(), PathBuf::from("/nonexistent/a.zip"), "u".into());
        let probe = FixedProbe::new(Some(100));
        let dyn_probe: Arc<dyn SizeProbe> = probe.clone();

        assert_eq!(settled_report(&mut tracker, &dyn_probe, Instant::now()).await, None);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_percent_from_bytes_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.zip");
        std::fs::write(&path, vec![0u8; 250]).unwrap();

        let now = Instant::now();
        let mut tracker = InProgress::new(Duration::from_secs(10));
        tracker.start_at(
            "slow".into(),
            path,
            "u".into(),
            now - Duration::from_secs(65),
        );
        let probe: Arc<dyn SizeProbe> = FixedProbe::new(Some(1000));

        let stall = settled_report(&mut tracker, &probe, now).await.unwrap();
        assert_eq!(stall.item, "slow");
        assert_eq!(stall.percent, 25);
        assert_eq!(stall.elapsed, Duration::from_secs(65));
    }

    #[tokio::test]
    async fn test_report_does_not_wait_for_size_lookup() {
        let now = Instant::now();
        let mut tracker = InProgress::new(Duration::ZERO);
        tracker.start_at("a".into(), PathBuf::from("/nonexistent/a"), "u".into(), now);
        let probe: Arc<dyn SizeProbe> = Arc::new(HangingProbe);

        for _ in 0..3 {
            let report = tokio::time::timeout(
                Duration::from_secs(1),
                tracker.stall_report(&probe, now),
            )
            .await
            .expect("stall report waited on the size lookup");
            assert_eq!(report, None);
        }
    }

    #[tokio::test]
    async fn test_oldest_stall_wins_and_size_is_cached() {
        let now = Instant::now();
        let mut tracker = InProgress::new(Duration::from_secs(10));
        tracker.start_at(
            "newer".into(),
            PathBuf::from("/nonexistent/n"),
            "u".into(),
            now - Duration::from_secs(20),
        );
        tracker.start_at(
            "older".into(),
            PathBuf::from("/nonexistent/o"),
            "u".into(),
            now - Duration::from_secs(90),
        );
        let probe = FixedProbe::new(Some(10));
        let dyn_probe: Arc<dyn SizeProbe> = probe.clone();

        let stall = settled_report(&mut tracker, &dyn_probe, now).await.unwrap();
        assert_eq!(stall.item, "older");
        assert_eq!(stall.percent, 0);

        settled_report(&mut tracker, &dyn_probe, now).await.unwrap();
        // One probe per stalled item, never repeated.
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_size_lookup_suppresses_report() {
        let now = Instant::now();
        let mut tracker = InProgress::new(Duration::ZERO);
        tracker.start_at("a".into(), PathBuf::from("/nonexistent/a"), "u".into(), now);
        let probe = FixedProbe::new(None);
        let dyn_probe: Arc<dyn SizeProbe> = probe.clone();

        assert_eq!(settled_report(&mut tracker, &dyn_probe, now).await, None);
        assert_eq!(settled_report(&mut tracker, &dyn_probe, now).await, None);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_percent_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grown.zip");
        std::fs::write(&path, vec![0u8; 300]).unwrap();

        let now = Instant::now();
        let mut tracker = InProgress::new(Duration::ZERO);
        tracker.start_at("grown".into(), path, "u".into(), now);
        let probe: Arc<dyn SizeProbe> = FixedProbe::new(Some(200));

        let stall = settled_report(&mut tracker, &probe, now).await.unwrap();
        assert_eq!(stall.percent, 100);
    }

    #[test]
    fn test_finish_removes_entry() {
        let mut tracker = InProgress::new(Duration::ZERO);
        tracker.start("a".into(), PathBuf::from("a"), "u".into());
        tracker.start("b".into(), PathBuf::from("b"), "u".into());
        tracker.finish("a");
        tracker.finish("missing");
        assert_eq!(tracker.len(), 1);
    }
}
