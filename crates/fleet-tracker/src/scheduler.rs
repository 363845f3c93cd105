//! Periodic render tick driver

use crate::{FleetTracker, PresentationSnapshot};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Receives one presentation snapshot per tick.
///
/// Implementations must return promptly: hand the snapshot to a channel,
/// never do renderer I/O inline.
#[cfg_attr(test, mockall::automock)]
pub trait SnapshotSink: Send + Sync {
    fn publish(&self, snapshot: Arc<PresentationSnapshot>);
}

/// Sink that keeps only the most recent snapshot
pub struct WatchSink {
    tx: watch::Sender<Option<Arc<PresentationSnapshot>>>,
}

impl WatchSink {
    pub fn channel() -> (Self, watch::Receiver<Option<Arc<PresentationSnapshot>>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<PresentationSnapshot>>> {
        self.tx.subscribe()
    }
}

impl SnapshotSink for WatchSink {
    fn publish(&self, snapshot: Arc<PresentationSnapshot>) {
        self.tx.send_replace(Some(snapshot));
    }
}

/// Drives [`FleetTracker::tick`] at a fixed rate
pub struct RenderScheduler {
    tracker: Arc<FleetTracker>,
    sink: Arc<dyn SnapshotSink>,
    interval: Duration,
}

impl RenderScheduler {
    /// Scheduler ticking at the tracker's configured interval
    pub fn new(tracker: Arc<FleetTracker>, sink: Arc<dyn SnapshotSink>) -> Self {
        let interval = tracker.config().tick_interval();
        Self::with_interval(tracker, sink, interval)
    }

    pub fn with_interval(
        tracker: Arc<FleetTracker>,
        sink: Arc<dyn SnapshotSink>,
        interval: Duration,
    ) -> Self {
        Self {
            tracker,
            sink,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Build and publish a single snapshot
    pub fn run_once(&self) -> Arc<PresentationSnapshot> {
        let snapshot = Arc::new(self.tracker.tick());
        trace!(
            seq = snapshot.seq,
            entities = snapshot.stats.entity_count,
            clusters = snapshot.stats.cluster_count,
            "Render tick"
        );
        self.sink.publish(snapshot.clone());
        snapshot
    }

    /// Tick until `cancel` fires. Late ticks are skipped rather than
    /// bunched up.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Render scheduler started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.run_once();
                }
            }
        }

        debug!("Render scheduler stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

// ============================================================================
// TESTS
// ============================================================================
