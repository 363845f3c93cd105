//! # Fleet Telemetry - Metrics & Observability
//!
//! Prometheus metrics for the live fleet tracking service:
//! - Tracked entities and their liveness
//! - Merge outcomes and render tick cost
//! - Upstream connection health
//! - Viewer connections

use fleet_core::{ConnectionEvent, ConnectionState, LivenessStatus};
use fleet_tracker::{AppliedResult, PresentationSnapshot};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use tracing::{debug, info};

/// Metrics collector for the fleet tracking service
pub struct MetricsCollector {
    registry: Registry,

    // Tracker metrics
    entity_count: IntGauge,
    entity_status: IntGaugeVec,
    samples_total: IntCounterVec,
    active_animations: IntGauge,
    cluster_count: IntGauge,
    tick_duration: Histogram,
    snapshots_published: IntCounter,

    // Ingest metrics
    connection_state: IntGaugeVec,
    reconnects_total: IntCounter,
    frames_total: IntCounterVec,

    // Viewer metrics
    viewer_connections: IntGauge,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        // Tracker metrics
        let entity_count = IntGauge::new("fleet_entities_total", "Number of tracked entities")?;
        registry.register(Box::new(entity_count.clone()))?;

        let entity_status = IntGaugeVec::new(
            Opts::new("fleet_entities_by_status", "Tracked entities by liveness status"),
            &["status"],
        )?;
        registry.register(Box::new(entity_status.clone()))?;

        let samples_total = IntCounterVec::new(
            Opts::new("fleet_samples_total", "Position samples by merge result"),
            &["result"],
        )?;
        registry.register(Box::new(samples_total.clone()))?;

        let active_animations = IntGauge::new(
            "fleet_active_animations",
            "Heading rotations in flight",
        )?;
        registry.register(Box::new(active_animations.clone()))?;

        let cluster_count = IntGauge::new("fleet_clusters", "Clusters in the latest snapshot")?;
        registry.register(Box::new(cluster_count.clone()))?;

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new("fleet_tick_duration_seconds", "Time to build one snapshot")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1]),
        )?;
        registry.register(Box::new(tick_duration.clone()))?;

        let snapshots_published = IntCounter::new(
            "fleet_snapshots_published_total",
            "Presentation snapshots published",
        )?;
        registry.register(Box::new(snapshots_published.clone()))?;

        // Ingest metrics
        let connection_state = IntGaugeVec::new(
            Opts::new("fleet_ingest_connection_state", "Upstream connection state"),
            &["state"],
        )?;
        registry.register(Box::new(connection_state.clone()))?;

        let reconnects_total = IntCounter::new(
            "fleet_ingest_reconnects_total",
            "Reconnect attempts scheduled",
        )?;
        registry.register(Box::new(reconnects_total.clone()))?;

        let frames_total = IntCounterVec::new(
            Opts::new("fleet_ingest_frames_total", "Inbound frames by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(frames_total.clone()))?;

        // Viewer metrics
        let viewer_connections = IntGauge::new(
            "fleet_viewer_connections",
            "Connected viewer WebSockets",
        )?;
        registry.register(Box::new(viewer_connections.clone()))?;

        let collector = Self {
            registry,
            entity_count,
            entity_status,
            samples_total,
            active_animations,
            cluster_count,
            tick_duration,
            snapshots_published,
            connection_state,
            reconnects_total,
            frames_total,
            viewer_connections,
        };
        collector.set_connection_state(ConnectionState::Disconnected);

        info!("Metrics collector initialized");
        Ok(collector)
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    // ========================================================================
    // TRACKER METRICS
    // ========================================================================

    /// Count one merge outcome
    pub fn record_apply(&self, result: AppliedResult) {
        self.samples_total.with_label_values(&[result.as_str()]).inc();
    }

    /// Update gauges from a freshly built snapshot
    pub fn observe_snapshot(&self, snapshot: &PresentationSnapshot) {
        let stats = &snapshot.stats;

        self.entity_count.set(stats.entity_count as i64);
        for status in LivenessStatus::ALL {
            self.entity_status
                .with_label_values(&[status.as_str()])
                .set(stats.count(status) as i64);
        }
        self.active_animations.set(stats.active_animations as i64);
        self.cluster_count.set(stats.cluster_count as i64);
        self.tick_duration.observe(stats.build_micros as f64 / 1_000_000.0);
        self.snapshots_published.inc();
    }

    // ========================================================================
    // INGEST METRICS
    // ========================================================================

    /// One-hot gauge over the connection states
    pub fn set_connection_state(&self, state: ConnectionState) {
        for candidate in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ] {
            self.connection_state
                .with_label_values(&[candidate.as_str()])
                .set(i64::from(candidate == state));
        }
    }

    pub fn record_connection_event(&self, event: &ConnectionEvent) {
        debug!(?event, "Connection event");
        match event {
            ConnectionEvent::Connecting { .. } => {
                self.set_connection_state(ConnectionState::Connecting)
            }
            ConnectionEvent::Connected => self.set_connection_state(ConnectionState::Connected),
            ConnectionEvent::Disconnected { .. } => {
                self.set_connection_state(ConnectionState::Disconnected)
            }
            ConnectionEvent::ReconnectScheduled { .. } => self.reconnects_total.inc(),
            ConnectionEvent::SubscriptionSent { .. } => {}
        }
    }

    pub fn record_frame(&self, kind: &str) {
        self.frames_total.with_label_values(&[kind]).inc();
    }

    // ========================================================================
    // VIEWER METRICS
    // ========================================================================

    pub fn set_viewer_connections(&self, count: usize) {
        self.viewer_connections.set(count as i64);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_core::{Coordinates, EntityId, PositionSample};
    use fleet_tracker::{FleetTracker, TrackerConfig};

    #[test]
    fn test_metrics_creation() {
        assert!(MetricsCollector::new().is_ok());
    }

    #[test]
    fn test_metrics_export() {
        let metrics = MetricsCollector::new().unwrap();

        metrics.record_apply(AppliedResult::Accepted);
        metrics.record_apply(AppliedResult::Stale);
        metrics.set_viewer_connections(3);
        metrics.record_frame("position_update");

        let export = metrics.export().unwrap();
        assert!(export.contains(r#"fleet_samples_total{result="accepted"} 1"#));
        assert!(export.contains(r#"fleet_samples_total{result="stale"} 1"#));
        assert!(export.contains("fleet_viewer_connections 3"));
        assert!(export.contains(r#"fleet_ingest_frames_total{kind="position_update"} 1"#));
    }

    #[test]
    fn test_snapshot_metrics() {
        let metrics = MetricsCollector::new().unwrap();
        let tracker = FleetTracker::new(TrackerConfig::default()).unwrap();
        let now = Utc::now();
        tracker.apply_at(
            EntityId::new("IMEI-1"),
            PositionSample::new(Coordinates::new(69.2, 34.5), 30.0, 45.0, now),
            now,
        );

        metrics.observe_snapshot(&tracker.tick_at(now));

        let export = metrics.export().unwrap();
        assert!(export.contains("fleet_entities_total 1"));
        assert!(export.contains(r#"fleet_entities_by_status{status="ONLINE"} 1"#));
        assert!(export.contains(r#"fleet_entities_by_status{status="OFFLINE"} 0"#));
        assert!(export.contains("fleet_snapshots_published_total 1"));
        assert!(export.contains("fleet_tick_duration_seconds_count 1"));
    }

    #[test]
    fn test_connection_state_is_one_hot() {
        let metrics = MetricsCollector::new().unwrap();

        metrics.record_connection_event(&ConnectionEvent::Connecting { attempt: 1 });
        metrics.record_connection_event(&ConnectionEvent::Connected);
        metrics.record_connection_event(&ConnectionEvent::ReconnectScheduled {
            attempt: 1,
            delay_ms: 5000,
        });

        let export = metrics.export().unwrap();
        assert!(export.contains(r#"fleet_ingest_connection_state{state="connected"} 1"#));
        assert!(export.contains(r#"fleet_ingest_connection_state{state="connecting"} 0"#));
        assert!(export.contains("fleet_ingest_reconnects_total 1"));
    }
}
