//! Liveness classification from time since last report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CoreError, CoreResult};

/// Liveness of a tracked entity, derived from elapsed time only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LivenessStatus {
    /// Reported recently
    Online,
    /// Quiet for longer than expected
    Warning,
    /// Stale; displayed speed is forced to zero
    Offline,
}

impl LivenessStatus {
    pub const ALL: [LivenessStatus; 3] = [Self::Online, Self::Warning, Self::Offline];

    /// Higher is more alive
    pub fn rank(&self) -> u8 {
        match self {
            LivenessStatus::Online => 2,
            LivenessStatus::Warning => 1,
            LivenessStatus::Offline => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LivenessStatus::Online => "ONLINE",
            LivenessStatus::Warning => "WARNING",
            LivenessStatus::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Elapsed-time thresholds separating the liveness states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusThresholds {
    /// Below this many milliseconds an entity is online
    pub online_ms: u64,
    /// Below this (and at or above `online_ms`) an entity is in warning
    pub warning_ms: u64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            online_ms: 60_000,
            warning_ms: 300_000,
        }
    }
}

impl StatusThresholds {
    pub fn new(online_ms: u64, warning_ms: u64) -> CoreResult<Self> {
        let thresholds = Self {
            online_ms,
            warning_ms,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.warning_ms <= self.online_ms {
            return Err(CoreError::configuration(format!(
                "warning threshold ({} ms) must be greater than online threshold ({} ms)",
                self.warning_ms, self.online_ms
            )));
        }
        Ok(())
    }

    /// Classify an elapsed time. Negative values (device clock ahead of
    /// ours) count as freshly reported.
    pub fn classify(&self, elapsed_ms: i64) -> LivenessStatus {
        let elapsed = elapsed_ms.max(0) as u64;

        if elapsed < self.online_ms {
            LivenessStatus::Online
        } else if elapsed < self.warning_ms {
            LivenessStatus::Warning
        } else {
            LivenessStatus::Offline
        }
    }

    /// Classify a report taken at `last_report`, as seen at `now`
    pub fn classify_at(&self, last_report: DateTime<Utc>, now: DateTime<Utc>) -> LivenessStatus {
        self.classify(now.signed_duration_since(last_report).num_milliseconds())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_boundaries() {
        let t = StatusThresholds::default();

        assert_eq!(t.classify(0), LivenessStatus::Online);
        assert_eq!(t.classify(59_999), LivenessStatus::Online);
        assert_eq!(t.classify(60_000), LivenessStatus::Warning);
        assert_eq!(t.classify(299_999), LivenessStatus::Warning);
        assert_eq!(t.classify(300_000), LivenessStatus::Offline);
        assert_eq!(t.classify(i64::MAX), LivenessStatus::Offline);
    }

    #[test]
    fn test_future_timestamp_is_online() {
        let t = StatusThresholds::default();
        assert_eq!(t.classify(-5_000), LivenessStatus::Online);
    }

    #[test]
    fn test_monotonic_in_elapsed() {
        let t = StatusThresholds::default();
        let mut previous = t.classify(0).rank();

        for elapsed in (0..400_000).step_by(1_000) {
            let rank = t.classify(elapsed).rank();
            assert!(rank <= previous, "rank increased at {elapsed} ms");
            previous = rank;
        }
    }

    #[test]
    fn test_custom_thresholds() {
        let t = StatusThresholds::new(1_000, 2_000).unwrap();
        assert_eq!(t.classify(999), LivenessStatus::Online);
        assert_eq!(t.classify(1_500), LivenessStatus::Warning);
        assert_eq!(t.classify(2_000), LivenessStatus::Offline);
    }

    #[test]
    fn test_invalid_thresholds() {
        assert!(StatusThresholds::new(5_000, 5_000).is_err());
        assert!(StatusThresholds::new(5_000, 1_000).is_err());
    }

    #[test]
    fn test_classify_at() {
        let t = StatusThresholds::default();
        let now = Utc::now();

        assert_eq!(t.classify_at(now - Duration::seconds(30), now), LivenessStatus::Online);
        assert_eq!(t.classify_at(now - Duration::minutes(2), now), LivenessStatus::Warning);
        assert_eq!(t.classify_at(now - Duration::minutes(10), now), LivenessStatus::Offline);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&LivenessStatus::Warning).unwrap();
        assert_eq!(json, "\"WARNING\"");
    }
}
