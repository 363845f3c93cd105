//! Service configuration
//!
//! Layered, later sources win:
//! 1. Built-in defaults
//! 2. TOML file named by `FLEET_CONFIG` (default `fleet.toml`, optional)
//! 3. `FLEET_*` environment variables, `__` between nested keys,
//!    e.g. `FLEET_TRACKER__WARNING_THRESHOLD_MS=120000`

use anyhow::Context;
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use fleet_ingest::IngestConfig;
use fleet_tracker::TrackerConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "FLEET_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "fleet.toml";

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP API port
    pub api_port: u16,
    /// Viewer WebSocket port
    pub ws_port: u16,
    /// Allow any origin; otherwise only `allowed_origin`
    pub cors_permissive: bool,
    pub allowed_origin: String,
    pub tracker: TrackerConfig,
    pub ingest: IngestConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_port: 3000,
            ws_port: 9090,
            cors_permissive: true,
            allowed_origin: "http://localhost:8080".to_string(),
            tracker: TrackerConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `.env`, the config file and the environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let builder = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("FLEET")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::from_builder(builder).with_context(|| format!("loading configuration ({path})"))
    }

    /// Resolve a builder into a validated config
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.tracker.validate().context("invalid tracker configuration")?;
        self.ingest.validate().context("invalid ingest configuration")?;
        if self.api_port != 0 && self.api_port == self.ws_port {
            anyhow::bail!("api_port and ws_port must differ (both {})", self.api_port);
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> anyhow::Result<AppConfig> {
        AppConfig::from_builder(
            Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.tracker.online_threshold_ms, 60_000);
        assert_eq!(config.tracker.warning_threshold_ms, 300_000);
        assert_eq!(config.ingest.reconnect_delay_ms, 5_000);
    }

    #[test]
    fn test_file_overrides_nested_sections() {
        let config = from_toml(
            r#"
            api_port = 8000

            [tracker]
            warning_threshold_ms = 120000
            history_capacity = 50

            [ingest]
            url = "wss://feed.example.com/live"
            exponential_backoff = true
            "#,
        )
        .unwrap();

        assert_eq!(config.api_port, 8000);
        assert_eq!(config.ws_port, 9090);
        assert_eq!(config.tracker.warning_threshold_ms, 120_000);
        assert_eq!(config.tracker.history_capacity, 50);
        assert_eq!(config.tracker.online_threshold_ms, 60_000);
        assert_eq!(config.ingest.url, "wss://feed.example.com/live");
        assert!(config.ingest.exponential_backoff);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let err = from_toml(
            r#"
            [tracker]
            online_threshold_ms = 400000
            warning_threshold_ms = 300000
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("tracker"));
    }

    #[test]
    fn test_non_websocket_url_rejected() {
        assert!(from_toml("[ingest]\nurl = \"http://example.com\"").is_err());
    }

    #[test]
    fn test_port_clash_rejected() {
        assert!(from_toml("api_port = 9090").is_err());
    }
}
