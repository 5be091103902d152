//! Configuration for the workflow engine

use serde::{Deserialize, Serialize};
use std::time::Duration;
use workflow_types::RiskLevel;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Overall run deadline in seconds
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,

    /// How long an approval gate stays open, in seconds
    #[serde(default = "default_approval_timeout")]
    pub default_approval_timeout_secs: u64,

    /// Persist every event to the event log
    #[serde(default = "default_true")]
    pub enable_event_logging: bool,

    /// Minimum classified risk that raises an approval gate
    #[serde(default = "default_threshold")]
    pub approval_threshold: RiskLevel,

    /// Capacity of the cross-run event broadcast channel
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Per-stage execution settings
    #[serde(default)]
    pub stage: StageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 300,
            default_approval_timeout_secs: 3600,
            enable_event_logging: true,
            approval_threshold: RiskLevel::High,
            broadcast_capacity: 1024,
            stage: StageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from defaults, an optional file, and
    /// `WORKFLOW_`-prefixed environment variables, in that order.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&OrchestratorConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WORKFLOW")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn default_approval_timeout(&self) -> Duration {
        Duration::from_secs(self.default_approval_timeout_secs)
    }
}

/// Per-stage execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Deadline for a single stage attempt; unbounded when unset
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Attempts per stage, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            max_attempts: 1,
            retry_delay_ms: 500,
        }
    }
}

impl StageConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    300
}

fn default_approval_timeout() -> u64 {
    3600
}

fn default_threshold() -> RiskLevel {
    RiskLevel::High
}

fn default_broadcast_capacity() -> usize {
    1024
}

fn default_max_attempts() -> u32 {
    1
}

fn default_retry_delay() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(300));
        assert_eq!(config.default_approval_timeout(), Duration::from_secs(3600));
        assert!(config.enable_event_logging);
        assert_eq!(config.approval_threshold, RiskLevel::High);
        assert_eq!(config.stage.max_attempts, 1);
        assert!(config.stage.timeout().is_none());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: OrchestratorConfig = serde_json::from_value(serde_json::json!({
            "default_timeout_secs": 30,
            "approval_threshold": "medium",
            "stage": { "max_attempts": 3 }
        }))
        .unwrap();
        assert_eq!(config.default_timeout_secs, 30);
        assert_eq!(config.default_approval_timeout_secs, 3600);
        assert_eq!(config.approval_threshold, RiskLevel::Medium);
        assert_eq!(config.stage.max_attempts, 3);
        assert_eq!(config.stage.retry_delay(), Duration::from_millis(500));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = OrchestratorConfig::load(None).unwrap();
        assert_eq!(config.default_timeout_secs, 300);
        assert!(config.enable_event_logging);
    }
}
