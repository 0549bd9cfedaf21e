use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the shardscope reader.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Snapshot window timing and sizing.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Half-event ingest configuration.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Downstream view publication configuration.
    #[serde(default)]
    pub publish: PublishConfig,
}

/// Snapshot window timing and sizing. Constructed once at startup and passed
/// by reference; never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Width of one aggregation window. Default: 5s.
    #[serde(default = "default_sampling_interval", with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Open requests whose start is older than this are dropped at rollover
    /// instead of being carried forward. Default: 10m.
    #[serde(default = "default_expiry_horizon", with = "humantime_serde")]
    pub expiry_horizon: Duration,

    /// Upper bound on a closed buffer's lifetime: publication of its views
    /// is abandoned past this deadline. Default: 30s.
    #[serde(default = "default_rotation_interval", with = "humantime_serde")]
    pub rotation_interval: Duration,

    /// Row capacity of one window's event buffer; further input is dropped.
    /// Default: 1048576.
    #[serde(default = "default_max_buffer_rows")]
    pub max_buffer_rows: usize,
}

impl MetricsConfig {
    pub fn sampling_interval_ms(&self) -> i64 {
        self.sampling_interval.as_millis() as i64
    }

    pub fn expiry_horizon_ms(&self) -> i64 {
        self.expiry_horizon.as_millis() as i64
    }
}

/// Half-event ingest configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// NDJSON event source: a file path, or "-" for stdin. Default: "-".
    #[serde(default = "default_source")]
    pub source: String,

    /// Maximum events appended per batch. Default: 256.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Downstream view publication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Log each closed window's aggregate views. Default: true.
    #[serde(default = "default_true")]
    pub log: bool,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sampling_interval() -> Duration {
    Duration::from_millis(5_000)
}

fn default_expiry_horizon() -> Duration {
    Duration::from_millis(600_000)
}

fn default_rotation_interval() -> Duration {
    Duration::from_millis(30_000)
}

fn default_max_buffer_rows() -> usize {
    1_048_576
}

fn default_source() -> String {
    "-".to_string()
}

fn default_batch_size() -> usize {
    256
}

fn default_true() -> bool {
    true
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics: MetricsConfig::default(),
            ingest: IngestConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_interval(),
            expiry_horizon: default_expiry_horizon(),
            rotation_interval: default_rotation_interval(),
            max_buffer_rows: default_max_buffer_rows(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self { log: true }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.metrics.sampling_interval < Duration::from_millis(1) {
            bail!("metrics.sampling_interval must be at least 1ms");
        }

        if self.metrics.expiry_horizon < self.metrics.sampling_interval {
            bail!("metrics.expiry_horizon must not be shorter than the sampling interval");
        }

        if self.metrics.rotation_interval < self.metrics.sampling_interval {
            bail!("metrics.rotation_interval must not be shorter than the sampling interval");
        }

        if self.metrics.max_buffer_rows == 0 {
            bail!("metrics.max_buffer_rows must be positive");
        }

        if self.ingest.batch_size == 0 {
            bail!("ingest.batch_size must be positive");
        }

        if self.ingest.source.is_empty() {
            bail!("ingest.source is required (file path or \"-\" for stdin)");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.metrics.sampling_interval_ms(), 5_000);
        assert_eq!(cfg.metrics.expiry_horizon_ms(), 600_000);
        assert_eq!(cfg.metrics.rotation_interval, Duration::from_secs(30));
        assert_eq!(cfg.ingest.source, "-");
        assert!(cfg.publish.log);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_yaml_overrides() {
        let cfg: Config = serde_yaml::from_str(
            "metrics:\n  sampling_interval: 1s\n  max_buffer_rows: 64\ningest:\n  source: events.ndjson\n",
        )
        .expect("valid yaml");

        assert_eq!(cfg.metrics.sampling_interval, Duration::from_secs(1));
        assert_eq!(cfg.metrics.max_buffer_rows, 64);
        assert_eq!(cfg.ingest.source, "events.ndjson");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.metrics.expiry_horizon, Duration::from_secs(600));
    }

    #[test]
    fn test_validation_rejects_zero_buffer() {
        let mut cfg = Config::default();
        cfg.metrics.max_buffer_rows = 0;
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("max_buffer_rows"));
    }

    #[test]
    fn test_validation_rejects_short_expiry() {
        let mut cfg = Config::default();
        cfg.metrics.expiry_horizon = Duration::from_millis(100);
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("expiry_horizon"));
    }

    #[test]
    fn test_validation_rejects_empty_source() {
        let mut cfg = Config::default();
        cfg.ingest.source = String::new();
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("ingest.source"));
    }
}
