//! Configuration schema definitions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracelens_protocols::RetryPolicy;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisOptions,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Options passed explicitly into every analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Fraction of differing pixels above which a screenshot pair counts as changed.
    #[serde(default = "default_diff_threshold")]
    pub diff_threshold: f64,

    /// Per-channel difference tolerated before a pixel counts as differing.
    #[serde(default)]
    pub pixel_tolerance: u8,

    /// Relative deviation from the expected backoff curve before drift is reported.
    #[serde(default = "default_backoff_tolerance")]
    pub backoff_tolerance: f64,

    /// Allowed deviation of an attention distribution's sum from 1.0.
    #[serde(default = "default_attention_tolerance")]
    pub attention_tolerance: f64,

    /// Deadline for a whole run. Direct analyzer calls apply it to the join alone.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Maximum analyzers running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Policy assumed for steps that declare none.
    #[serde(default)]
    pub default_retry_policy: RetryPolicy,
}

fn default_diff_threshold() -> f64 {
    0.01
}

fn default_backoff_tolerance() -> f64 {
    0.2
}

fn default_attention_tolerance() -> f64 {
    1e-3
}

fn default_max_concurrency() -> usize {
    6
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            diff_threshold: default_diff_threshold(),
            pixel_tolerance: 0,
            backoff_tolerance: default_backoff_tolerance(),
            attention_tolerance: default_attention_tolerance(),
            timeout_ms: None,
            max_concurrency: default_max_concurrency(),
            default_retry_policy: RetryPolicy::default(),
        }
    }
}

impl AnalysisOptions {
    /// Caller-supplied deadline, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_diff_threshold(mut self, threshold: f64) -> Self {
        self.diff_threshold = threshold;
        self
    }

    pub fn with_backoff_tolerance(mut self, tolerance: f64) -> Self {
        self.backoff_tolerance = tolerance;
        self
    }

    pub fn with_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry_policy = policy;
        self
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,

    /// Also write daily-rotated log files.
    #[serde(default)]
    pub file_logging: bool,

    /// Directory for log files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".tracelens").join("logs"))
        .unwrap_or_else(|| PathBuf::from("/tmp/tracelens/logs"))
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging: false,
            log_dir: default_log_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracelens_protocols::BackoffKind;

    #[test]
    fn test_analysis_defaults() {
        let options = AnalysisOptions::default();
        assert_eq!(options.diff_threshold, 0.01);
        assert_eq!(options.backoff_tolerance, 0.2);
        assert_eq!(options.attention_tolerance, 1e-3);
        assert_eq!(options.max_concurrency, 6);
        assert!(options.timeout().is_none());
        assert_eq!(options.default_retry_policy.backoff, BackoffKind::Exponential);
    }

    #[test]
    fn test_with_timeout() {
        let options = AnalysisOptions::default().with_timeout(Duration::from_secs(2));
        assert_eq!(options.timeout_ms, Some(2000));
        assert_eq!(options.timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert!(!logging.file_logging);
        assert!(logging.log_dir.ends_with("logs"));
    }
}
