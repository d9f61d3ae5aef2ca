//! Configuration validation.

use tracelens_protocols::BackoffKind;

use crate::schema::{AnalysisOptions, Config};

/// Number of analyzers the engine can run concurrently.
const ANALYZER_COUNT: usize = 6;

/// Timeouts above this are almost certainly a unit mistake.
const LONG_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the whole configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();
        Self::validate_analysis(&config.analysis, &mut result);
        Self::validate_logging(config, &mut result);
        result
    }

    /// Validate analysis options on their own (e.g. after CLI overrides).
    pub fn validate_options(options: &AnalysisOptions) -> ValidationResult {
        let mut result = ValidationResult::default();
        Self::validate_analysis(options, &mut result);
        result
    }

    fn validate_analysis(options: &AnalysisOptions, result: &mut ValidationResult) {
        if !(0.0..=1.0).contains(&options.diff_threshold) {
            result.add_error(ValidationError::new(
                "analysis.diff_threshold",
                "diff_threshold must be within [0, 1]",
            ));
        }

        if !options.backoff_tolerance.is_finite() || options.backoff_tolerance < 0.0 {
            result.add_error(ValidationError::new(
                "analysis.backoff_tolerance",
                "backoff_tolerance must be a non-negative number",
            ));
        }

        if !options.attention_tolerance.is_finite() || options.attention_tolerance < 0.0 {
            result.add_error(ValidationError::new(
                "analysis.attention_tolerance",
                "attention_tolerance must be a non-negative number",
            ));
        }

        if options.max_concurrency == 0 {
            result.add_error(ValidationError::new(
                "analysis.max_concurrency",
                "max_concurrency must be greater than 0",
            ));
        } else if options.max_concurrency > ANALYZER_COUNT {
            result.add_warning(ValidationWarning::new(
                "analysis.max_concurrency",
                format!(
                    "max_concurrency {} exceeds the {} analyzers; extra permits are unused",
                    options.max_concurrency, ANALYZER_COUNT
                ),
            ));
        }

        match options.timeout_ms {
            Some(0) => result.add_error(ValidationError::new(
                "analysis.timeout_ms",
                "timeout_ms must be greater than 0",
            )),
            Some(ms) if ms > LONG_TIMEOUT_MS => result.add_warning(ValidationWarning::new(
                "analysis.timeout_ms",
                format!("timeout_ms {} is very high (>10 minutes)", ms),
            )),
            _ => {}
        }

        let policy = &options.default_retry_policy;
        if policy.max_attempts == 0 {
            result.add_error(ValidationError::new(
                "analysis.default_retry_policy.max_attempts",
                "max_attempts must be greater than 0",
            ));
        }
        if policy.base_delay_ms < 0.0 || policy.max_wait_ms < 0.0 {
            result.add_error(ValidationError::new(
                "analysis.default_retry_policy",
                "delays must not be negative",
            ));
        }
        if policy.backoff == BackoffKind::Exponential && policy.multiplier <= 0.0 {
            result.add_error(ValidationError::new(
                "analysis.default_retry_policy.multiplier",
                "multiplier must be greater than 0 for exponential backoff",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!(
                    "Unknown log level '{}', valid values: {:?}",
                    config.logging.level, valid_levels
                ),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
