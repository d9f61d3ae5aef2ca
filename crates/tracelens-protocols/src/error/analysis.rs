//! Analyzer errors.

use thiserror::Error;

/// Failure of a single analyzer; scoped to its category.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyzerError {
    /// The trace lacks data the analyzer cannot do without.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Analysis was cancelled before completion.
    #[error("Cancelled")]
    Cancelled,

    /// The analyzer task panicked.
    #[error("Analyzer panicked: {0}")]
    Panicked(String),

    /// Generic failure.
    #[error("{0}")]
    Failed(String),
}

/// Failure of a whole `analyze_all` run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// The caller cancelled the run; outstanding analyzers were stopped.
    #[error("Analysis cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyzer_error_display() {
        let err = AnalyzerError::InvalidInput("no screenshots".to_string());
        assert_eq!(err.to_string(), "Invalid input: no screenshots");
        assert_eq!(AnalyzerError::Failed("boom".to_string()).to_string(), "boom");
    }

    #[test]
    fn test_analysis_error_display() {
        assert_eq!(AnalysisError::Cancelled.to_string(), "Analysis cancelled");
    }
}
