use tokio_util::sync::CancellationToken;

use tracelens_protocols::AnalyzerError;

/// A section together with the data-quality warnings raised while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerOutput<T> {
    pub section: T,
    /// Warnings without the category prefix.
    pub warnings: Vec<String>,
}

impl<T> AnalyzerOutput<T> {
    pub fn new(section: T, warnings: Vec<String>) -> Self {
        Self { section, warnings }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AnalyzerOutput<U> {
        AnalyzerOutput {
            section: f(self.section),
            warnings: self.warnings,
        }
    }
}

/// Bail out between actions once the run has been cancelled.
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<(), AnalyzerError> {
    if cancel.is_cancelled() {
        return Err(AnalyzerError::Cancelled);
    }
    Ok(())
}

/// `"3 action(s) <what>: a1, a2, a3"`.
pub(crate) fn summarize_actions(what: &str, ids: &[&str]) -> String {
    format!("{} action(s) {}: {}", ids.len(), what, ids.join(", "))
}
