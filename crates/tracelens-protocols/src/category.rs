//! Analysis categories.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One analytical dimension of the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisCategory {
    ActionContext,
    DecisionTrail,
    ElementIdentification,
    VisualState,
    ErrorRecovery,
    Timing,
}

impl AnalysisCategory {
    /// All categories in report order.
    pub const ALL: [AnalysisCategory; 6] = [
        AnalysisCategory::ActionContext,
        AnalysisCategory::DecisionTrail,
        AnalysisCategory::ElementIdentification,
        AnalysisCategory::VisualState,
        AnalysisCategory::ErrorRecovery,
        AnalysisCategory::Timing,
    ];

    /// Report key of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisCategory::ActionContext => "action_context",
            AnalysisCategory::DecisionTrail => "decision_trail",
            AnalysisCategory::ElementIdentification => "element_identification",
            AnalysisCategory::VisualState => "visual_state",
            AnalysisCategory::ErrorRecovery => "error_recovery",
            AnalysisCategory::Timing => "timing",
        }
    }

    /// Position in [`AnalysisCategory::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Parse a report key.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for AnalysisCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_order() {
        for (i, category) in AnalysisCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        assert_eq!(
            AnalysisCategory::parse("visual_state"),
            Some(AnalysisCategory::VisualState)
        );
        assert_eq!(AnalysisCategory::parse("performance"), None);
    }

    #[test]
    fn test_serde_name() {
        let json = serde_json::to_string(&AnalysisCategory::ErrorRecovery).unwrap();
        assert_eq!(json, "\"error_recovery\"");
    }
}
