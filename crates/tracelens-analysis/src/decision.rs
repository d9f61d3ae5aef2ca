//! Decision trail: the agent's own decision metadata, passed through.

use tokio_util::sync::CancellationToken;

use tracelens_config::AnalysisOptions;
use tracelens_protocols::{
    AnalyzerError, DecisionRecord, DecisionTrailSection, NormalizedTrace,
};

use crate::output::{AnalyzerOutput, check_cancelled};

/// Collect decision metadata attached to actions.
///
/// Attention weights are never renormalised; a distribution that does not
/// sum to 1 within `attention_tolerance` is reported as a warning.
pub fn analyze(
    trace: &NormalizedTrace,
    options: &AnalysisOptions,
    cancel: &CancellationToken,
) -> Result<AnalyzerOutput<DecisionTrailSection>, AnalyzerError> {
    let mut section = DecisionTrailSection::default();
    let mut warnings = Vec::new();

    for action in trace.actions() {
        check_cancelled(cancel)?;
        let Some(decision) = &action.decision else {
            section.actions_without_decision += 1;
            continue;
        };

        let attention_sum: f64 = decision.attention_weights.values().sum();
        if (attention_sum - 1.0).abs() > options.attention_tolerance {
            warnings.push(format!(
                "action {} attention weights sum to {:.3}",
                action.id, attention_sum
            ));
        }

        let negative: Vec<&str> = decision
            .attention_weights
            .iter()
            .filter(|(_, w)| **w < 0.0)
            .map(|(k, _)| k.as_str())
            .collect();
        if !negative.is_empty() {
            warnings.push(format!(
                "action {} has negative attention weights: {}",
                action.id,
                negative.join(", ")
            ));
        }

        if !(0.0..=1.0).contains(&decision.confidence_threshold) {
            warnings.push(format!(
                "action {} confidence threshold {} outside [0, 1]",
                action.id, decision.confidence_threshold
            ));
        }

        section.decisions.push(DecisionRecord {
            action_id: action.id.clone(),
            action_kind: action.action_kind.clone(),
            confidence_threshold: decision.confidence_threshold,
            attention_weights: decision.attention_weights.clone(),
            attention_sum,
            alternative_paths: decision.alternative_paths.clone(),
            reasoning: decision.reasoning.clone(),
            influential_features: decision.influential_features.clone(),
        });
    }

    Ok(AnalyzerOutput::new(section, warnings))
}
