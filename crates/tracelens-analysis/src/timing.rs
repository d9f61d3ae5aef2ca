//! Timing: per-action breakdown and session performance markers.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use tracelens_config::AnalysisOptions;
use tracelens_protocols::{
    ActionEvent, AnalyzerError, NormalizedTrace, TimingBreakdown, TimingSection, TimingSummary,
};

use crate::output::{AnalyzerOutput, check_cancelled};
use crate::timeline::earliest_within;

/// Action kinds that count as a user-facing interaction.
const INTERACTION_KINDS: [&str; 3] = ["click", "fill", "type"];

/// Break every action into search, interaction delay and animation time.
pub fn analyze(
    trace: &NormalizedTrace,
    _options: &AnalysisOptions,
    cancel: &CancellationToken,
) -> Result<AnalyzerOutput<TimingSection>, AnalyzerError> {
    let mut breakdowns = Vec::with_capacity(trace.actions().len());

    for (i, action) in trace.actions().iter().enumerate() {
        check_cancelled(cancel)?;
        let resolved = action.markers.resolved_at.unwrap_or(action.timestamp);
        let interaction = action.markers.interaction_started_at.unwrap_or(resolved);

        let settled = earliest_within(
            trace.screenshots(),
            action.timestamp,
            trace.next_action_timestamp(i),
            |s| s.timestamp,
        )
        .and_then(|s| s.settled_at);

        breakdowns.push(TimingBreakdown {
            action_id: action.id.clone(),
            element_search_ms: (resolved - action.timestamp).max(0.0),
            interaction_delay_ms: (interaction - resolved).max(0.0),
            animation_duration_ms: settled.map_or(0.0, |s| (s - interaction).max(0.0)),
        });
    }

    let section = TimingSection {
        breakdowns,
        performance_markers: performance_markers(trace),
        summary: summary(trace.actions()),
    };
    Ok(AnalyzerOutput::new(section, Vec::new()))
}

/// Earliest value of every marker seen in network samples and DOM snapshots.
fn performance_markers(trace: &NormalizedTrace) -> BTreeMap<String, f64> {
    let mut markers: BTreeMap<String, f64> = BTreeMap::new();
    let sources = trace
        .network()
        .iter()
        .map(|n| &n.markers)
        .chain(trace.snapshots().iter().map(|s| &s.performance_markers));

    for source in sources {
        for (name, &value) in source {
            if !value.is_finite() {
                continue;
            }
            markers
                .entry(name.clone())
                .and_modify(|v| *v = v.min(value))
                .or_insert(value);
        }
    }
    markers
}

fn summary(actions: &[ActionEvent]) -> TimingSummary {
    let durations: Vec<f64> = actions.iter().filter_map(|a| a.duration_ms).collect();
    let total_duration_ms: f64 = durations.iter().sum();
    let average_action_duration_ms =
        (!durations.is_empty()).then(|| total_duration_ms / durations.len() as f64);

    let start = actions.first().map_or(0.0, |a| a.timestamp);
    let time_to_first_interaction_ms = actions
        .iter()
        .find(|a| INTERACTION_KINDS.contains(&a.action_kind.as_str()))
        .map(|a| a.timestamp - start);

    TimingSummary {
        total_duration_ms,
        average_action_duration_ms,
        time_to_first_interaction_ms,
    }
}
