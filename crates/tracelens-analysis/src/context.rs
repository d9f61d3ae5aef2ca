//! Action context: element state before and after each action.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use tracelens_config::AnalysisOptions;
use tracelens_protocols::{
    ActionContext, ActionContextSection, AnalyzerError, DomSnapshotEvent, NormalizedTrace,
    StateChanges, ValueChange,
};

use crate::output::{AnalyzerOutput, check_cancelled, summarize_actions};
use crate::timeline::SnapshotIndex;

/// Pair every action with its surrounding DOM snapshots.
///
/// `state_before` is the latest snapshot before the action, `state_after` the
/// earliest one after it and before the next action. Target-matching
/// snapshots are preferred over snapshots of any element.
pub fn analyze(
    trace: &NormalizedTrace,
    _options: &AnalysisOptions,
    cancel: &CancellationToken,
) -> Result<AnalyzerOutput<ActionContextSection>, AnalyzerError> {
    let index = SnapshotIndex::new(trace.snapshots());
    let mut section = ActionContextSection {
        viewport: trace.viewport().copied(),
        ..Default::default()
    };
    let mut without_before = Vec::new();

    for (i, action) in trace.actions().iter().enumerate() {
        check_cancelled(cancel)?;
        let target = action.target_ref.as_deref();

        let Some(before) = index.before(target, action.timestamp) else {
            without_before.push(action.id.as_str());
            continue;
        };
        let after = index.after(target, action.timestamp, trace.next_action_timestamp(i));
        if after.is_none() {
            section.actions_without_after_state += 1;
        }

        section.contexts.push(ActionContext {
            action_id: action.id.clone(),
            action_kind: action.action_kind.clone(),
            target_ref: action.target_ref.clone(),
            state_before: before.clone(),
            state_after: after.cloned(),
            state_changes: after.map(|after| state_changes(before, after)),
        });
    }

    let mut warnings = Vec::new();
    if !without_before.is_empty() {
        warnings.push(summarize_actions(
            "without a preceding DOM snapshot",
            &without_before,
        ));
    }
    Ok(AnalyzerOutput::new(section, warnings))
}

/// Differences between two element states.
pub fn state_changes(before: &DomSnapshotEvent, after: &DomSnapshotEvent) -> StateChanges {
    StateChanges {
        visibility: (before.visible != after.visible).then_some(ValueChange {
            before: before.visible,
            after: after.visible,
        }),
        focus: (before.focus_state != after.focus_state).then(|| ValueChange {
            before: before.focus_state.clone(),
            after: after.focus_state.clone(),
        }),
        styles_changed: changed_keys(&before.computed_styles, &after.computed_styles),
        aria_changed: changed_keys(&before.aria, &after.aria),
        triggered_events: after.triggered_events.clone(),
    }
}

/// Keys added, removed or changed between two maps, in key order.
fn changed_keys(before: &BTreeMap<String, String>, after: &BTreeMap<String, String>) -> Vec<String> {
    let mut keys: Vec<String> = before
        .iter()
        .filter(|(k, v)| after.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    keys.extend(
        after
            .keys()
            .filter(|k| !before.contains_key(*k))
            .cloned(),
    );
    keys.sort();
    keys
}
