//! Derived records and report sections.
//!
//! Every section is optional in [`AnalysisReport`]; an absent section means the
//! analyzer failed or had nothing to analyze, never that the report is invalid.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::category::AnalysisCategory;
use crate::event::{
    AlternativePath, BackoffKind, DomSnapshotEvent, Hierarchy, Millis, RetryPolicy,
};
use crate::geometry::Viewport;

// ============================================================================
// Action context
// ============================================================================

/// A before/after pair of values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueChange<T> {
    pub before: T,
    pub after: T,
}

/// Differences between the element state before and after an action.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StateChanges {
    pub visibility: Option<ValueChange<bool>>,
    pub focus: Option<ValueChange<Option<String>>>,
    /// Computed-style properties added, removed or changed.
    pub styles_changed: Vec<String>,
    /// ARIA attributes added, removed or changed.
    pub aria_changed: Vec<String>,
    /// Events fired on the element, taken from the after state.
    pub triggered_events: Vec<String>,
}

impl StateChanges {
    pub fn is_empty(&self) -> bool {
        self.visibility.is_none()
            && self.focus.is_none()
            && self.styles_changed.is_empty()
            && self.aria_changed.is_empty()
            && self.triggered_events.is_empty()
    }
}

/// Element state around one action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionContext {
    pub action_id: String,
    pub action_kind: String,
    pub target_ref: Option<String>,
    pub state_before: DomSnapshotEvent,
    /// Absent when no snapshot was captured before the next action.
    pub state_after: Option<DomSnapshotEvent>,
    pub state_changes: Option<StateChanges>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ActionContextSection {
    pub viewport: Option<Viewport>,
    pub contexts: Vec<ActionContext>,
    pub actions_without_after_state: usize,
}

// ============================================================================
// Decision trail
// ============================================================================

/// Decision metadata recorded for one action, passed through unmodified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub action_id: String,
    pub action_kind: String,
    pub confidence_threshold: f64,
    pub attention_weights: BTreeMap<String, f64>,
    pub attention_sum: f64,
    pub alternative_paths: Vec<AlternativePath>,
    pub reasoning: Vec<String>,
    pub influential_features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DecisionTrailSection {
    pub decisions: Vec<DecisionRecord>,
    pub actions_without_decision: usize,
}

// ============================================================================
// Element identification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quadrant {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewportEdge {
    Top,
    Right,
    Bottom,
    Left,
}

/// Distance of an element from its nearest viewport edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EdgeOffset {
    pub edge: ViewportEdge,
    pub distance_px: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RelativePosition {
    pub from_reference_edge: EdgeOffset,
    pub quadrant: Quadrant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandmarkDistance {
    pub selector: String,
    pub distance_px: f64,
}

/// The element an action targeted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementIdentity {
    pub action_id: String,
    pub target_ref: Option<String>,
    pub relative_position: Option<RelativePosition>,
    pub hierarchy: Hierarchy,
    pub selectors: BTreeMap<String, String>,
    pub nearest_landmarks: Vec<LandmarkDistance>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ElementIdentificationSection {
    pub elements: Vec<ElementIdentity>,
}

// ============================================================================
// Visual state
// ============================================================================

/// Screenshot comparison around one action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualDiff {
    pub action_id: String,
    pub before_image_ref: Option<String>,
    pub after_image_ref: Option<String>,
    pub changed: bool,
    /// Fraction of differing pixels, when both images could be compared.
    pub diff_fraction: Option<f64>,
    pub layout_shift_delta: f64,
    /// Session layout shift accumulated up to and including this action.
    pub cumulative_layout_shift: f64,
    pub settled_at: Option<Millis>,
    pub moved_elements: Vec<String>,
    /// Present when the target was captured on both sides of the action.
    pub element_visibility: Option<ElementVisibility>,
}

/// Page elements visible before and after an action.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ElementVisibility {
    pub before: Vec<String>,
    pub after: Vec<String>,
    /// Visible after but not before, in `after` order.
    pub added: Vec<String>,
    /// Visible before but not after, in `before` order.
    pub removed: Vec<String>,
}

impl ElementVisibility {
    pub fn between(before: &[String], after: &[String]) -> Self {
        let added = after.iter().filter(|s| !before.contains(s)).cloned().collect();
        let removed = before.iter().filter(|s| !after.contains(s)).cloned().collect();
        Self {
            before: before.to_vec(),
            after: after.to_vec(),
            added,
            removed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct VisualStateSection {
    pub diffs: Vec<VisualDiff>,
    pub cumulative_layout_shift: f64,
}

// ============================================================================
// Error recovery
// ============================================================================

/// Network conditions observed when an attempt started.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkConditions {
    pub sampled_at: Millis,
    pub latency_ms: f64,
    pub bandwidth_estimate: f64,
    pub stability: String,
}

/// Session state at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EnvironmentSnapshot {
    pub network_conditions: Option<NetworkConditions>,
    pub url: Option<String>,
    pub viewport: Option<Viewport>,
    /// Any request failed at or before this instant.
    pub network_failure: bool,
}

/// One retry of a failed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryAttempt {
    pub failure_id: String,
    pub action_id: String,
    pub attempt_number: u32,
    pub backoff_kind: BackoffKind,
    /// Observed wait since the previous attempt ended.
    pub wait_before_ms: f64,
    /// Wait the declared policy prescribes.
    pub expected_wait_ms: f64,
    pub environment_snapshot: EnvironmentSnapshot,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeResolution {
    /// An attempt succeeded.
    Recovered,
    /// `max_attempts` attempts failed.
    Exhausted,
    /// The agent moved on before succeeding or exhausting the policy.
    Abandoned,
}

/// The element a failed action was aimed at.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TargetElement {
    pub selector: Option<String>,
    /// Visible elements that could have been mistaken for the target.
    pub visible_similar_elements: Vec<String>,
}

/// Consecutive failures of one task step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureEpisode {
    pub failure_id: String,
    pub step: Option<String>,
    pub error_type: String,
    pub message: String,
    pub target_element: TargetElement,
    /// Session state when the episode's first failure happened.
    pub environment_factors: EnvironmentSnapshot,
    pub policy: RetryPolicy,
    pub attempts: Vec<RecoveryAttempt>,
    pub resolution: EpisodeResolution,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecoverySection {
    pub episodes: Vec<FailureEpisode>,
    pub recovery_success_rate: f64,
    pub total_actions: usize,
    pub failed_actions: usize,
}

// ============================================================================
// Timing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingBreakdown {
    pub action_id: String,
    pub element_search_ms: f64,
    pub interaction_delay_ms: f64,
    pub animation_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TimingSummary {
    pub total_duration_ms: f64,
    pub average_action_duration_ms: Option<f64>,
    pub time_to_first_interaction_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TimingSection {
    pub breakdowns: Vec<TimingBreakdown>,
    /// Session markers; names that were never observed are omitted.
    pub performance_markers: BTreeMap<String, f64>,
    pub summary: TimingSummary,
}

// ============================================================================
// Report
// ============================================================================

/// Output of one analyzer.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisSection {
    ActionContext(ActionContextSection),
    DecisionTrail(DecisionTrailSection),
    ElementIdentification(ElementIdentificationSection),
    VisualState(VisualStateSection),
    ErrorRecovery(ErrorRecoverySection),
    Timing(TimingSection),
}

impl AnalysisSection {
    pub fn category(&self) -> AnalysisCategory {
        match self {
            AnalysisSection::ActionContext(_) => AnalysisCategory::ActionContext,
            AnalysisSection::DecisionTrail(_) => AnalysisCategory::DecisionTrail,
            AnalysisSection::ElementIdentification(_) => AnalysisCategory::ElementIdentification,
            AnalysisSection::VisualState(_) => AnalysisCategory::VisualState,
            AnalysisSection::ErrorRecovery(_) => AnalysisCategory::ErrorRecovery,
            AnalysisSection::Timing(_) => AnalysisCategory::Timing,
        }
    }
}

/// The structured report for one trace.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AnalysisReport {
    pub session_id: Option<String>,
    pub action_count: usize,
    pub action_context: Option<ActionContextSection>,
    pub decision_trail: Option<DecisionTrailSection>,
    pub element_identification: Option<ElementIdentificationSection>,
    pub visual_state: Option<VisualStateSection>,
    pub error_recovery: Option<ErrorRecoverySection>,
    pub timing: Option<TimingSection>,
    pub warnings: Vec<String>,
}

impl AnalysisReport {
    /// Place a section into its slot, replacing any previous value.
    pub fn set_section(&mut self, section: AnalysisSection) {
        match section {
            AnalysisSection::ActionContext(s) => self.action_context = Some(s),
            AnalysisSection::DecisionTrail(s) => self.decision_trail = Some(s),
            AnalysisSection::ElementIdentification(s) => self.element_identification = Some(s),
            AnalysisSection::VisualState(s) => self.visual_state = Some(s),
            AnalysisSection::ErrorRecovery(s) => self.error_recovery = Some(s),
            AnalysisSection::Timing(s) => self.timing = Some(s),
        }
    }

    /// Whether the section for `category` is present.
    pub fn has_section(&self, category: AnalysisCategory) -> bool {
        match category {
            AnalysisCategory::ActionContext => self.action_context.is_some(),
            AnalysisCategory::DecisionTrail => self.decision_trail.is_some(),
            AnalysisCategory::ElementIdentification => self.element_identification.is_some(),
            AnalysisCategory::VisualState => self.visual_state.is_some(),
            AnalysisCategory::ErrorRecovery => self.error_recovery.is_some(),
            AnalysisCategory::Timing => self.timing.is_some(),
        }
    }

    /// Warnings mentioning `category`.
    pub fn warnings_for(&self, category: AnalysisCategory) -> impl Iterator<Item = &String> {
        let name = category.as_str();
        self.warnings
            .iter()
            .filter(move |w| w.strip_prefix(name).is_some_and(|rest| rest.starts_with(": ")))
    }

    /// Serialise the report as JSON.
    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }

    /// JSON value of a single section (`null` when absent).
    pub fn section_json(
        &self,
        category: AnalysisCategory,
    ) -> Result<serde_json::Value, serde_json::Error> {
        match category {
            AnalysisCategory::ActionContext => serde_json::to_value(&self.action_context),
            AnalysisCategory::DecisionTrail => serde_json::to_value(&self.decision_trail),
            AnalysisCategory::ElementIdentification => {
                serde_json::to_value(&self.element_identification)
            }
            AnalysisCategory::VisualState => serde_json::to_value(&self.visual_state),
            AnalysisCategory::ErrorRecovery => serde_json::to_value(&self.error_recovery),
            AnalysisCategory::Timing => serde_json::to_value(&self.timing),
        }
    }
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
