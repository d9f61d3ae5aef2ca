//! Raw events recorded during an automation session.
//!
//! Every event carries a timestamp in milliseconds on one monotonic timeline.
//! Events are immutable once a trace has been loaded.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Viewport};

/// Milliseconds on the trace timeline.
pub type Millis = f64;

/// A recorded event of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// An automation step dispatched by the agent.
    Action(ActionEvent),
    /// DOM / element state captured around an action.
    DomSnapshot(DomSnapshotEvent),
    /// A captured screenshot.
    Screenshot(ScreenshotEvent),
    /// A network-conditions sample.
    Network(NetworkEvent),
}

/// Discriminant of a [`TraceEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Action,
    DomSnapshot,
    Screenshot,
    Network,
}

impl EventKind {
    /// Stream name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Action => "actions",
            EventKind::DomSnapshot => "snapshots",
            EventKind::Screenshot => "screenshots",
            EventKind::Network => "network",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TraceEvent {
    /// Timestamp of the event.
    pub fn timestamp(&self) -> Millis {
        match self {
            TraceEvent::Action(e) => e.timestamp,
            TraceEvent::DomSnapshot(e) => e.timestamp,
            TraceEvent::Screenshot(e) => e.timestamp,
            TraceEvent::Network(e) => e.timestamp,
        }
    }

    /// Kind of the event.
    pub fn kind(&self) -> EventKind {
        match self {
            TraceEvent::Action(_) => EventKind::Action,
            TraceEvent::DomSnapshot(_) => EventKind::DomSnapshot,
            TraceEvent::Screenshot(_) => EventKind::Screenshot,
            TraceEvent::Network(_) => EventKind::Network,
        }
    }

    /// Shift every timeline value carried by the event so that `origin` becomes zero.
    pub fn rebase(&mut self, origin: Millis) {
        match self {
            TraceEvent::Action(e) => {
                e.timestamp -= origin;
                if let Some(t) = e.markers.resolved_at.as_mut() {
                    *t -= origin;
                }
                if let Some(t) = e.markers.interaction_started_at.as_mut() {
                    *t -= origin;
                }
            }
            TraceEvent::DomSnapshot(e) => e.timestamp -= origin,
            TraceEvent::Screenshot(e) => {
                e.timestamp -= origin;
                if let Some(t) = e.settled_at.as_mut() {
                    *t -= origin;
                }
            }
            TraceEvent::Network(e) => e.timestamp -= origin,
        }
    }
}

/// Outcome of an action as recorded by the automation engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    #[default]
    Success,
    Failure {
        /// Error class name (e.g. `TimeoutError`).
        error_type: String,
        /// Human-readable error message.
        message: String,
    },
}

impl ActionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ActionOutcome::Failure { .. })
    }
}

/// Intermediate points reported by the engine while executing an action.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionMarkers {
    /// When the target element was resolved.
    #[serde(default)]
    pub resolved_at: Option<Millis>,
    /// When the interaction with the element started.
    #[serde(default)]
    pub interaction_started_at: Option<Millis>,
}

/// A single automation step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionEvent {
    pub id: String,
    pub timestamp: Millis,
    /// Action name, e.g. `click`, `navigate`, `fill`.
    pub action_kind: String,
    pub target_ref: Option<String>,
    /// Logical task step the action belongs to.
    pub step: Option<String>,
    pub duration_ms: Option<f64>,
    pub outcome: ActionOutcome,
    pub decision: Option<DecisionMetadata>,
    /// Retry policy declared for the step.
    pub retry_policy: Option<RetryPolicy>,
    pub markers: ActionMarkers,
}

impl ActionEvent {
    /// Create a successful action with no optional data.
    pub fn new(id: impl Into<String>, timestamp: Millis, action_kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            action_kind: action_kind.into(),
            target_ref: None,
            step: None,
            duration_ms: None,
            outcome: ActionOutcome::Success,
            decision: None,
            retry_policy: None,
            markers: ActionMarkers::default(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_ref = Some(target.into());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_failure(mut self, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        self.outcome = ActionOutcome::Failure {
            error_type: error_type.into(),
            message: message.into(),
        };
        self
    }

    pub fn with_decision(mut self, decision: DecisionMetadata) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_markers(mut self, markers: ActionMarkers) -> Self {
        self.markers = markers;
        self
    }

    /// End of the action on the timeline (start when no duration was recorded).
    pub fn end(&self) -> Millis {
        self.timestamp + self.duration_ms.unwrap_or(0.0).max(0.0)
    }
}

/// Decision data the agent attached to an action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionMetadata {
    /// Minimum confidence the agent required before acting.
    #[serde(default)]
    pub confidence_threshold: f64,
    /// Attention distribution over input features.
    #[serde(default)]
    pub attention_weights: BTreeMap<String, f64>,
    /// Rejected alternatives, most-considered first.
    #[serde(default)]
    pub alternative_paths: Vec<AlternativePath>,
    #[serde(default)]
    pub reasoning: Vec<String>,
    #[serde(default)]
    pub influential_features: Vec<String>,
}

/// An alternative the agent considered and rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativePath {
    pub action: String,
    #[serde(default)]
    pub rejected_reason: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Wait-time schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    None,
    Fixed,
    #[default]
    Exponential,
}

/// Retry policy declared for a task step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub backoff: BackoffKind,
    /// Delay before the first retry.
    pub base_delay_ms: f64,
    /// Exponential backoff multiplier.
    pub multiplier: f64,
    /// Cap applied to every computed wait.
    pub max_wait_ms: f64,
    /// Attempts after which an unresolved failure is exhausted.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffKind::Exponential,
            base_delay_ms: 1000.0,
            multiplier: 2.0,
            max_wait_ms: 30_000.0,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Expected wait before retry attempt `attempt` (1-based).
    pub fn expected_wait_ms(&self, attempt: u32) -> f64 {
        let wait = match self.backoff {
            BackoffKind::None => 0.0,
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                self.base_delay_ms * self.multiplier.powi(exponent)
            }
        };
        wait.min(self.max_wait_ms).max(0.0)
    }
}

/// Structural position of an element in the DOM.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Hierarchy {
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub siblings: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

/// A page landmark used to describe element position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub selector: String,
    pub bounds: BoundingBox,
}

/// DOM / element state captured at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DomSnapshotEvent {
    pub timestamp: Millis,
    pub target_ref: Option<String>,
    pub visible: bool,
    pub computed_styles: BTreeMap<String, String>,
    pub focus_state: Option<String>,
    pub aria: BTreeMap<String, String>,
    pub triggered_events: Vec<String>,
    pub bounds: Option<BoundingBox>,
    pub viewport: Option<Viewport>,
    pub hierarchy: Option<Hierarchy>,
    /// Alternative selectors for the element (css, xpath, aria, text).
    pub selectors: BTreeMap<String, String>,
    pub landmarks: Vec<Landmark>,
    pub performance_markers: BTreeMap<String, f64>,
    /// Page URL at capture time.
    pub url: Option<String>,
    /// Selectors of every element visible on the page at capture time.
    pub visible_elements: Vec<String>,
}

impl DomSnapshotEvent {
    pub fn new(timestamp: Millis, target_ref: Option<&str>) -> Self {
        Self {
            timestamp,
            target_ref: target_ref.map(str::to_string),
            visible: true,
            ..Default::default()
        }
    }
}

/// An element reported as moved between two frames.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutShiftEntry {
    pub selector: String,
    #[serde(default)]
    pub impact_fraction: Option<f64>,
    #[serde(default)]
    pub distance_fraction: Option<f64>,
    #[serde(default)]
    pub previous: Option<BoundingBox>,
    #[serde(default)]
    pub current: Option<BoundingBox>,
}

/// A captured screenshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenshotEvent {
    pub timestamp: Millis,
    /// Archive-relative path of the raster image.
    pub image_ref: String,
    /// When the page was observed to be visually stable.
    pub settled_at: Option<Millis>,
    /// Elements that moved since the previous frame.
    pub layout_shifts: Vec<LayoutShiftEntry>,
}

impl ScreenshotEvent {
    pub fn new(timestamp: Millis, image_ref: impl Into<String>) -> Self {
        Self {
            timestamp,
            image_ref: image_ref.into(),
            settled_at: None,
            layout_shifts: Vec::new(),
        }
    }
}

/// A network-conditions sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkEvent {
    pub timestamp: Millis,
    pub latency_ms: f64,
    /// Estimated bandwidth in Mbps.
    pub bandwidth_estimate: f64,
    /// Producer-defined stability label, e.g. `stable`.
    pub stability: String,
    /// Paint / navigation markers observed with this sample.
    pub markers: BTreeMap<String, f64>,
    /// Requests that failed since the previous sample.
    pub failed_requests: u32,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
