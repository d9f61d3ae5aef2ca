//! On-disk record formats.
//!
//! These mirror the JSON written by the trace recorder and are converted into
//! the event model by the loader. Unknown fields are ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use tracelens_protocols::{
    BoundingBox, DecisionMetadata, Hierarchy, Landmark, LayoutShiftEntry, RetryPolicy, Viewport,
};

/// A timestamp written either as epoch milliseconds or as an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawTimestamp {
    Millis(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawManifest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub url: Option<String>,
    pub actions: Vec<RawAction>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RawOutcome {
    #[default]
    Success,
    Failure,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawError {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawMarkers {
    #[serde(default)]
    pub resolved_at: Option<RawTimestamp>,
    #[serde(default)]
    pub interaction_started_at: Option<RawTimestamp>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawAction {
    pub id: String,
    pub timestamp: RawTimestamp,
    pub kind: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub outcome: RawOutcome,
    #[serde(default)]
    pub error: Option<RawError>,
    #[serde(default)]
    pub decision: Option<DecisionMetadata>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub markers: Option<RawMarkers>,
    #[serde(default)]
    pub snapshots: Vec<String>,
    #[serde(default)]
    pub screenshots: Vec<RawScreenshotRef>,
    #[serde(default)]
    pub network: Vec<String>,
}

/// A screenshot referenced from an action: a bare path or an inline record.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawScreenshotRef {
    Path(String),
    Record(RawScreenshot),
}

impl RawScreenshotRef {
    pub fn path(&self) -> &str {
        match self {
            RawScreenshotRef::Path(p) => p,
            RawScreenshotRef::Record(r) => &r.path,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawScreenshot {
    pub path: String,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub settled_at: Option<RawTimestamp>,
    #[serde(default)]
    pub layout_shifts: Vec<LayoutShiftEntry>,
}

/// Metadata stored next to a screenshot as `<path>.json`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawScreenshotSidecar {
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub settled_at: Option<RawTimestamp>,
    #[serde(default)]
    pub layout_shifts: Vec<LayoutShiftEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSnapshot {
    pub timestamp: RawTimestamp,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default, deserialize_with = "scalar_map")]
    pub computed_styles: BTreeMap<String, String>,
    #[serde(default)]
    pub focus_state: Option<String>,
    #[serde(default, alias = "accessibility", deserialize_with = "scalar_map")]
    pub aria: BTreeMap<String, String>,
    #[serde(default)]
    pub triggered_events: Vec<String>,
    #[serde(default)]
    pub bounds: Option<BoundingBox>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub hierarchy: Option<Hierarchy>,
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
    #[serde(default)]
    pub performance_markers: BTreeMap<String, f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub visible_elements: Vec<String>,
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawNetworkSample {
    pub timestamp: RawTimestamp,
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub bandwidth_estimate: f64,
    #[serde(default = "default_stability")]
    pub stability: String,
    #[serde(default)]
    pub markers: BTreeMap<String, f64>,
    #[serde(default)]
    pub failed_requests: u32,
    /// Individual requests finished since the previous sample.
    #[serde(default)]
    pub requests: Vec<RawRequest>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRequest {
    /// HTTP status; absent when no response arrived.
    #[serde(default)]
    pub status: Option<u16>,
}

impl RawRequest {
    pub fn failed(&self) -> bool {
        self.status.is_none_or(|status| status >= 400)
    }
}

impl RawNetworkSample {
    /// Reported failure count plus failed entries in `requests`.
    pub fn failure_count(&self) -> u32 {
        let listed = self.requests.iter().filter(|r| r.failed()).count();
        self.failed_requests
            .saturating_add(u32::try_from(listed).unwrap_or(u32::MAX))
    }
}

fn default_stability() -> String {
    "unknown".to_string()
}

/// A network record file holds one sample or an array of samples.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

/// Accept string, number and boolean values, rendering non-strings as JSON text.
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}
