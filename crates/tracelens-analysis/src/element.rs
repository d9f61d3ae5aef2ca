//! Element identification: where the targeted element sat and what surrounded it.

use tokio_util::sync::CancellationToken;

use tracelens_config::AnalysisOptions;
use tracelens_protocols::{
    ActionEvent, AnalyzerError, BoundingBox, DomSnapshotEvent, EdgeOffset, ElementIdentificationSection,
    ElementIdentity, Hierarchy, LandmarkDistance, NormalizedTrace, Quadrant, RelativePosition,
    Viewport, ViewportEdge,
};

use crate::output::{AnalyzerOutput, check_cancelled, summarize_actions};
use crate::timeline::SnapshotIndex;

/// Landmarks reported per element.
const MAX_LANDMARKS: usize = 3;

/// Resolve the targeted element of every action from the snapshot preceding it.
pub fn analyze(
    trace: &NormalizedTrace,
    _options: &AnalysisOptions,
    cancel: &CancellationToken,
) -> Result<AnalyzerOutput<ElementIdentificationSection>, AnalyzerError> {
    let index = SnapshotIndex::new(trace.snapshots());
    let mut section = ElementIdentificationSection::default();
    let mut without_snapshot = Vec::new();

    for action in trace.actions() {
        check_cancelled(cancel)?;
        let target = action.target_ref.as_deref();

        let identity = match index.before(target, action.timestamp) {
            Some(snapshot) => identify(action, snapshot, trace.viewport()),
            None => {
                without_snapshot.push(action.id.as_str());
                ElementIdentity {
                    action_id: action.id.clone(),
                    target_ref: action.target_ref.clone(),
                    relative_position: None,
                    hierarchy: Hierarchy::default(),
                    selectors: Default::default(),
                    nearest_landmarks: Vec::new(),
                }
            }
        };
        section.elements.push(identity);
    }

    let mut warnings = Vec::new();
    if !without_snapshot.is_empty() {
        warnings.push(summarize_actions(
            "without a DOM snapshot to identify the element",
            &without_snapshot,
        ));
    }
    Ok(AnalyzerOutput::new(section, warnings))
}

fn identify(
    action: &ActionEvent,
    snapshot: &DomSnapshotEvent,
    session_viewport: Option<&Viewport>,
) -> ElementIdentity {
    let viewport = snapshot.viewport.as_ref().or(session_viewport);
    let relative_position = match (snapshot.bounds.as_ref(), viewport) {
        (Some(bounds), Some(viewport)) => relative_position(bounds, viewport),
        _ => None,
    };

    let nearest_landmarks = match &snapshot.bounds {
        Some(bounds) => nearest_landmarks(snapshot, bounds, action.target_ref.as_deref()),
        None => Vec::new(),
    };

    ElementIdentity {
        action_id: action.id.clone(),
        target_ref: action.target_ref.clone(),
        relative_position,
        hierarchy: snapshot.hierarchy.clone().unwrap_or_default(),
        selectors: snapshot.selectors.clone(),
        nearest_landmarks,
    }
}

/// Quadrant of the element centre and its nearest viewport edge.
pub fn relative_position(bounds: &BoundingBox, viewport: &Viewport) -> Option<RelativePosition> {
    if viewport.is_empty() {
        return None;
    }
    let width = f64::from(viewport.width);
    let height = f64::from(viewport.height);
    let (cx, cy) = bounds.center();

    let quadrant = match (cy < height / 2.0, cx < width / 2.0) {
        (true, true) => Quadrant::TopLeft,
        (true, false) => Quadrant::TopRight,
        (false, true) => Quadrant::BottomLeft,
        (false, false) => Quadrant::BottomRight,
    };

    // Ties resolve in the order listed.
    let edges = [
        (ViewportEdge::Top, bounds.y),
        (ViewportEdge::Right, width - (bounds.x + bounds.width)),
        (ViewportEdge::Bottom, height - (bounds.y + bounds.height)),
        (ViewportEdge::Left, bounds.x),
    ];
    let (edge, distance_px) = edges
        .into_iter()
        .reduce(|best, next| if next.1 < best.1 { next } else { best })?;

    Some(RelativePosition {
        from_reference_edge: EdgeOffset { edge, distance_px },
        quadrant,
    })
}

fn nearest_landmarks(
    snapshot: &DomSnapshotEvent,
    bounds: &BoundingBox,
    target: Option<&str>,
) -> Vec<LandmarkDistance> {
    let mut landmarks: Vec<LandmarkDistance> = snapshot
        .landmarks
        .iter()
        .filter(|l| Some(l.selector.as_str()) != target)
        .map(|l| LandmarkDistance {
            selector: l.selector.clone(),
            distance_px: bounds.center_distance(&l.bounds),
        })
        .collect();
    landmarks.sort_by(|a, b| {
        a.distance_px
            .total_cmp(&b.distance_px)
            .then_with(|| a.selector.cmp(&b.selector))
    });
    landmarks.truncate(MAX_LANDMARKS);
    landmarks
}

#[cfg(test)]
#[path = "element_tests.rs"]
mod tests;
