//! Visual state: screenshot diffs and cumulative layout shift.

use std::collections::HashMap;

use image::RgbaImage;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tracelens_config::AnalysisOptions;
use tracelens_protocols::{
    AnalyzerError, DomSnapshotEvent, ElementVisibility, LayoutShiftEntry, NormalizedTrace,
    ScreenshotEvent, ScreenshotStore, Viewport, VisualDiff, VisualStateSection,
};

use crate::output::{AnalyzerOutput, check_cancelled, summarize_actions};
use crate::timeline::{SnapshotIndex, earliest_within, latest_before};

/// Diff the screenshots around every action and accumulate layout shift.
///
/// The before screenshot is the latest one at or before the action, the after
/// screenshot the earliest one strictly between the action and the next. The
/// session shift only ever grows: each action adds its own delta to the
/// running total. Page visibility is compared between the DOM snapshots on
/// either side of the action.
pub fn analyze(
    trace: &NormalizedTrace,
    options: &AnalysisOptions,
    cancel: &CancellationToken,
) -> Result<AnalyzerOutput<VisualStateSection>, AnalyzerError> {
    let shots = trace.screenshots();
    let snapshots = SnapshotIndex::new(trace.snapshots());
    let mut decoded = DecodedImages::new(trace.images());
    let mut section = VisualStateSection::default();
    let mut warnings = Vec::new();
    let mut missing = Vec::new();
    let mut cumulative = 0.0;

    for (i, action) in trace.actions().iter().enumerate() {
        check_cancelled(cancel)?;
        let before = latest_before(shots, action.timestamp, true, |s| s.timestamp);
        let after = earliest_within(
            shots,
            action.timestamp,
            trace.next_action_timestamp(i),
            |s| s.timestamp,
        );

        let mut diff = VisualDiff {
            action_id: action.id.clone(),
            before_image_ref: before.map(|s| s.image_ref.clone()),
            after_image_ref: after.map(|s| s.image_ref.clone()),
            changed: false,
            diff_fraction: None,
            layout_shift_delta: 0.0,
            cumulative_layout_shift: 0.0,
            settled_at: after.and_then(|s| s.settled_at),
            moved_elements: Vec::new(),
            element_visibility: element_visibility(
                snapshots.before(action.target_ref.as_deref(), action.timestamp),
                snapshots.after(
                    action.target_ref.as_deref(),
                    action.timestamp,
                    trace.next_action_timestamp(i),
                ),
            ),
        };

        match (before, after) {
            (Some(before), Some(after)) => {
                match decoded.compare(&before.image_ref, &after.image_ref, options.pixel_tolerance) {
                    Some(fraction) => {
                        diff.diff_fraction = Some(fraction);
                        diff.changed = fraction > options.diff_threshold;
                        // Shifts only count for a pair that could be compared.
                        diff.layout_shift_delta =
                            layout_shift_delta(after, trace.viewport(), &mut warnings);
                        diff.moved_elements =
                            after.layout_shifts.iter().map(|e| e.selector.clone()).collect();
                    }
                    None => missing.push(action.id.as_str()),
                }
            }
            _ => missing.push(action.id.as_str()),
        }

        cumulative += diff.layout_shift_delta;
        diff.cumulative_layout_shift = cumulative;
        section.diffs.push(diff);
    }

    section.cumulative_layout_shift = cumulative;
    if !missing.is_empty() {
        warnings.push(summarize_actions("missing screenshots", &missing));
    }
    Ok(AnalyzerOutput::new(section, warnings))
}

/// `None` unless both sides were captured and at least one lists visible elements.
fn element_visibility(
    before: Option<&DomSnapshotEvent>,
    after: Option<&DomSnapshotEvent>,
) -> Option<ElementVisibility> {
    let (before, after) = (before?, after?);
    if before.visible_elements.is_empty() && after.visible_elements.is_empty() {
        return None;
    }
    Some(ElementVisibility::between(
        &before.visible_elements,
        &after.visible_elements,
    ))
}

/// Fraction of differing pixels between two encoded images.
pub fn pixel_diff_fraction(
    before: &[u8],
    after: &[u8],
    tolerance: u8,
) -> Result<f64, image::ImageError> {
    let before = image::load_from_memory(before)?.to_rgba8();
    let after = image::load_from_memory(after)?.to_rgba8();
    Ok(diff_images(&before, &after, tolerance))
}

/// A pixel differs when any channel differs by more than `tolerance`.
/// Images of different dimensions differ entirely.
fn diff_images(before: &RgbaImage, after: &RgbaImage, tolerance: u8) -> f64 {
    if before.dimensions() != after.dimensions() {
        return 1.0;
    }
    let total = u64::from(before.width()) * u64::from(before.height());
    if total == 0 {
        return 0.0;
    }
    let differing = before
        .pixels()
        .zip(after.pixels())
        .filter(|(a, b)| a.0.iter().zip(b.0.iter()).any(|(x, y)| x.abs_diff(*y) > tolerance))
        .count();
    differing as f64 / total as f64
}

/// Decoded screenshots, keeping only the most recent after-image.
struct DecodedImages<'a> {
    store: &'a ScreenshotStore,
    cache: HashMap<String, Option<RgbaImage>>,
}

impl<'a> DecodedImages<'a> {
    fn new(store: &'a ScreenshotStore) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    fn load(&mut self, image_ref: &str) {
        if self.cache.contains_key(image_ref) {
            return;
        }
        let image = self.store.get(image_ref).and_then(|bytes| {
            image::load_from_memory(bytes)
                .map(|img| img.to_rgba8())
                .map_err(|e| debug!("Failed to decode screenshot {}: {}", image_ref, e))
                .ok()
        });
        self.cache.insert(image_ref.to_string(), image);
    }

    /// `None` when either image is absent or undecodable.
    fn compare(&mut self, before: &str, after: &str, tolerance: u8) -> Option<f64> {
        self.load(before);
        self.load(after);
        let fraction = match (self.cache.get(before), self.cache.get(after)) {
            (Some(Some(b)), Some(Some(a))) => Some(diff_images(b, a, tolerance)),
            _ => None,
        };
        // The after-image is usually the next action's before-image.
        self.cache.retain(|k, _| k == after);
        fraction
    }
}

fn layout_shift_delta(
    shot: &ScreenshotEvent,
    viewport: Option<&Viewport>,
    warnings: &mut Vec<String>,
) -> f64 {
    shot.layout_shifts
        .iter()
        .map(|entry| match layout_shift_score(entry, viewport) {
            Some(score) => score,
            None => {
                warnings.push(format!(
                    "layout shift of {} in {} has no fractions and no geometry to derive them",
                    entry.selector, shot.image_ref
                ));
                0.0
            }
        })
        .sum()
}

/// `impact × distance` for one moved element.
///
/// Missing fractions are derived from the element's previous and current
/// rects relative to the viewport. Both fractions are clamped to `[0, 1]`.
pub fn layout_shift_score(entry: &LayoutShiftEntry, viewport: Option<&Viewport>) -> Option<f64> {
    let impact = match entry.impact_fraction {
        Some(f) => f,
        None => impact_fraction(entry, viewport?)?,
    };
    let distance = match entry.distance_fraction {
        Some(f) => f,
        None => distance_fraction(entry, viewport?)?,
    };
    Some(clamp_fraction(impact) * clamp_fraction(distance))
}

fn clamp_fraction(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Visible area swept by the element (union of both rects) over the viewport area.
fn impact_fraction(entry: &LayoutShiftEntry, viewport: &Viewport) -> Option<f64> {
    if viewport.is_empty() || (entry.previous.is_none() && entry.current.is_none()) {
        return None;
    }
    let frame = viewport.as_box();
    let previous = entry.previous.and_then(|b| b.intersection(&frame));
    let current = entry.current.and_then(|b| b.intersection(&frame));
    let area = match (previous, current) {
        (Some(p), Some(c)) => p.union_area(&c),
        (Some(b), None) | (None, Some(b)) => b.area(),
        (None, None) => 0.0,
    };
    Some(area / viewport.area())
}

/// Largest axis movement over the larger viewport dimension.
fn distance_fraction(entry: &LayoutShiftEntry, viewport: &Viewport) -> Option<f64> {
    let previous = entry.previous?;
    let current = entry.current?;
    let max_dimension = f64::from(viewport.width.max(viewport.height));
    if max_dimension == 0.0 {
        return None;
    }
    let moved = (current.x - previous.x).abs().max((current.y - previous.y).abs());
    Some(moved / max_dimension)
}

#[cfg(test)]
#[path = "visual_tests.rs"]
mod tests;
