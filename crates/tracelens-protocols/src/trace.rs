//! The loaded, time-ordered trace shared read-only by all analyzers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::LoadError;
use crate::event::{
    ActionEvent, DomSnapshotEvent, Millis, NetworkEvent, ScreenshotEvent, TraceEvent,
};
use crate::geometry::Viewport;

/// In-memory screenshot bytes keyed by archive-relative path.
#[derive(Debug, Clone, Default)]
pub struct ScreenshotStore {
    images: HashMap<String, Arc<[u8]>>,
}

impl ScreenshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store encoded image bytes for `image_ref`.
    pub fn insert(&mut self, image_ref: impl Into<String>, bytes: Vec<u8>) {
        self.images.insert(image_ref.into(), Arc::from(bytes));
    }

    /// Encoded image bytes for `image_ref`.
    pub fn get(&self, image_ref: &str) -> Option<&[u8]> {
        self.images.get(image_ref).map(|b| b.as_ref())
    }

    pub fn contains(&self, image_ref: &str) -> bool {
        self.images.contains_key(image_ref)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Four per-kind event streams, each sorted ascending by timestamp.
#[derive(Debug, Clone, Default)]
pub struct NormalizedTrace {
    session_id: Option<String>,
    viewport: Option<Viewport>,
    url: Option<String>,
    actions: Vec<ActionEvent>,
    snapshots: Vec<DomSnapshotEvent>,
    screenshots: Vec<ScreenshotEvent>,
    network: Vec<NetworkEvent>,
    images: ScreenshotStore,
    warnings: Vec<String>,
}

impl NormalizedTrace {
    /// Demultiplex events into per-kind streams.
    ///
    /// Each stream is stably sorted by timestamp, so events with equal
    /// timestamps keep their input order. Fails with [`LoadError::EmptyTrace`]
    /// when no action is present.
    pub fn from_events(
        events: impl IntoIterator<Item = TraceEvent>,
        images: ScreenshotStore,
    ) -> Result<Self, LoadError> {
        let mut trace = Self {
            images,
            ..Default::default()
        };

        for event in events {
            match event {
                TraceEvent::Action(e) => trace.actions.push(e),
                TraceEvent::DomSnapshot(e) => trace.snapshots.push(e),
                TraceEvent::Screenshot(e) => trace.screenshots.push(e),
                TraceEvent::Network(e) => trace.network.push(e),
            }
        }

        if trace.actions.is_empty() {
            return Err(LoadError::EmptyTrace);
        }

        trace.actions.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        trace.snapshots.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        trace.screenshots.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        trace.network.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        Ok(trace)
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Attach data-quality warnings found while loading.
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Session viewport declared by the manifest.
    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    /// Starting URL declared by the manifest.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn actions(&self) -> &[ActionEvent] {
        &self.actions
    }

    pub fn snapshots(&self) -> &[DomSnapshotEvent] {
        &self.snapshots
    }

    pub fn screenshots(&self) -> &[ScreenshotEvent] {
        &self.screenshots
    }

    pub fn network(&self) -> &[NetworkEvent] {
        &self.network
    }

    pub fn images(&self) -> &ScreenshotStore {
        &self.images
    }

    /// Warnings produced while loading.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Timestamp of the action following `index`, if any.
    pub fn next_action_timestamp(&self, index: usize) -> Option<Millis> {
        self.actions.get(index + 1).map(|a| a.timestamp)
    }
}
