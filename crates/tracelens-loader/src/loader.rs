//! Trace loading.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tracelens_protocols::{
    ActionEvent, ActionMarkers, ActionOutcome, DomSnapshotEvent, LoadError, Millis, NetworkEvent,
    NormalizedTrace, ScreenshotEvent, ScreenshotStore, TraceEvent,
};

use crate::archive::TraceArchive;
use crate::manifest::{
    OneOrMany, RawAction, RawManifest, RawNetworkSample, RawOutcome, RawScreenshot,
    RawScreenshotRef, RawScreenshotSidecar, RawSnapshot,
};
use crate::timestamp::{ensure_non_decreasing, rebase, to_millis, to_millis_opt};
use crate::{MANIFEST_FILE, NETWORK_STREAM, SCREENSHOTS_STREAM, SNAPSHOTS_STREAM};

/// How long a stopped load may take to let go of the archive.
const RELEASE_GRACE: Duration = Duration::from_millis(500);

/// Loads trace archives into a [`NormalizedTrace`].
pub struct TraceLoader;

impl TraceLoader {
    /// Load the archive at `path`.
    pub fn load(path: &Path) -> Result<NormalizedTrace, LoadError> {
        Self::load_cancellable(path, &CancellationToken::new())
    }

    /// Load the archive at `path`, stopping between entries once `cancel` fires.
    pub fn load_cancellable(
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<NormalizedTrace, LoadError> {
        let started = Instant::now();
        let archive = TraceArchive::open(path, cancel)?;
        debug!(kind = archive.kind(), path = %path.display(), "Trace archive opened");

        let manifest_bytes = archive
            .read(MANIFEST_FILE)?
            .ok_or_else(|| LoadError::malformed(format!("{} missing", MANIFEST_FILE)))?;
        let manifest: RawManifest = serde_json::from_slice(&manifest_bytes)?;

        let mut collector = Collector::new(&archive, cancel);
        collector.collect_manifest(manifest.actions)?;
        collector.collect_streams()?;

        let Collector {
            mut events,
            images,
            warnings,
            ..
        } = collector;
        drop(archive);

        rebase(&mut events);
        for warning in &warnings {
            warn!("{}", warning);
        }

        let mut trace = NormalizedTrace::from_events(events, images)?.with_warnings(warnings);
        if let Some(session_id) = manifest.session_id {
            trace = trace.with_session_id(session_id);
        }
        if let Some(viewport) = manifest.viewport {
            trace = trace.with_viewport(viewport);
        }
        if let Some(url) = manifest.url {
            trace = trace.with_url(url);
        }

        info!(
            actions = trace.actions().len(),
            snapshots = trace.snapshots().len(),
            screenshots = trace.screenshots().len(),
            network = trace.network().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Trace loaded"
        );
        Ok(trace)
    }

    /// Load on a blocking task, bounded by `timeout` and `cancel`.
    ///
    /// On timeout or cancellation the worker is signalled to stop reading
    /// entries and given a short grace period to close the archive before
    /// [`LoadError::Timeout`] or [`LoadError::Cancelled`] is returned.
    pub async fn load_with_timeout(
        path: impl Into<PathBuf>,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<NormalizedTrace, LoadError> {
        let path = path.into();
        let worker_token = cancel.child_token();
        let task_token = worker_token.clone();
        let mut task =
            tokio::task::spawn_blocking(move || Self::load_cancellable(&path, &task_token));

        let outcome = match timeout {
            Some(limit) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LoadError::Cancelled),
                result = tokio::time::timeout(limit, &mut task) => {
                    result.map_err(|_| LoadError::Timeout(limit))
                }
            },
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LoadError::Cancelled),
                joined = &mut task => Ok(joined),
            },
        };

        match outcome {
            Ok(joined) => joined.map_err(|e| {
                LoadError::Io(std::io::Error::other(format!("loader task failed: {}", e)))
            })?,
            Err(err) => {
                worker_token.cancel();
                if let LoadError::Timeout(limit) = &err {
                    warn!(timeout_ms = limit.as_millis() as u64, "Trace loading timed out");
                }
                if tokio::time::timeout(RELEASE_GRACE, task).await.is_err() {
                    warn!("Loader still running after {:?}", RELEASE_GRACE);
                }
                Err(err)
            }
        }
    }
}

/// Accumulates events and images while walking the archive.
struct Collector<'a> {
    archive: &'a TraceArchive,
    cancel: &'a CancellationToken,
    events: Vec<TraceEvent>,
    images: ScreenshotStore,
    warnings: Vec<String>,
    seen_snapshots: HashSet<String>,
    seen_screenshots: HashSet<String>,
    seen_network: HashSet<String>,
}

impl<'a> Collector<'a> {
    fn new(archive: &'a TraceArchive, cancel: &'a CancellationToken) -> Self {
        Self {
            archive,
            cancel,
            events: Vec::new(),
            images: ScreenshotStore::new(),
            warnings: Vec::new(),
            seen_snapshots: HashSet::new(),
            seen_screenshots: HashSet::new(),
            seen_network: HashSet::new(),
        }
    }

    fn check_cancelled(&self) -> Result<(), LoadError> {
        if self.cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        Ok(())
    }

    fn collect_manifest(&mut self, actions: Vec<RawAction>) -> Result<(), LoadError> {
        let mut timestamps = Vec::with_capacity(actions.len());
        for raw in actions {
            self.check_cancelled()?;
            let action = convert_action(&raw)?;
            timestamps.push(action.timestamp);

            for path in &raw.snapshots {
                self.collect_snapshot_record(path)?;
            }
            for screenshot in raw.screenshots {
                self.collect_screenshot_ref(screenshot, action.timestamp)?;
            }
            for path in &raw.network {
                self.collect_network_record(path)?;
            }

            self.events.push(TraceEvent::Action(action));
        }
        ensure_non_decreasing("manifest actions", timestamps)
    }

    fn collect_snapshot_record(&mut self, path: &str) -> Result<(), LoadError> {
        if !self.seen_snapshots.insert(path.to_string()) {
            return Ok(());
        }
        self.check_cancelled()?;
        let Some(bytes) = self.archive.read(path)? else {
            self.warnings
                .push(format!("load: snapshot record {} missing from archive", path));
            return Ok(());
        };
        let raw: RawSnapshot = parse_record(path, &bytes)?;
        self.events.push(TraceEvent::DomSnapshot(convert_snapshot(raw)?));
        Ok(())
    }

    fn collect_screenshot_ref(
        &mut self,
        reference: RawScreenshotRef,
        action_ts: Millis,
    ) -> Result<(), LoadError> {
        // Shared screenshots keep the timing of their first reference.
        if self.seen_screenshots.contains(reference.path()) {
            return Ok(());
        }
        let record = match reference {
            RawScreenshotRef::Record(record) => record,
            RawScreenshotRef::Path(path) => {
                let sidecar = self.read_sidecar(&path)?;
                RawScreenshot {
                    path,
                    timestamp: sidecar.timestamp,
                    settled_at: sidecar.settled_at,
                    layout_shifts: sidecar.layout_shifts,
                }
            }
        };
        self.collect_screenshot(record, Some(action_ts))
    }

    fn read_sidecar(&self, path: &str) -> Result<RawScreenshotSidecar, LoadError> {
        let sidecar_path = format!("{}.json", path);
        match self.archive.read(&sidecar_path)? {
            Some(bytes) => parse_record(&sidecar_path, &bytes),
            None => Ok(RawScreenshotSidecar::default()),
        }
    }

    fn collect_screenshot(
        &mut self,
        record: RawScreenshot,
        fallback_ts: Option<Millis>,
    ) -> Result<(), LoadError> {
        if !self.seen_screenshots.insert(record.path.clone()) {
            return Ok(());
        }
        self.check_cancelled()?;

        let timestamp = match (to_millis_opt(record.timestamp.as_ref())?, fallback_ts) {
            (Some(ts), _) | (None, Some(ts)) => ts,
            (None, None) => {
                return Err(LoadError::malformed(format!(
                    "screenshot {} has no timestamp",
                    record.path
                )));
            }
        };

        match self.archive.read(&record.path)? {
            Some(bytes) => self.images.insert(record.path.clone(), bytes),
            None => self.warnings.push(format!(
                "load: screenshot image {} missing from archive",
                record.path
            )),
        }

        self.events.push(TraceEvent::Screenshot(ScreenshotEvent {
            timestamp,
            image_ref: record.path,
            settled_at: to_millis_opt(record.settled_at.as_ref())?,
            layout_shifts: record.layout_shifts,
        }));
        Ok(())
    }

    fn collect_network_record(&mut self, path: &str) -> Result<(), LoadError> {
        if !self.seen_network.insert(path.to_string()) {
            return Ok(());
        }
        self.check_cancelled()?;
        let Some(bytes) = self.archive.read(path)? else {
            self.warnings
                .push(format!("load: network record {} missing from archive", path));
            return Ok(());
        };
        let samples: OneOrMany<RawNetworkSample> = parse_record(path, &bytes)?;
        let samples = samples
            .into_vec()
            .into_iter()
            .map(convert_network)
            .collect::<Result<Vec<_>, _>>()?;
        ensure_non_decreasing(path, samples.iter().map(|s| s.timestamp))?;
        self.events
            .extend(samples.into_iter().map(TraceEvent::Network));
        Ok(())
    }

    fn collect_streams(&mut self) -> Result<(), LoadError> {
        if let Some(bytes) = self.archive.read(SNAPSHOTS_STREAM)? {
            let records: Vec<RawSnapshot> = self.parse_stream(SNAPSHOTS_STREAM, &bytes)?;
            let snapshots = records
                .into_iter()
                .map(convert_snapshot)
                .collect::<Result<Vec<_>, _>>()?;
            ensure_non_decreasing(SNAPSHOTS_STREAM, snapshots.iter().map(|s| s.timestamp))?;
            debug!(count = snapshots.len(), "Read {}", SNAPSHOTS_STREAM);
            self.events
                .extend(snapshots.into_iter().map(TraceEvent::DomSnapshot));
        }

        if let Some(bytes) = self.archive.read(SCREENSHOTS_STREAM)? {
            let records: Vec<RawScreenshot> = self.parse_stream(SCREENSHOTS_STREAM, &bytes)?;
            let timestamps = records
                .iter()
                .map(|r| match &r.timestamp {
                    Some(ts) => to_millis(ts),
                    None => Err(LoadError::malformed(format!(
                        "{} record {} has no timestamp",
                        SCREENSHOTS_STREAM, r.path
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            ensure_non_decreasing(SCREENSHOTS_STREAM, timestamps)?;
            debug!(count = records.len(), "Read {}", SCREENSHOTS_STREAM);
            for record in records {
                self.collect_screenshot(record, None)?;
            }
        }

        if let Some(bytes) = self.archive.read(NETWORK_STREAM)? {
            let records: Vec<RawNetworkSample> = self.parse_stream(NETWORK_STREAM, &bytes)?;
            let samples = records
                .into_iter()
                .map(convert_network)
                .collect::<Result<Vec<_>, _>>()?;
            ensure_non_decreasing(NETWORK_STREAM, samples.iter().map(|s| s.timestamp))?;
            debug!(count = samples.len(), "Read {}", NETWORK_STREAM);
            self.events.extend(samples.into_iter().map(TraceEvent::Network));
        }

        Ok(())
    }

    /// Parse a JSON-lines stream, skipping blank lines.
    fn parse_stream<T: DeserializeOwned>(
        &self,
        name: &str,
        bytes: &[u8],
    ) -> Result<Vec<T>, LoadError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| LoadError::malformed(format!("{} is not UTF-8: {}", name, e)))?;
        let mut records = Vec::new();
        for (index, line) in text.lines().enumerate() {
            self.check_cancelled()?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|e| {
                LoadError::malformed(format!("{} line {}: {}", name, index + 1, e))
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

fn parse_record<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<T, LoadError> {
    serde_json::from_slice(bytes)
        .map_err(|e| LoadError::malformed(format!("invalid record {}: {}", path, e)))
}

fn convert_action(raw: &RawAction) -> Result<ActionEvent, LoadError> {
    let outcome = match raw.outcome {
        RawOutcome::Success => ActionOutcome::Success,
        RawOutcome::Failure => {
            let error = raw.error.as_ref();
            ActionOutcome::Failure {
                error_type: error
                    .and_then(|e| e.name.clone())
                    .unwrap_or_else(|| "Error".to_string()),
                message: error.and_then(|e| e.message.clone()).unwrap_or_default(),
            }
        }
    };

    let markers = match &raw.markers {
        Some(m) => ActionMarkers {
            resolved_at: to_millis_opt(m.resolved_at.as_ref())?,
            interaction_started_at: to_millis_opt(m.interaction_started_at.as_ref())?,
        },
        None => ActionMarkers::default(),
    };

    Ok(ActionEvent {
        id: raw.id.clone(),
        timestamp: to_millis(&raw.timestamp)?,
        action_kind: raw.kind.clone(),
        target_ref: raw.target.clone(),
        step: raw.step.clone(),
        duration_ms: raw.duration_ms,
        outcome,
        decision: raw.decision.clone(),
        retry_policy: raw.retry_policy,
        markers,
    })
}

fn convert_snapshot(raw: RawSnapshot) -> Result<DomSnapshotEvent, LoadError> {
    Ok(DomSnapshotEvent {
        timestamp: to_millis(&raw.timestamp)?,
        target_ref: raw.target,
        visible: raw.visible,
        computed_styles: raw.computed_styles,
        focus_state: raw.focus_state,
        aria: raw.aria,
        triggered_events: raw.triggered_events,
        bounds: raw.bounds,
        viewport: raw.viewport,
        hierarchy: raw.hierarchy,
        selectors: raw.selectors,
        landmarks: raw.landmarks,
        performance_markers: raw.performance_markers,
        url: raw.url,
        visible_elements: raw.visible_elements,
    })
}

fn convert_network(raw: RawNetworkSample) -> Result<NetworkEvent, LoadError> {
    let failed_requests = raw.failure_count();
    Ok(NetworkEvent {
        failed_requests,
        timestamp: to_millis(&raw.timestamp)?,
        latency_ms: raw.latency_ms,
        bandwidth_estimate: raw.bandwidth_estimate,
        stability: raw.stability,
        markers: raw.markers,
    })
}
