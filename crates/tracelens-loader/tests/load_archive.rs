//! Loading directory and bundle archives end to end.

use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tracelens_loader::TraceLoader;
use tracelens_protocols::{ActionOutcome, LoadError};

fn write_json(dir: &Path, name: &str, value: &serde_json::Value) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

fn write_png(dir: &Path, name: &str, rgba: [u8; 4]) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    image::RgbaImage::from_pixel(4, 4, image::Rgba(rgba))
        .save(path)
        .unwrap();
}

fn pack(dir: &Path, out: &Path) {
    let file = File::create(out).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", dir).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

/// Two actions with snapshots, screenshots and a network sample.
fn sample_archive() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write_json(
        root,
        "manifest.json",
        &json!({
            "session_id": "session-1",
            "viewport": {"width": 800, "height": 600},
            "actions": [
                {
                    "id": "a1",
                    "timestamp": 10_000,
                    "kind": "click",
                    "target": "button#login",
                    "step": "login",
                    "duration_ms": 120,
                    "markers": {"resolved_at": 10_040, "interaction_started_at": 10_060},
                    "snapshots": ["snapshots/s1.json", "snapshots/s2.json"],
                    "screenshots": ["shots/1.png", {"path": "shots/2.png", "timestamp": 10_200, "settled_at": 10_300}],
                    "network": ["network/n1.json"]
                },
                {
                    "id": "a2",
                    "timestamp": 11_000,
                    "kind": "fill",
                    "target": "input#user",
                    "outcome": "failure",
                    "error": {"name": "TimeoutError", "message": "element not found"},
                    "snapshots": ["snapshots/s2.json"]
                }
            ]
        }),
    );
    write_json(
        root,
        "snapshots/s1.json",
        &json!({"timestamp": 9_990, "target": "button#login", "visible": true}),
    );
    write_json(
        root,
        "snapshots/s2.json",
        &json!({"timestamp": 10_150, "target": "button#login", "focus_state": "focused"}),
    );
    write_json(
        root,
        "network/n1.json",
        &json!([{"timestamp": 9_950, "latency_ms": 40, "bandwidth_estimate": 10.5, "stability": "stable"}]),
    );
    write_png(root, "shots/1.png", [255, 255, 255, 255]);
    write_png(root, "shots/2.png", [0, 0, 0, 255]);
    dir
}

#[test]
fn test_load_directory_archive() {
    let dir = sample_archive();
    let trace = TraceLoader::load(dir.path()).unwrap();

    assert_eq!(trace.session_id(), Some("session-1"));
    assert_eq!(trace.viewport().map(|v| v.width), Some(800));
    assert_eq!(trace.actions().len(), 2);
    // Shared snapshot record is loaded once.
    assert_eq!(trace.snapshots().len(), 2);
    assert_eq!(trace.screenshots().len(), 2);
    assert_eq!(trace.network().len(), 1);
    assert!(trace.warnings().is_empty());

    // Earliest event is the network sample at 9950.
    assert_eq!(trace.network()[0].timestamp, 0.0);
    assert_eq!(trace.actions()[0].timestamp, 50.0);
    assert_eq!(trace.actions()[0].markers.resolved_at, Some(90.0));
    assert_eq!(trace.actions()[1].timestamp, 1_050.0);

    // Bare screenshot path takes the action timestamp.
    assert_eq!(trace.screenshots()[0].image_ref, "shots/1.png");
    assert_eq!(trace.screenshots()[0].timestamp, 50.0);
    assert_eq!(trace.screenshots()[1].settled_at, Some(350.0));
    assert!(trace.images().contains("shots/1.png"));
    assert!(trace.images().contains("shots/2.png"));

    assert!(matches!(
        &trace.actions()[1].outcome,
        ActionOutcome::Failure { error_type, .. } if error_type == "TimeoutError"
    ));
}

#[test]
fn test_load_bundle_matches_directory() {
    let dir = sample_archive();
    let out = TempDir::new().unwrap();
    let bundle = out.path().join("trace.tar.gz");
    pack(dir.path(), &bundle);

    let from_dir = TraceLoader::load(dir.path()).unwrap();
    let from_bundle = TraceLoader::load(&bundle).unwrap();

    assert_eq!(from_dir.actions(), from_bundle.actions());
    assert_eq!(from_dir.snapshots(), from_bundle.snapshots());
    assert_eq!(from_dir.screenshots(), from_bundle.screenshots());
    assert_eq!(from_dir.network(), from_bundle.network());
    assert_eq!(from_bundle.images().len(), 2);
}

#[test]
fn test_missing_archive() {
    let result = TraceLoader::load(Path::new("/nonexistent/trace-archive"));
    assert!(matches!(result, Err(LoadError::NotFound(_))));
}

#[test]
fn test_missing_manifest() {
    let dir = TempDir::new().unwrap();
    let result = TraceLoader::load(dir.path());
    assert!(matches!(result, Err(LoadError::MalformedArchive(_))));
}

#[test]
fn test_invalid_manifest_json() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("manifest.json"), b"{\"actions\": [").unwrap();
    let result = TraceLoader::load(dir.path());
    assert!(matches!(result, Err(LoadError::MalformedArchive(_))));
}

#[test]
fn test_empty_trace() {
    let dir = TempDir::new().unwrap();
    write_json(dir.path(), "manifest.json", &json!({"actions": []}));
    let result = TraceLoader::load(dir.path());
    assert!(matches!(result, Err(LoadError::EmptyTrace)));
}

#[test]
fn test_out_of_order_actions() {
    let dir = TempDir::new().unwrap();
    write_json(
        dir.path(),
        "manifest.json",
        &json!({"actions": [
            {"id": "a1", "timestamp": 200, "kind": "click"},
            {"id": "a2", "timestamp": 100, "kind": "click"}
        ]}),
    );
    let result = TraceLoader::load(dir.path());
    assert!(matches!(result, Err(LoadError::MalformedArchive(_))));
}

#[test]
fn test_out_of_order_stream() {
    let dir = TempDir::new().unwrap();
    write_json(
        dir.path(),
        "manifest.json",
        &json!({"actions": [{"id": "a1", "timestamp": 100, "kind": "click"}]}),
    );
    fs::write(
        dir.path().join("snapshots.jsonl"),
        "{\"timestamp\": 50}\n{\"timestamp\": 40}\n",
    )
    .unwrap();

    let err = TraceLoader::load(dir.path()).unwrap_err();
    assert!(err.to_string().contains("snapshots.jsonl"));
}

#[test]
fn test_jsonl_streams_and_rfc3339() {
    let dir = TempDir::new().unwrap();
    write_json(
        dir.path(),
        "manifest.json",
        &json!({"actions": [
            {"id": "a1", "timestamp": "2024-05-01T10:00:01Z", "kind": "navigate"},
            {"id": "a2", "timestamp": "2024-05-01T10:00:02.500Z", "kind": "click"}
        ]}),
    );
    fs::write(
        dir.path().join("network.jsonl"),
        "{\"timestamp\": \"2024-05-01T10:00:00Z\", \"latency_ms\": 30}\n\n{\"timestamp\": \"2024-05-01T10:00:02Z\", \"latency_ms\": 90}\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("screenshots.jsonl"),
        "{\"path\": \"shots/a.png\", \"timestamp\": \"2024-05-01T10:00:01Z\"}\n",
    )
    .unwrap();
    write_png(dir.path(), "shots/a.png", [1, 2, 3, 255]);

    let trace = TraceLoader::load(dir.path()).unwrap();
    assert_eq!(trace.network()[0].timestamp, 0.0);
    assert_eq!(trace.network()[1].timestamp, 2_000.0);
    assert_eq!(trace.actions()[0].timestamp, 1_000.0);
    assert_eq!(trace.actions()[1].timestamp, 2_500.0);
    assert_eq!(trace.screenshots()[0].timestamp, 1_000.0);
    assert!(trace.images().contains("shots/a.png"));
}

#[test]
fn test_missing_screenshot_is_warning() {
    let dir = TempDir::new().unwrap();
    write_json(
        dir.path(),
        "manifest.json",
        &json!({"actions": [
            {"id": "a1", "timestamp": 0, "kind": "click", "screenshots": ["shots/gone.png"]}
        ]}),
    );

    let trace = TraceLoader::load(dir.path()).unwrap();
    assert_eq!(trace.screenshots().len(), 1);
    assert!(!trace.images().contains("shots/gone.png"));
    assert_eq!(trace.warnings().len(), 1);
    assert!(trace.warnings()[0].contains("shots/gone.png"));
}

#[test]
fn test_screenshot_sidecar() {
    let dir = TempDir::new().unwrap();
    write_json(
        dir.path(),
        "manifest.json",
        &json!({"actions": [
            {"id": "a1", "timestamp": 1_000, "kind": "click", "screenshots": ["shots/1.png"]}
        ]}),
    );
    write_png(dir.path(), "shots/1.png", [9, 9, 9, 255]);
    write_json(
        dir.path(),
        "shots/1.png.json",
        &json!({
            "timestamp": 1_100,
            "settled_at": 1_250,
            "layout_shifts": [{"selector": "#banner", "impact_fraction": 0.3, "distance_fraction": 0.2}]
        }),
    );

    let trace = TraceLoader::load(dir.path()).unwrap();
    let shot = &trace.screenshots()[0];
    assert_eq!(shot.timestamp, 100.0);
    assert_eq!(shot.settled_at, Some(250.0));
    assert_eq!(shot.layout_shifts[0].selector, "#banner");
}

#[test]
fn test_shared_screenshot_keeps_first_reference() {
    let dir = TempDir::new().unwrap();
    write_json(
        dir.path(),
        "manifest.json",
        &json!({"actions": [
            {"id": "a1", "timestamp": 1_000, "kind": "click", "screenshots": ["shots/shared.png"]},
            {"id": "a2", "timestamp": 2_000, "kind": "click", "screenshots": [
                "shots/shared.png",
                {"path": "shots/shared.png", "timestamp": 2_500}
            ]}
        ]}),
    );
    write_png(dir.path(), "shots/shared.png", [4, 4, 4, 255]);

    let trace = TraceLoader::load(dir.path()).unwrap();
    assert_eq!(trace.screenshots().len(), 1);
    assert_eq!(trace.screenshots()[0].timestamp, 0.0);
    assert!(trace.warnings().is_empty());
}

#[tokio::test]
async fn test_load_with_timeout_completes() {
    let dir = sample_archive();
    let trace = TraceLoader::load_with_timeout(
        dir.path(),
        Some(Duration::from_secs(30)),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(trace.actions().len(), 2);
}

#[tokio::test]
async fn test_load_with_timeout_cancelled() {
    let dir = sample_archive();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = TraceLoader::load_with_timeout(dir.path(), None, cancel).await;
    assert!(matches!(result, Err(LoadError::Cancelled)));
}

#[tokio::test]
async fn test_load_with_timeout_expires() {
    let dir = TempDir::new().unwrap();
    write_json(
        dir.path(),
        "manifest.json",
        &json!({"actions": [{"id": "a1", "timestamp": 0, "kind": "navigate"}]}),
    );
    let mut stream = String::new();
    for i in 0..100_000 {
        stream.push_str(&format!(
            "{{\"timestamp\": {}, \"target\": \"#row-{}\", \"visible\": true}}\n",
            i, i
        ));
    }
    fs::write(dir.path().join("snapshots.jsonl"), stream).unwrap();

    let result = TraceLoader::load_with_timeout(
        dir.path(),
        Some(Duration::from_millis(1)),
        CancellationToken::new(),
    )
    .await;
    match result {
        Err(LoadError::Timeout(limit)) => assert_eq!(limit, Duration::from_millis(1)),
        other => panic!("expected timeout, got {:?}", other.map(|t| t.snapshots().len())),
    }
}
