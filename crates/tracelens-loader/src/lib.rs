//! # TraceLens Loader
//!
//! Reads a recorded trace archive (a directory or a `.tar.gz` bundle),
//! validates and normalises its timeline, and produces the
//! [`NormalizedTrace`](tracelens_protocols::NormalizedTrace) that every
//! analyzer shares.

mod archive;
mod loader;
mod manifest;
mod timestamp;

pub use archive::TraceArchive;
pub use loader::TraceLoader;

/// Name of the required manifest entry.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Optional root sub-streams, one JSON record per line.
pub const SNAPSHOTS_STREAM: &str = "snapshots.jsonl";
pub const SCREENSHOTS_STREAM: &str = "screenshots.jsonl";
pub const NETWORK_STREAM: &str = "network.jsonl";
