//! # TraceLens Protocols
//!
//! Shared types for the TraceLens trace analysis engine.
//!
//! ## Contents
//!
//! - Raw events recorded while an agent drove a browser ([`TraceEvent`])
//! - The loaded, time-ordered trace every analyzer reads ([`NormalizedTrace`])
//! - Derived records and the per-category report sections ([`AnalysisReport`])
//! - The error taxonomy shared by the loader and the analyzers

pub mod category;
pub mod error;
pub mod event;
pub mod geometry;
pub mod report;
pub mod trace;

pub use category::AnalysisCategory;
pub use error::{AnalysisError, AnalyzerError, LoadError};
pub use event::*;
pub use geometry::{BoundingBox, Viewport};
pub use report::*;
pub use trace::{NormalizedTrace, ScreenshotStore};
