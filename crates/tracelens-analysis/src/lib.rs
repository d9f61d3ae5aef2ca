//! # TraceLens Analysis
//!
//! Six independent analyzers over a [`NormalizedTrace`] and the
//! [`TraceAnalyzer`] that fans them out and assembles an
//! [`AnalysisReport`].
//!
//! Every analyzer is a synchronous, pure function of the trace and the
//! [`AnalysisOptions`] passed in; none of them hold state between calls.
//!
//! [`NormalizedTrace`]: tracelens_protocols::NormalizedTrace
//! [`AnalysisReport`]: tracelens_protocols::AnalysisReport
//! [`AnalysisOptions`]: tracelens_config::AnalysisOptions

pub mod aggregator;
pub mod context;
pub mod decision;
pub mod element;
pub mod recovery;
pub mod timing;
pub mod visual;

mod output;
mod timeline;

pub use aggregator::TraceAnalyzer;
pub use output::AnalyzerOutput;
pub use visual::pixel_diff_fraction;
