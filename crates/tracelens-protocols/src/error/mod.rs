//! Error types shared by the loader and the analyzers.

mod analysis;
mod load;

pub use analysis::{AnalysisError, AnalyzerError};
pub use load::LoadError;
