//! CLI definitions for TraceLens.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use tracelens_protocols::AnalysisCategory;

/// TraceLens CLI.
#[derive(Parser)]
#[command(name = "tracelens")]
#[command(about = "Post-hoc analysis of browser automation traces")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TRACELENS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Also write daily-rotated log files to this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Analyze a trace archive and print the report as JSON
    Analyze {
        /// Archive directory or .tar.gz bundle
        archive: PathBuf,

        /// Run a single category and print only its section
        #[arg(long, value_parser = parse_category)]
        only: Option<AnalysisCategory>,

        /// Fraction of differing pixels above which a screenshot pair counts as changed
        #[arg(long)]
        diff_threshold: Option<f64>,

        /// Relative deviation from the expected backoff before drift is reported
        #[arg(long)]
        backoff_tolerance: Option<f64>,

        /// Deadline in milliseconds for loading and for the analysis join
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
}

fn parse_category(name: &str) -> Result<AnalysisCategory, String> {
    AnalysisCategory::parse(name).ok_or_else(|| {
        let known: Vec<&str> = AnalysisCategory::ALL.iter().map(|c| c.as_str()).collect();
        format!("unknown category '{}', expected one of: {}", name, known.join(", "))
    })
}
