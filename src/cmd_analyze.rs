//! `analyze` subcommand.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tracelens_analysis::TraceAnalyzer;
use tracelens_config::{AnalysisOptions, ConfigValidator};
use tracelens_loader::TraceLoader;
use tracelens_protocols::{AnalysisCategory, AnalysisReport};

/// Flags of the `analyze` subcommand.
pub(crate) struct AnalyzeArgs {
    pub archive: PathBuf,
    pub only: Option<AnalysisCategory>,
    pub diff_threshold: Option<f64>,
    pub backoff_tolerance: Option<f64>,
    pub timeout_ms: Option<u64>,
    pub pretty: bool,
}

impl AnalyzeArgs {
    /// Command-line flags take precedence over the configuration file.
    fn apply(&self, mut options: AnalysisOptions) -> AnalysisOptions {
        if let Some(threshold) = self.diff_threshold {
            options = options.with_diff_threshold(threshold);
        }
        if let Some(tolerance) = self.backoff_tolerance {
            options = options.with_backoff_tolerance(tolerance);
        }
        if let Some(ms) = self.timeout_ms {
            options = options.with_timeout(Duration::from_millis(ms));
        }
        options
    }
}

/// Load the archive, run the analysis and print the JSON.
pub(crate) async fn handle_analyze_command(
    args: AnalyzeArgs,
    options: AnalysisOptions,
) -> anyhow::Result<()> {
    let options = args.apply(options);
    let validation = ConfigValidator::validate_options(&options);
    for warning in &validation.warnings {
        warn!("{}: {}", warning.path, warning.message);
    }
    if !validation.is_valid() {
        let problems: Vec<String> = validation
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect();
        bail!("invalid analysis options: {}", problems.join("; "));
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let started = Instant::now();
    let trace = TraceLoader::load_with_timeout(&args.archive, options.timeout(), cancel.clone())
        .await
        .with_context(|| format!("failed to load trace archive {}", args.archive.display()))?;
    info!(
        archive = %args.archive.display(),
        actions = trace.actions().len(),
        "Trace loaded"
    );

    let analyzer = TraceAnalyzer::new(remaining_budget(options, started.elapsed()));
    let categories = match args.only {
        Some(category) => vec![category],
        None => AnalysisCategory::ALL.to_vec(),
    };
    let report = analyzer
        .analyze_categories(Arc::new(trace), &categories, cancel)
        .await?;

    println!("{}", render(&report, args.only, args.pretty)?);
    Ok(())
}

/// The timeout covers loading and analysis together; analysis gets what
/// loading left over, never less than a millisecond.
fn remaining_budget(options: AnalysisOptions, elapsed: Duration) -> AnalysisOptions {
    match options.timeout() {
        Some(limit) => {
            let left = limit.saturating_sub(elapsed).max(Duration::from_millis(1));
            options.with_timeout(left)
        }
        None => options,
    }
}

fn render(
    report: &AnalysisReport,
    only: Option<AnalysisCategory>,
    pretty: bool,
) -> anyhow::Result<String> {
    let json = match only {
        None => report.to_json(pretty)?,
        Some(category) => {
            let mut value = serde_json::Map::new();
            value.insert("session_id".to_string(), serde_json::to_value(&report.session_id)?);
            value.insert("action_count".to_string(), report.action_count.into());
            value.insert(category.as_str().to_string(), report.section_json(category)?);
            value.insert("warnings".to_string(), serde_json::to_value(&report.warnings)?);
            if pretty {
                serde_json::to_string_pretty(&value)?
            } else {
                serde_json::to_string(&value)?
            }
        }
    };
    Ok(json)
}

/// Cancel the run on Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling analysis");
            cancel.cancel();
        }
    });
}

/// Resolve the log directory: the flag wins over the configuration.
pub(crate) fn log_dir(flag: Option<&Path>, file_logging: bool, configured: &Path) -> Option<PathBuf> {
    match flag {
        Some(dir) => Some(dir.to_path_buf()),
        None if file_logging => Some(configured.to_path_buf()),
        None => None,
    }
}
