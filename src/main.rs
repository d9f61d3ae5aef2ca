//! TraceLens - post-hoc analysis of browser automation traces
//!
//! Main entry point for the TraceLens CLI.

mod cli;
mod cmd_analyze;

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tracelens_config::ConfigLoader;

use crate::cli::{Cli, Commands};
use crate::cmd_analyze::{AnalyzeArgs, handle_analyze_command};

/// Initialize tracing with stderr output and, when `log_dir` is set, daily-rotated files.
fn init_tracing(level: &str, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("tracelens")
                .filename_suffix("log")
                .max_log_files(30)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Dropping the guard stops the writer thread.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        // stdout carries the report
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;

    let log_dir = cmd_analyze::log_dir(
        cli.log_dir.as_deref(),
        config.logging.file_logging,
        &config.logging.log_dir,
    );
    init_tracing(&config.logging.level, log_dir.as_deref())?;

    match cli.command {
        Commands::Analyze {
            archive,
            only,
            diff_threshold,
            backoff_tolerance,
            timeout_ms,
            pretty,
        } => {
            let args = AnalyzeArgs {
                archive,
                only,
                diff_threshold,
                backoff_tolerance,
                timeout_ms,
                pretty,
            };
            handle_analyze_command(args, config.analysis).await
        }
    }
}
