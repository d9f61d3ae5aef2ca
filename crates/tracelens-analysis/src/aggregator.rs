//! Report aggregation.
//!
//! [`TraceAnalyzer`] runs the analyzers as independent blocking tasks over one
//! shared, read-only trace and joins them into an [`AnalysisReport`]. A
//! failing, panicking or unfinished analyzer only loses its own section.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tracelens_config::AnalysisOptions;
use tracelens_protocols::{
    ActionContextSection, AnalysisCategory, AnalysisError, AnalysisReport, AnalysisSection,
    AnalyzerError, DecisionTrailSection, ElementIdentificationSection, ErrorRecoverySection,
    NormalizedTrace, TimingSection, VisualStateSection,
};

use crate::output::AnalyzerOutput;
use crate::{context, decision, element, recovery, timing, visual};

type CategoryResult = Result<AnalyzerOutput<AnalysisSection>, AnalyzerError>;

/// How long a finished run waits for cancelled workers to let go of the trace.
const RELEASE_GRACE: Duration = Duration::from_millis(500);

/// Runs one category to completion on a blocking thread.
type CategoryRunner =
    fn(AnalysisCategory, &NormalizedTrace, &AnalysisOptions, &CancellationToken) -> CategoryResult;

/// Runs the analyzers over a trace.
#[derive(Debug, Clone)]
pub struct TraceAnalyzer {
    options: AnalysisOptions,
    runner: CategoryRunner,
}

impl Default for TraceAnalyzer {
    fn default() -> Self {
        Self::new(AnalysisOptions::default())
    }
}

/// Analyzer tasks in flight, keyed back to their category.
#[derive(Default)]
struct Workers {
    tasks: JoinSet<CategoryResult>,
    running: HashMap<task::Id, AnalysisCategory>,
}

impl TraceAnalyzer {
    pub fn new(options: AnalysisOptions) -> Self {
        Self {
            options,
            runner: run_category,
        }
    }

    #[cfg(test)]
    fn with_runner(mut self, runner: CategoryRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Run every analyzer and assemble the report.
    pub async fn analyze_all(&self, trace: Arc<NormalizedTrace>) -> AnalysisReport {
        let (report, _) = self
            .run(trace, &AnalysisCategory::ALL, &CancellationToken::new())
            .await;
        report
    }

    /// Run every analyzer; cancelling `cancel` stops all outstanding analyzers.
    pub async fn analyze_all_with_cancel(
        &self,
        trace: Arc<NormalizedTrace>,
        cancel: CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        self.analyze_categories(trace, &AnalysisCategory::ALL, cancel)
            .await
    }

    /// Run only the given categories. The report's other sections stay absent.
    pub async fn analyze_categories(
        &self,
        trace: Arc<NormalizedTrace>,
        categories: &[AnalysisCategory],
        cancel: CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        match self.run(trace, categories, &cancel).await {
            (_, true) => Err(AnalysisError::Cancelled),
            (report, false) => Ok(report),
        }
    }

    pub fn analyze_action_context(
        &self,
        trace: &NormalizedTrace,
    ) -> Result<ActionContextSection, AnalyzerError> {
        self.single(AnalysisCategory::ActionContext, || {
            context::analyze(trace, &self.options, &CancellationToken::new())
        })
    }

    pub fn analyze_decision_trail(
        &self,
        trace: &NormalizedTrace,
    ) -> Result<DecisionTrailSection, AnalyzerError> {
        self.single(AnalysisCategory::DecisionTrail, || {
            decision::analyze(trace, &self.options, &CancellationToken::new())
        })
    }

    pub fn analyze_element_identification(
        &self,
        trace: &NormalizedTrace,
    ) -> Result<ElementIdentificationSection, AnalyzerError> {
        self.single(AnalysisCategory::ElementIdentification, || {
            element::analyze(trace, &self.options, &CancellationToken::new())
        })
    }

    pub fn analyze_visual_state(
        &self,
        trace: &NormalizedTrace,
    ) -> Result<VisualStateSection, AnalyzerError> {
        self.single(AnalysisCategory::VisualState, || {
            visual::analyze(trace, &self.options, &CancellationToken::new())
        })
    }

    pub fn analyze_error_recovery(
        &self,
        trace: &NormalizedTrace,
    ) -> Result<ErrorRecoverySection, AnalyzerError> {
        self.single(AnalysisCategory::ErrorRecovery, || {
            recovery::analyze(trace, &self.options, &CancellationToken::new())
        })
    }

    pub fn analyze_timing(&self, trace: &NormalizedTrace) -> Result<TimingSection, AnalyzerError> {
        self.single(AnalysisCategory::Timing, || {
            timing::analyze(trace, &self.options, &CancellationToken::new())
        })
    }

    /// Run one analyzer inline, logging its warnings.
    fn single<T>(
        &self,
        category: AnalysisCategory,
        run: impl FnOnce() -> Result<AnalyzerOutput<T>, AnalyzerError>,
    ) -> Result<T, AnalyzerError> {
        let output = run()?;
        for warning in &output.warnings {
            warn!(category = %category, "{}", warning);
        }
        Ok(output.section)
    }

    /// Fan out, join and assemble. The flag is set when `cancel` fired.
    async fn run(
        &self,
        trace: Arc<NormalizedTrace>,
        categories: &[AnalysisCategory],
        cancel: &CancellationToken,
    ) -> (AnalysisReport, bool) {
        let started = Instant::now();
        let task_token = cancel.child_token();
        let mut workers = Workers::default();
        let mut outcomes: BTreeMap<AnalysisCategory, CategoryResult> = BTreeMap::new();

        let timed_out = {
            let join = self.dispatch_and_join(
                Arc::clone(&trace),
                categories,
                &task_token,
                &mut workers,
                &mut outcomes,
            );
            match self.options.timeout() {
                Some(limit) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    joined = tokio::time::timeout(limit, join) => Some(joined.is_err()),
                },
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    _ = join => Some(false),
                },
            }
        };

        // Stop anything still running and wait for it to drop its trace handle.
        task_token.cancel();
        if !workers.tasks.is_empty() {
            debug!(outstanding = workers.tasks.len(), "Waiting for cancelled analyzers");
            if tokio::time::timeout(RELEASE_GRACE, workers.tasks.shutdown())
                .await
                .is_err()
            {
                warn!("Cancelled analyzers still running after {:?}", RELEASE_GRACE);
            }
        }

        let Some(timed_out) = timed_out else {
            info!("Analysis cancelled");
            return (AnalysisReport::default(), true);
        };

        let report = self.assemble(&trace, categories, outcomes, timed_out);
        info!(
            sections = AnalysisCategory::ALL.iter().filter(|c| report.has_section(**c)).count(),
            warnings = report.warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis complete"
        );
        (report, false)
    }

    /// Dispatch categories as permits free up while collecting finished ones,
    /// so results are recorded even if the deadline hits mid-dispatch.
    async fn dispatch_and_join(
        &self,
        trace: Arc<NormalizedTrace>,
        categories: &[AnalysisCategory],
        cancel: &CancellationToken,
        workers: &mut Workers,
        outcomes: &mut BTreeMap<AnalysisCategory, CategoryResult>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut pending = categories.iter().copied();
        let mut next = pending.next();

        loop {
            tokio::select! {
                permit = semaphore.clone().acquire_owned(), if next.is_some() => {
                    let Some(category) = next.take() else {
                        continue;
                    };
                    next = pending.next();
                    let permit = match permit {
                        Ok(permit) => permit,
                        Err(e) => {
                            outcomes.insert(category, Err(AnalyzerError::Failed(e.to_string())));
                            continue;
                        }
                    };
                    let trace = Arc::clone(&trace);
                    let options = self.options.clone();
                    let token = cancel.clone();
                    let runner = self.runner;

                    let handle = workers.tasks.spawn_blocking(move || {
                        let _permit = permit;
                        runner(category, &trace, &options, &token)
                    });
                    workers.running.insert(handle.id(), category);
                    debug!(category = %category, "Analyzer dispatched");
                }
                Some(joined) = workers.tasks.join_next_with_id(), if !workers.tasks.is_empty() => {
                    record(joined, &mut workers.running, outcomes);
                }
                else => break,
            }
        }
    }

    /// Warnings come out in a fixed order: load warnings, then each category in
    /// report order, then the timeout notice.
    fn assemble(
        &self,
        trace: &NormalizedTrace,
        categories: &[AnalysisCategory],
        mut outcomes: BTreeMap<AnalysisCategory, CategoryResult>,
        timed_out: bool,
    ) -> AnalysisReport {
        let mut report = AnalysisReport {
            session_id: trace.session_id().map(str::to_string),
            action_count: trace.actions().len(),
            warnings: trace.warnings().to_vec(),
            ..Default::default()
        };
        let mut unfinished = Vec::new();

        for category in AnalysisCategory::ALL {
            if !categories.contains(&category) {
                continue;
            }
            match outcomes.remove(&category) {
                Some(Ok(output)) => {
                    for warning in output.warnings {
                        warn!(category = %category, "{}", warning);
                        report.warnings.push(format!("{}: {}", category, warning));
                    }
                    report.set_section(output.section);
                }
                Some(Err(err)) => {
                    warn!(category = %category, "Analyzer failed: {}", err);
                    report
                        .warnings
                        .push(format!("{}: analyzer failed: {}", category, err));
                }
                None => unfinished.push(category.as_str()),
            }
        }

        if !unfinished.is_empty() {
            let limit = self.options.timeout_ms.unwrap_or_default();
            let notice = if timed_out {
                format!(
                    "analysis timed out after {}ms; incomplete: {}",
                    limit,
                    unfinished.join(", ")
                )
            } else {
                format!("analysis incomplete: {}", unfinished.join(", "))
            };
            warn!("{}", notice);
            report.warnings.push(notice);
        }
        report
    }
}

fn record(
    joined: Result<(task::Id, CategoryResult), JoinError>,
    running: &mut HashMap<task::Id, AnalysisCategory>,
    outcomes: &mut BTreeMap<AnalysisCategory, CategoryResult>,
) {
    match joined {
        Ok((id, result)) => {
            if let Some(category) = running.remove(&id) {
                debug!(category = %category, ok = result.is_ok(), "Analyzer finished");
                outcomes.insert(category, result);
            }
        }
        Err(err) => {
            if let Some(category) = running.remove(&err.id()) {
                let cause = if err.is_panic() {
                    AnalyzerError::Panicked(panic_message(err.into_panic()))
                } else {
                    AnalyzerError::Cancelled
                };
                warn!(category = %category, "Analyzer task failed: {}", cause);
                outcomes.insert(category, Err(cause));
            }
        }
    }
}

fn run_category(
    category: AnalysisCategory,
    trace: &NormalizedTrace,
    options: &AnalysisOptions,
    cancel: &CancellationToken,
) -> CategoryResult {
    match category {
        AnalysisCategory::ActionContext => {
            context::analyze(trace, options, cancel).map(|o| o.map(AnalysisSection::ActionContext))
        }
        AnalysisCategory::DecisionTrail => {
            decision::analyze(trace, options, cancel).map(|o| o.map(AnalysisSection::DecisionTrail))
        }
        AnalysisCategory::ElementIdentification => element::analyze(trace, options, cancel)
            .map(|o| o.map(AnalysisSection::ElementIdentification)),
        AnalysisCategory::VisualState => {
            visual::analyze(trace, options, cancel).map(|o| o.map(AnalysisSection::VisualState))
        }
        AnalysisCategory::ErrorRecovery => {
            recovery::analyze(trace, options, cancel).map(|o| o.map(AnalysisSection::ErrorRecovery))
        }
        AnalysisCategory::Timing => {
            timing::analyze(trace, options, cancel).map(|o| o.map(AnalysisSection::Timing))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "aggregator_tests.rs"]
mod tests;
