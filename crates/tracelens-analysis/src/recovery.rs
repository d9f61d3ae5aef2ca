//! Error recovery: failure episodes and the backoff actually observed.

use tokio_util::sync::CancellationToken;

use tracelens_config::AnalysisOptions;
use tracelens_protocols::{
    ActionEvent, ActionOutcome, AnalyzerError, BackoffKind, EnvironmentSnapshot,
    EpisodeResolution, ErrorRecoverySection, FailureEpisode, NetworkConditions, NormalizedTrace,
    RecoveryAttempt, TargetElement,
};

use crate::output::{AnalyzerOutput, check_cancelled};
use crate::timeline::latest_before;

/// Group failed actions into episodes and reconstruct their retries.
///
/// An episode starts at a failed action. Following actions of the same step
/// (or, without a step, the same target) are its attempts; the first action
/// of anything else closes it. Observed waits that drift from the declared
/// policy beyond `backoff_tolerance` are reported but kept.
pub fn analyze(
    trace: &NormalizedTrace,
    options: &AnalysisOptions,
    cancel: &CancellationToken,
) -> Result<AnalyzerOutput<ErrorRecoverySection>, AnalyzerError> {
    let actions = trace.actions();
    let mut episodes = Vec::new();
    let mut warnings = Vec::new();

    let mut i = 0;
    while i < actions.len() {
        check_cancelled(cancel)?;
        let failed = &actions[i];
        let ActionOutcome::Failure {
            error_type,
            message,
        } = &failed.outcome
        else {
            i += 1;
            continue;
        };

        let policy = failed
            .retry_policy
            .unwrap_or(options.default_retry_policy);
        let mut attempts = Vec::new();
        let mut resolution = if policy.max_attempts == 0 {
            EpisodeResolution::Exhausted
        } else {
            EpisodeResolution::Abandoned
        };
        let mut previous = failed;
        let mut next = i + 1;

        while policy.max_attempts > 0 && next < actions.len() && same_step(failed, &actions[next]) {
            check_cancelled(cancel)?;
            let attempt = &actions[next];
            let attempt_number = attempts.len() as u32 + 1;
            let expected_wait_ms = policy.expected_wait_ms(attempt_number);
            let wait_before_ms = (attempt.timestamp - previous.end()).max(0.0);

            if expected_wait_ms > 0.0 {
                let drift = (wait_before_ms - expected_wait_ms).abs() / expected_wait_ms;
                if drift > options.backoff_tolerance {
                    warnings.push(format!(
                        "{} attempt {} waited {:.0}ms, expected {:.0}ms under {} backoff",
                        episode_name(failed),
                        attempt_number,
                        wait_before_ms,
                        expected_wait_ms,
                        backoff_name(policy.backoff)
                    ));
                }
            }

            let succeeded = !attempt.outcome.is_failure();
            attempts.push(RecoveryAttempt {
                failure_id: failed.id.clone(),
                action_id: attempt.id.clone(),
                attempt_number,
                backoff_kind: policy.backoff,
                wait_before_ms,
                expected_wait_ms,
                environment_snapshot: environment_at(trace, attempt.timestamp),
                succeeded,
            });
            previous = attempt;
            next += 1;

            if succeeded {
                resolution = EpisodeResolution::Recovered;
                break;
            }
            if attempt_number >= policy.max_attempts {
                resolution = EpisodeResolution::Exhausted;
                break;
            }
        }

        episodes.push(FailureEpisode {
            failure_id: failed.id.clone(),
            step: failed.step.clone(),
            error_type: error_type.clone(),
            message: message.clone(),
            target_element: target_element(trace, failed),
            environment_factors: environment_at(trace, failed.timestamp),
            policy,
            attempts,
            resolution,
        });
        i = next;
    }

    let recovered = episodes
        .iter()
        .filter(|e| e.resolution == EpisodeResolution::Recovered)
        .count();
    let recovery_success_rate = if episodes.is_empty() {
        1.0
    } else {
        recovered as f64 / episodes.len() as f64
    };

    let section = ErrorRecoverySection {
        episodes,
        recovery_success_rate,
        total_actions: actions.len(),
        failed_actions: actions.iter().filter(|a| a.outcome.is_failure()).count(),
    };
    Ok(AnalyzerOutput::new(section, warnings))
}

/// Whether `candidate` retries the step `failed` belongs to.
fn same_step(failed: &ActionEvent, candidate: &ActionEvent) -> bool {
    match (&failed.step, &failed.target_ref) {
        (Some(step), _) => candidate.step.as_ref() == Some(step),
        (None, Some(target)) => {
            candidate.step.is_none() && candidate.target_ref.as_ref() == Some(target)
        }
        (None, None) => false,
    }
}

fn episode_name(failed: &ActionEvent) -> String {
    match (&failed.step, &failed.target_ref) {
        (Some(step), _) => format!("step {}", step),
        (None, Some(target)) => format!("target {}", target),
        (None, None) => format!("action {}", failed.id),
    }
}

fn backoff_name(kind: BackoffKind) -> &'static str {
    match kind {
        BackoffKind::None => "none",
        BackoffKind::Fixed => "fixed",
        BackoffKind::Exponential => "exponential",
    }
}

/// Session state at `ts`: the latest network sample, the latest known URL
/// and whether any request had failed by then.
fn environment_at(trace: &NormalizedTrace, ts: f64) -> EnvironmentSnapshot {
    let network = trace.network();
    let seen = network.partition_point(|n| n.timestamp <= ts);
    let url = trace.snapshots()[..trace.snapshots().partition_point(|s| s.timestamp <= ts)]
        .iter()
        .rev()
        .find_map(|s| s.url.clone())
        .or_else(|| trace.url().map(str::to_string));

    EnvironmentSnapshot {
        network_conditions: latest_before(network, ts, true, |n| n.timestamp).map(|n| {
            NetworkConditions {
                sampled_at: n.timestamp,
                latency_ms: n.latency_ms,
                bandwidth_estimate: n.bandwidth_estimate,
                stability: n.stability.clone(),
            }
        }),
        url,
        viewport: trace.viewport().copied(),
        network_failure: network[..seen].iter().any(|n| n.failed_requests > 0),
    }
}

/// The failed action's target and the visible elements resembling it in the
/// latest page capture at or before the failure.
fn target_element(trace: &NormalizedTrace, failed: &ActionEvent) -> TargetElement {
    let Some(target) = failed.target_ref.as_deref() else {
        return TargetElement::default();
    };
    let snapshots = trace.snapshots();
    let visible = snapshots[..snapshots.partition_point(|s| s.timestamp <= failed.timestamp)]
        .iter()
        .rev()
        .find(|s| !s.visible_elements.is_empty())
        .map(|s| s.visible_elements.as_slice())
        .unwrap_or_default();

    let wanted = SelectorParts::parse(target);
    TargetElement {
        selector: Some(target.to_string()),
        visible_similar_elements: visible
            .iter()
            .filter(|candidate| candidate.as_str() != target)
            .filter(|candidate| wanted.resembles(&SelectorParts::parse(candidate)))
            .cloned()
            .collect(),
    }
}

/// Tag and class tokens of the last compound in a CSS selector.
#[derive(Debug, PartialEq)]
struct SelectorParts<'a> {
    tag: Option<&'a str>,
    classes: Vec<&'a str>,
}

impl<'a> SelectorParts<'a> {
    fn parse(selector: &'a str) -> Self {
        let compound = selector
            .rsplit(|c: char| c.is_whitespace() || c == '>' || c == '+' || c == '~')
            .find(|part| !part.is_empty())
            .unwrap_or_default();
        let compound = compound
            .split(['[', ':'])
            .next()
            .unwrap_or_default();

        let tag_end = compound.find(['#', '.']).unwrap_or(compound.len());
        let tag = Some(&compound[..tag_end]).filter(|t| !t.is_empty() && *t != "*");
        let classes = compound[tag_end..]
            .split('#')
            .flat_map(|part| part.split('.').skip(1))
            .filter(|c| !c.is_empty())
            .collect();
        Self { tag, classes }
    }

    /// Same tag, or at least one shared class.
    fn resembles(&self, other: &SelectorParts<'_>) -> bool {
        let same_tag = self.tag.is_some() && self.tag == other.tag;
        same_tag || self.classes.iter().any(|c| other.classes.contains(c))
    }
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
