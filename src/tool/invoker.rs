//! Single-invocation driver: run, accept, classify, retry

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classify::{Classifier, FailureKind};
use super::retry::{RetryPolicy, RetryState};
use super::runner::{CommandRunner, CommandSpec, RawOutput};
use super::{InvocationResult, Step};
use crate::common::InvocationError;

/// Runs tool commands under a retry policy
#[derive(Clone)]
pub struct Invoker {
    runner: Arc<dyn CommandRunner>,
    classifier: Arc<Classifier>,
    policy: RetryPolicy,
}

impl Invoker {
    pub fn new(runner: Arc<dyn CommandRunner>, classifier: Classifier, policy: RetryPolicy) -> Self {
        Self {
            runner,
            classifier: Arc::new(classifier),
            policy,
        }
    }

    /// Run `spec` until it exits with one of `accepted` exit codes.
    ///
    /// Transient failures are retried with backoff until the policy's ceiling,
    /// then escalated to fatal. Fatal failures return immediately. Once
    /// `cancel` fires no new attempt is started.
    pub async fn invoke(
        &self,
        step: Step,
        spec: &CommandSpec,
        accepted: &[i32],
        cancel: &CancellationToken,
    ) -> Result<InvocationResult, InvocationError> {
        let started = Instant::now();
        let mut state = RetryState::new();

        loop {
            let attempt = state.record_attempt();
            debug!(%step, attempt, args = ?spec.args, "Invoking {}", spec.program.display());

            let raw = self
                .runner
                .run(spec)
                .await
                .map_err(|e| {
                    InvocationError::spawn(step, &spec.program, &e, attempt, started.elapsed())
                })?;

            if let Some(code) = raw.exit_code.filter(|code| accepted.contains(code)) {
                info!(
                    %step,
                    attempt,
                    exit_code = code,
                    elapsed_ms = raw.elapsed.as_millis() as u64,
                    "Step succeeded"
                );
                return Ok(InvocationResult {
                    step,
                    exit_code: code,
                    stdout: raw.stdout,
                    stderr: raw.stderr,
                    elapsed: raw.elapsed,
                    attempts: attempt,
                });
            }

            let verdict = self.classifier.classify(&raw.stdout, &raw.stderr);
            if verdict.kind == FailureKind::Fatal {
                warn!(%step, attempt, exit_code = ?raw.exit_code, "Step failed (fatal)");
                return Err(failure(step, &raw, attempt, FailureKind::Fatal, None, false, started));
            }

            if !self.policy.allows_retry(&state) {
                warn!(
                    %step,
                    attempt,
                    signature = verdict.signature.as_deref().unwrap_or(""),
                    "Transient failure persisted after max retries"
                );
                return Err(failure(step, &raw, attempt, FailureKind::Fatal, verdict.signature, true, started));
            }

            if cancel.is_cancelled() {
                return Err(failure(step, &raw, attempt, FailureKind::Transient, verdict.signature, false, started));
            }

            let delay = self.policy.next_delay(&mut state);
            warn!(
                %step,
                attempt,
                exit_code = ?raw.exit_code,
                signature = verdict.signature.as_deref().unwrap_or(""),
                delay_ms = delay.as_millis() as u64,
                "Transient failure, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(failure(step, &raw, attempt, FailureKind::Transient, verdict.signature, false, started));
                }
            }
        }
    }
}

fn failure(
    step: Step,
    raw: &RawOutput,
    attempts: u32,
    kind: FailureKind,
    signature: Option<String>,
    retries_exhausted: bool,
    started: Instant,
) -> InvocationError {
    let text = if raw.stderr.trim().is_empty() {
        &raw.stdout
    } else {
        &raw.stderr
    };
    InvocationError {
        kind,
        step,
        exit_code: raw.exit_code,
        attempts,
        stderr_excerpt: InvocationError::excerpt(text),
        signature,
        retries_exhausted,
        elapsed: started.elapsed(),
    }
}
