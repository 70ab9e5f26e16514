//! Scenario runner
//!
//! Drives one scenario through its lifecycle. Steps run strictly in order;
//! each blocks until the tool exits. Once a scenario reaches apply, its
//! resources are held by a [`Provisioned`] guard and destroy runs exactly
//! once, whatever happens after.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};

use super::config::{OutputAssertion, ScenarioConfig, ScenarioKind};
use super::outputs::{
    assert_has_keys, assert_non_empty, assert_values, extract_outputs, OutputSnapshot,
};
use super::report::{CleanupOutcome, ScenarioReport, StepRecord};
use crate::common::config::Config;
use crate::common::{AssertionError, Error, InvocationError, Result, ScenarioError};
use crate::tool::{
    Classifier, CommandRunner, InvocationResult, Invoker, PlanOutcome, ProcessRunner, RetryPolicy,
    Step, Terraform,
};

/// Per-scenario context, passed explicitly instead of shared global state
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    /// Unique within a run; tags every log line of the scenario
    pub id: String,
    pub cancel: CancellationToken,
    span: Span,
}

impl ScenarioContext {
    pub fn new(id: impl Into<String>, name: &str, cancel: CancellationToken) -> Self {
        let id = id.into();
        let span = info_span!("scenario", id = %id, name = %name);
        Self { id, cancel, span }
    }

    fn check_cancelled(&self, next: Step) -> std::result::Result<(), ScenarioError> {
        if self.cancel.is_cancelled() {
            Err(ScenarioError::new(next, Error::Cancelled(next)))
        } else {
            Ok(())
        }
    }
}

/// Shared, read-only settings for running scenarios
pub struct Harness {
    runner: Arc<dyn CommandRunner>,
    binary: PathBuf,
    classifier: Classifier,
    policy: RetryPolicy,
    changes_exit_code: i32,
}

impl Harness {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        binary: PathBuf,
        classifier: Classifier,
        policy: RetryPolicy,
        changes_exit_code: i32,
    ) -> Self {
        Self {
            runner,
            binary,
            classifier,
            policy,
            changes_exit_code,
        }
    }

    /// Harness running the configured tool as a real subprocess
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Arc::new(ProcessRunner),
            config.tool.resolve_binary()?,
            config.classifier()?,
            config.retry_policy(),
            config.tool.plan_changes_exit_code,
        ))
    }

    /// Lifecycle operations for one scenario, with its extra retryable errors
    pub fn terraform(&self, ctx: &ScenarioContext, scenario: &ScenarioConfig) -> Result<Terraform> {
        let classifier = if scenario.retryable_errors.is_empty() {
            self.classifier.clone()
        } else {
            self.classifier.extend(scenario.retryable_errors.iter())?
        };
        let invoker = Invoker::new(Arc::clone(&self.runner), classifier, self.policy.clone());
        Ok(Terraform::new(
            self.binary.clone(),
            invoker,
            scenario.tool_options(),
            self.changes_exit_code,
            ctx.cancel.clone(),
        ))
    }

    /// Run one scenario to completion
    ///
    /// Never returns early with an error: every failure ends up in the report,
    /// together with the outcome of cleanup.
    pub async fn run_scenario(&self, ctx: &ScenarioContext, scenario: &ScenarioConfig) -> ScenarioReport {
        let span = ctx.span.clone();
        async {
            let started = Instant::now();
            let mut report = ScenarioReport::new(&ctx.id, &scenario.name, scenario.kind);
            info!(kind = scenario.kind.as_str(), dir = %scenario.working_dir.display(), "Scenario started");

            match self.terraform(ctx, scenario) {
                Ok(tf) => self.drive(ctx, scenario, &tf, &mut report).await,
                Err(e) => report.fail(ScenarioError::new(Step::Init, e)),
            }

            report.elapsed = started.elapsed();
            match (&report.failure, &report.cleanup) {
                (None, CleanupOutcome::Failed(_)) => {
                    error!("Scenario passed its checks but cleanup failed; resources may have leaked")
                }
                (None, _) => info!(elapsed_ms = report.elapsed.as_millis() as u64, "Scenario passed"),
                (Some(e), CleanupOutcome::Failed(_)) => {
                    error!(error = %e, "Scenario failed and cleanup failed; resources may have leaked")
                }
                (Some(e), _) => warn!(error = %e, "Scenario failed"),
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        ctx: &ScenarioContext,
        scenario: &ScenarioConfig,
        tf: &Terraform,
        report: &mut ScenarioReport,
    ) {
        // Nothing exists before init, so a failed init never needs cleanup
        if let Err(e) = self.init(ctx, tf, report).await {
            report.fail(e);
            return;
        }

        let outcome = match scenario.kind {
            ScenarioKind::Validate => self.validate_only(ctx, tf, report).await,
            ScenarioKind::Plan => self.plan_only(ctx, tf, report).await,
            ScenarioKind::Apply => {
                if let Err(e) = ctx.check_cancelled(Step::Apply) {
                    report.fail(e);
                    return;
                }
                let provisioned = Provisioned::acquire(tf);
                let primary = self.apply_and_verify(ctx, scenario, tf, report).await;
                if let Err(e) = primary {
                    report.fail(e);
                }
                report.cleanup = provisioned.release(report).await;
                return;
            }
        };

        if let Err(e) = outcome {
            report.fail(e);
        }
    }

    async fn init(
        &self,
        ctx: &ScenarioContext,
        tf: &Terraform,
        report: &mut ScenarioReport,
    ) -> std::result::Result<(), ScenarioError> {
        ctx.check_cancelled(Step::Init)?;
        track(report, Step::Init, tf.init().await)?;
        Ok(())
    }

    async fn validate_only(
        &self,
        ctx: &ScenarioContext,
        tf: &Terraform,
        report: &mut ScenarioReport,
    ) -> std::result::Result<(), ScenarioError> {
        ctx.check_cancelled(Step::Validate)?;
        track(report, Step::Validate, tf.validate().await)?;
        Ok(())
    }

    async fn plan_only(
        &self,
        ctx: &ScenarioContext,
        tf: &Terraform,
        report: &mut ScenarioReport,
    ) -> std::result::Result<(), ScenarioError> {
        ctx.check_cancelled(Step::Plan)?;
        let (outcome, _) = track(report, Step::Plan, tf.plan().await)?;
        info!(changes_pending = outcome == PlanOutcome::ChangesPending, "Plan completed");
        Ok(())
    }

    async fn apply_and_verify(
        &self,
        ctx: &ScenarioContext,
        scenario: &ScenarioConfig,
        tf: &Terraform,
        report: &mut ScenarioReport,
    ) -> std::result::Result<(), ScenarioError> {
        track(report, Step::Apply, tf.apply().await)?;

        if !scenario.outputs.is_empty() {
            ctx.check_cancelled(Step::Output)?;
            let outputs = track(report, Step::Output, tf.output().await)?;
            let snapshots = extract_all(scenario, &outputs)?;

            let started = Instant::now();
            let checked = verify_outputs(scenario, &snapshots);
            report.record(StepRecord {
                step: Step::Assert,
                passed: checked.is_ok(),
                exit_code: None,
                attempts: 1,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
            checked?;
        }

        if scenario.check_idempotent {
            ctx.check_cancelled(Step::Plan)?;
            let (outcome, result) = track(report, Step::Plan, tf.plan().await)?;
            if outcome == PlanOutcome::ChangesPending {
                return Err(ScenarioError::new(
                    Step::Plan,
                    AssertionError::NotIdempotent {
                        exit_code: result.exit_code,
                    },
                ));
            }
        }

        Ok(())
    }
}

/// Extract every output the scenario asserts on from one `output -json` result
fn extract_all(
    scenario: &ScenarioConfig,
    outputs: &InvocationResult,
) -> std::result::Result<Vec<OutputSnapshot>, ScenarioError> {
    scenario
        .outputs
        .iter()
        .map(|assertion| extract_outputs(outputs, &assertion.name, assertion.shape))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ScenarioError::new(Step::Output, e))
}

/// Run every output assertion against its extracted snapshot
fn verify_outputs(
    scenario: &ScenarioConfig,
    snapshots: &[OutputSnapshot],
) -> std::result::Result<(), ScenarioError> {
    for (assertion, snapshot) in scenario.outputs.iter().zip(snapshots) {
        check_output(snapshot, assertion).map_err(|e| ScenarioError::new(Step::Assert, e))?;
    }
    Ok(())
}

fn check_output(
    snapshot: &OutputSnapshot,
    assertion: &OutputAssertion,
) -> std::result::Result<(), AssertionError> {
    if assertion.non_empty {
        assert_non_empty(snapshot)?;
    }
    assert_has_keys(snapshot, &assertion.required_keys)?;
    assert_values(snapshot, &assertion.values)
}

/// Record a tool invocation in the report and tag its failure with the step
fn track<T: Tracked>(
    report: &mut ScenarioReport,
    step: Step,
    result: std::result::Result<T, InvocationError>,
) -> std::result::Result<T, ScenarioError> {
    match result {
        Ok(value) => {
            let invocation = value.invocation();
            report.record(StepRecord {
                step,
                passed: true,
                exit_code: Some(invocation.exit_code),
                attempts: invocation.attempts,
                elapsed_ms: invocation.elapsed.as_millis() as u64,
            });
            Ok(value)
        }
        Err(e) => {
            report.record(StepRecord {
                step,
                passed: false,
                exit_code: e.exit_code,
                attempts: e.attempts,
                elapsed_ms: e.elapsed.as_millis() as u64,
            });
            Err(ScenarioError::new(step, e))
        }
    }
}

/// Successful invocation results, possibly wrapped with a decoded outcome
trait Tracked {
    fn invocation(&self) -> &InvocationResult;
}

impl Tracked for InvocationResult {
    fn invocation(&self) -> &InvocationResult {
        self
    }
}

impl Tracked for (PlanOutcome, InvocationResult) {
    fn invocation(&self) -> &InvocationResult {
        &self.1
    }
}

/// Resources created by a scenario's apply
///
/// Acquired right before apply, released only by consuming it with
/// [`Provisioned::release`], which runs destroy. Dropping it unreleased
/// (a panic or an aborted task) logs the leaked working directory.
#[must_use = "provisioned resources leak unless released"]
pub struct Provisioned<'a> {
    tf: &'a Terraform,
    released: bool,
}

impl<'a> Provisioned<'a> {
    pub fn acquire(tf: &'a Terraform) -> Self {
        Self { tf, released: false }
    }

    /// Destroy everything the apply created. Failures are logged and
    /// returned, never raised over the scenario's primary failure.
    pub async fn release(mut self, report: &mut ScenarioReport) -> CleanupOutcome {
        self.released = true;
        match track(report, Step::Destroy, self.tf.destroy().await) {
            Ok(_) => CleanupOutcome::Succeeded,
            Err(e) => {
                error!(
                    error = %e,
                    dir = %self.tf.working_dir().display(),
                    "Cleanup failed; run `vlan-e2e destroy` on the working directory"
                );
                CleanupOutcome::Failed(e)
            }
        }
    }
}

impl Drop for Provisioned<'_> {
    fn drop(&mut self) {
        if !self.released {
            error!(
                dir = %self.tf.working_dir().display(),
                "Provisioned resources were never destroyed; run `vlan-e2e destroy` on the working directory"
            );
        }
    }
}
