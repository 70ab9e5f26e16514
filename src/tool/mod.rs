//! Invocation layer
//!
//! Runs the provisioning tool as a subprocess, classifies failed runs as
//! transient or fatal, and retries the transient ones with backoff. Nothing
//! above this module ever sees a transient failure unless retries ran out.

mod classify;
mod invoker;
mod retry;
mod runner;
mod terraform;

pub use classify::{Classification, Classifier, FailureKind, DEFAULT_RETRYABLE_ERRORS};
pub use invoker::Invoker;
pub use retry::{RetryPolicy, RetryState};
pub use runner::{CommandRunner, CommandSpec, ProcessRunner, RawOutput};
pub use terraform::{PlanOutcome, Terraform, ToolOptions};

#[cfg(test)]
pub(crate) use runner::scripted;

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// One phase of a scenario's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Init,
    Validate,
    Plan,
    Apply,
    /// Reading outputs after apply
    Output,
    /// Checking extracted outputs
    Assert,
    Destroy,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Init => "init",
            Step::Validate => "validate",
            Step::Plan => "plan",
            Step::Apply => "apply",
            Step::Output => "output",
            Step::Assert => "assert",
            Step::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one successful invocation, after any retries
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub step: Step,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Wall time of the successful attempt
    pub elapsed: Duration,
    pub attempts: u32,
}
