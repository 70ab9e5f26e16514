//! Terraform lifecycle invocations
//!
//! Shapes each lifecycle step into a command line and runs it through the
//! [`Invoker`]. Flags follow what a non-interactive CI run needs:
//! `-input=false` everywhere, `-auto-approve` for apply/destroy, and
//! `-detailed-exitcode` for plan so pending changes are distinguishable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::invoker::Invoker;
use super::runner::CommandSpec;
use super::{InvocationResult, Step};
use crate::common::InvocationError;

/// Per-scenario invocation options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOptions {
    /// Module directory the tool runs in
    pub working_dir: PathBuf,
    /// Pass `-no-color` so output can be parsed
    pub no_color: bool,
    /// Where plan persists its plan artifact
    pub plan_file: Option<PathBuf>,
    /// Input variables, passed as `-var key=value`
    pub vars: BTreeMap<String, String>,
    /// Extra environment for the tool process
    pub env: BTreeMap<String, String>,
}

/// What a detailed-exitcode plan reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    NoChanges,
    ChangesPending,
}

/// Lifecycle operations against one working directory
pub struct Terraform {
    binary: PathBuf,
    invoker: Invoker,
    options: ToolOptions,
    /// Exit code the tool uses for "plan succeeded, changes pending"
    changes_exit_code: i32,
    cancel: CancellationToken,
}

impl Terraform {
    pub fn new(
        binary: PathBuf,
        invoker: Invoker,
        options: ToolOptions,
        changes_exit_code: i32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            binary,
            invoker,
            options,
            changes_exit_code,
            cancel,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.options.working_dir
    }

    /// `init`: download providers and modules; must precede everything else
    pub async fn init(&self) -> Result<InvocationResult, InvocationError> {
        let args = self.args(&["init", "-input=false", "-upgrade=false"], false);
        self.run(Step::Init, args, &[0], &self.cancel).await
    }

    /// `validate`: syntax and schema only, no side effects
    pub async fn validate(&self) -> Result<InvocationResult, InvocationError> {
        let args = self.args(&["validate"], false);
        self.run(Step::Validate, args, &[0], &self.cancel).await
    }

    /// `plan -detailed-exitcode`, persisting the plan if a plan file is set
    pub async fn plan(&self) -> Result<(PlanOutcome, InvocationResult), InvocationError> {
        let mut args = self.args(&["plan", "-input=false", "-lock=false", "-detailed-exitcode"], true);
        if let Some(plan_file) = &self.options.plan_file {
            args.push(format!("-out={}", plan_file.display()));
        }

        let accepted = [0, self.changes_exit_code];
        let result = self.run(Step::Plan, args, &accepted, &self.cancel).await?;
        let outcome = if result.exit_code == self.changes_exit_code {
            PlanOutcome::ChangesPending
        } else {
            PlanOutcome::NoChanges
        };
        Ok((outcome, result))
    }

    /// `apply -auto-approve`
    pub async fn apply(&self) -> Result<InvocationResult, InvocationError> {
        let args = self.args(&["apply", "-input=false", "-auto-approve"], true);
        self.run(Step::Apply, args, &[0], &self.cancel).await
    }

    /// `output -json`: every output of the applied configuration
    pub async fn output(&self) -> Result<InvocationResult, InvocationError> {
        let args = vec!["output".to_string(), "-no-color".to_string(), "-json".to_string()];
        self.run(Step::Output, args, &[0], &self.cancel).await
    }

    /// `destroy -auto-approve`. Succeeds when nothing is left to destroy.
    ///
    /// Cleanup keeps its full retry budget even after the scenario has been
    /// cancelled.
    pub async fn destroy(&self) -> Result<InvocationResult, InvocationError> {
        let args = self.args(&["destroy", "-input=false", "-auto-approve"], true);
        self.run(Step::Destroy, args, &[0], &CancellationToken::new())
            .await
    }

    fn args(&self, base: &[&str], with_vars: bool) -> Vec<String> {
        let mut args: Vec<String> = base.iter().map(|s| s.to_string()).collect();
        if self.options.no_color {
            args.push("-no-color".to_string());
        }
        if with_vars {
            for (key, value) in &self.options.vars {
                args.push("-var".to_string());
                args.push(format!("{}={}", key, value));
            }
        }
        args
    }

    async fn run(
        &self,
        step: Step,
        args: Vec<String>,
        accepted: &[i32],
        cancel: &CancellationToken,
    ) -> Result<InvocationResult, InvocationError> {
        let mut env = self.options.env.clone();
        env.entry("TF_IN_AUTOMATION".to_string())
            .or_insert_with(|| "1".to_string());

        let spec = CommandSpec {
            program: self.binary.clone(),
            args,
            working_dir: self.options.working_dir.clone(),
            env,
        };
        self.invoker.invoke(step, &spec, accepted, cancel).await
    }
}
