//! Scenario and suite reports

use serde::Serialize;
use std::time::Duration;

use super::config::ScenarioKind;
use crate::common::ScenarioError;
use crate::tool::Step;

/// One executed lifecycle step
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: Step,
    pub passed: bool,
    /// `None` for steps that do not invoke the tool, or when it never ran
    pub exit_code: Option<i32>,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// What happened to provisioned resources
#[derive(Debug, Default)]
pub enum CleanupOutcome {
    /// Apply was never reached, so nothing was created
    #[default]
    NotRequired,
    Succeeded,
    /// Destroy failed; resources may have leaked
    Failed(ScenarioError),
}

impl CleanupOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, CleanupOutcome::Failed(_))
    }
}

/// Result of running one scenario
#[derive(Debug)]
pub struct ScenarioReport {
    pub id: String,
    pub name: String,
    pub kind: ScenarioKind,
    pub steps: Vec<StepRecord>,
    /// First failure; later failures never replace it
    pub failure: Option<ScenarioError>,
    pub cleanup: CleanupOutcome,
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn new(id: &str, name: &str, kind: ScenarioKind) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            steps: Vec::new(),
            failure: None,
            cleanup: CleanupOutcome::NotRequired,
            elapsed: Duration::ZERO,
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none() && !self.cleanup.is_failed()
    }

    /// The scenario failed and its cleanup failed too
    pub fn is_double_failure(&self) -> bool {
        self.failure.is_some() && self.cleanup.is_failed()
    }

    /// Number of times a step ran (destroy must be at most 1)
    pub fn count(&self, step: Step) -> usize {
        self.steps.iter().filter(|s| s.step == step).count()
    }

    pub(crate) fn record(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    /// Record a failure unless one is already recorded
    pub(crate) fn fail(&mut self, error: ScenarioError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    /// Serializable summary for `--json` output
    pub fn summary(&self) -> ScenarioSummary {
        ScenarioSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            passed: self.passed(),
            elapsed_ms: self.elapsed.as_millis() as u64,
            steps: self.steps.clone(),
            failure: self.failure.as_ref().map(FailureSummary::from),
            cleanup: match &self.cleanup {
                CleanupOutcome::NotRequired => CleanupSummary::NotRequired,
                CleanupOutcome::Succeeded => CleanupSummary::Succeeded,
                CleanupOutcome::Failed(e) => CleanupSummary::Failed {
                    error: FailureSummary::from(e),
                },
            },
            possible_leak: self.cleanup.is_failed(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScenarioSummary {
    pub id: String,
    pub name: String,
    pub kind: ScenarioKind,
    pub passed: bool,
    pub elapsed_ms: u64,
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
    pub cleanup: CleanupSummary,
    pub possible_leak: bool,
}

#[derive(Debug, Serialize)]
pub struct FailureSummary {
    pub step: Step,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_excerpt: Option<String>,
}

impl From<&ScenarioError> for FailureSummary {
    fn from(e: &ScenarioError) -> Self {
        Self {
            step: e.step,
            message: e.source.to_string(),
            exit_code: e.exit_code(),
            stderr_excerpt: e.stderr_excerpt().map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupSummary {
    NotRequired,
    Succeeded,
    Failed { error: FailureSummary },
}

/// Result of running a set of scenarios
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub scenarios: Vec<ScenarioReport>,
    pub elapsed: Duration,
}

impl SuiteReport {
    pub fn failed(&self) -> usize {
        self.scenarios.iter().filter(|r| !r.passed()).count()
    }

    pub fn passed(&self) -> bool {
        self.failed() == 0
    }

    pub fn leaked(&self) -> impl Iterator<Item = &ScenarioReport> {
        self.scenarios.iter().filter(|r| r.cleanup.is_failed())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "passed": self.passed(),
            "total": self.scenarios.len(),
            "failed": self.failed(),
            "elapsed_ms": self.elapsed.as_millis() as u64,
            "scenarios": self.scenarios.iter().map(ScenarioReport::summary).collect::<Vec<_>>(),
        })
    }
}
