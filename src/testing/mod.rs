//! E2E scenario harness
//!
//! Reads YAML scenarios and drives the provisioning tool through each
//! scenario's lifecycle, asserting on structured outputs rather than on
//! the tool's human-readable text.

mod config;
mod outputs;
mod report;
mod runner;
mod suite;

pub use config::*;
pub use outputs::{assert_has_keys, assert_non_empty, assert_values, extract_outputs, OutputSnapshot};
pub use report::{
    CleanupOutcome, CleanupSummary, FailureSummary, ScenarioReport, ScenarioSummary, StepRecord,
    SuiteReport,
};
pub use runner::{Harness, Provisioned, ScenarioContext};
pub use suite::{run_suite, SuiteOptions};
