//! Concurrent suite execution
//!
//! Scenarios run as independent tasks bounded by `jobs`. Terraform keeps its
//! state and `.terraform` directory inside the working directory, so scenarios
//! that point at the same directory take turns on a per-directory lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::ScenarioConfig;
use super::report::{ScenarioReport, SuiteReport};
use super::runner::{Harness, ScenarioContext};
use crate::common::{Error, ScenarioError};
use crate::tool::Step;

/// How a suite is run
#[derive(Debug, Clone)]
pub struct SuiteOptions {
    /// Maximum scenarios in flight
    pub jobs: usize,
    /// Cancel the suite after this long
    pub timeout: Option<Duration>,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            timeout: None,
        }
    }
}

/// Run `scenarios` concurrently and collect their reports in input order
///
/// Cancelling `cancel` (Ctrl-C, or the suite timeout) stops scenarios from
/// starting new steps; scenarios that already applied still destroy.
pub async fn run_suite(
    harness: Arc<Harness>,
    scenarios: Vec<ScenarioConfig>,
    options: &SuiteOptions,
    cancel: CancellationToken,
) -> SuiteReport {
    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(options.jobs.max(1)));
    let mut directories: HashMap<PathBuf, Arc<Mutex<()>>> = HashMap::new();
    let mut tasks = JoinSet::new();
    let mut slots: Vec<Option<ScenarioReport>> = Vec::with_capacity(scenarios.len());
    let mut identities = Vec::with_capacity(scenarios.len());

    info!(scenarios = scenarios.len(), jobs = options.jobs.max(1), "Starting suite");

    let timer = options.timeout.map(|timeout| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(timeout_secs = timeout.as_secs(), "Suite timed out, cancelling scenarios");
            cancel.cancel();
        })
    });

    for (index, scenario) in scenarios.into_iter().enumerate() {
        let id = format!("{}#{}", scenario.name, index + 1);
        identities.push((id.clone(), scenario.name.clone(), scenario.kind));
        slots.push(None);

        let ctx = ScenarioContext::new(id, &scenario.name, cancel.child_token());
        let harness = Arc::clone(&harness);
        let semaphore = Arc::clone(&semaphore);
        let directory = Arc::clone(
            directories
                .entry(directory_key(&scenario.working_dir))
                .or_default(),
        );

        tasks.spawn(async move {
            // Waiting on the directory must not hold a job slot
            let _directory = directory.lock().await;
            // The semaphore is never closed, so acquisition only fails on a bug
            let _permit = semaphore.acquire_owned().await.ok();
            (index, harness.run_scenario(&ctx, &scenario).await)
        });
    }

    let mut lost = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, report)) => slots[index] = Some(report),
            Err(e) => {
                error!(error = %e, "Scenario task did not complete");
                lost.push(e.to_string());
            }
        }
    }

    if let Some(timer) = timer {
        timer.abort();
    }

    let mut lost = lost.into_iter();
    let scenarios = slots
        .into_iter()
        .zip(identities)
        .map(|(slot, (id, name, kind))| {
            slot.unwrap_or_else(|| {
                let reason = lost.next().unwrap_or_else(|| "task lost".to_string());
                let mut report = ScenarioReport::new(&id, &name, kind);
                report.fail(ScenarioError::new(
                    Step::Init,
                    Error::Internal(format!("Scenario task aborted: {}", reason)),
                ));
                report
            })
        })
        .collect();

    SuiteReport {
        scenarios,
        elapsed: started.elapsed(),
    }
}

/// Identity of a working directory; `a/../basic` and `basic` share a lock
fn directory_key(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}
