//! CLI command handling
//!
//! Dispatches CLI commands and formats reports.

use colored::Colorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::testing::{
    discover, run_suite, CleanupOutcome, Harness, ScenarioConfig, ScenarioContext, ScenarioReport,
    SuiteOptions, SuiteReport,
};
use crate::tool::DEFAULT_RETRYABLE_ERRORS;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;

    match command {
        Commands::Test {
            paths,
            jobs,
            timeout,
            json,
            verbose,
        } => {
            let options = SuiteOptions {
                jobs: jobs.unwrap_or(config.suite.jobs),
                timeout: timeout.or(config.suite.timeout_secs).map(Duration::from_secs),
            };
            run_tests(&config, &paths, &options, json, verbose).await
        }

        Commands::Destroy {
            working_dir,
            vars,
            color,
        } => destroy(&config, working_dir, vars, !color).await,

        Commands::Config => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn run_tests(
    config: &Config,
    paths: &[PathBuf],
    options: &SuiteOptions,
    json: bool,
    verbose: bool,
) -> Result<()> {
    let scenarios = discover(paths)?
        .iter()
        .map(|path| ScenarioConfig::load(path))
        .collect::<Result<Vec<_>>>()?;
    let harness = Arc::new(Harness::from_config(config)?);

    let cancel = CancellationToken::new();
    let interrupt = spawn_interrupt_handler(cancel.clone());

    if !json {
        println!(
            "\n{} {} scenario(s), {} in parallel",
            "Running".blue().bold(),
            scenarios.len(),
            options.jobs.max(1)
        );
    }

    let report = run_suite(harness, scenarios, options, cancel).await;
    interrupt.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else {
        print_suite(&report, verbose);
    }

    if report.passed() {
        Ok(())
    } else {
        Err(Error::ScenariosFailed {
            failed: report.failed(),
            total: report.scenarios.len(),
        })
    }
}

/// First Ctrl-C cancels the run gracefully; running tool invocations finish
/// and applied scenarios still destroy.
fn spawn_interrupt_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted: finishing running steps and cleaning up");
            cancel.cancel();
        }
    })
}

async fn destroy(
    config: &Config,
    working_dir: PathBuf,
    vars: Vec<(String, String)>,
    no_color: bool,
) -> Result<()> {
    if !working_dir.is_dir() {
        return Err(Error::Config(format!(
            "Working directory '{}' does not exist",
            working_dir.display()
        )));
    }

    let name = working_dir.display().to_string();
    let scenario = ScenarioConfig {
        name: name.clone(),
        description: None,
        kind: Default::default(),
        working_dir,
        no_color,
        plan_file: None,
        vars: vars.into_iter().collect::<BTreeMap<_, _>>(),
        env: BTreeMap::new(),
        retryable_errors: BTreeMap::new(),
        outputs: Vec::new(),
        check_idempotent: false,
    };

    let harness = Harness::from_config(config)?;
    let ctx = ScenarioContext::new("destroy", &name, CancellationToken::new());
    let tf = harness.terraform(&ctx, &scenario)?;

    println!("{} {}", "Destroying".blue().bold(), name);
    let result = tf.destroy().await?;
    println!(
        "  {} destroy completed in {:.1}s ({} attempt(s))",
        "✓".green(),
        result.elapsed.as_secs_f64(),
        result.attempts
    );
    Ok(())
}

fn show_config(config: &Config) {
    println!("Tool:");
    match config.tool.resolve_binary() {
        Ok(path) => println!("  binary: {}", path.display()),
        Err(_) => println!("  binary: {} {}", config.tool.binary, "(not found)".red()),
    }
    println!("  plan changes exit code: {}", config.tool.plan_changes_exit_code);

    let policy = config.retry_policy();
    println!("Retry:");
    println!("  max attempts: {}", policy.max_attempts);
    println!(
        "  backoff: {:?} initial, {:?} max, x{}",
        policy.initial_delay, policy.max_delay, policy.backoff_multiplier
    );

    println!("Retryable errors:");
    match &config.retryable_errors {
        Some(table) => {
            for (pattern, description) in table {
                println!("  {:48} {}", pattern, description.dimmed());
            }
        }
        None => {
            for (pattern, description) in DEFAULT_RETRYABLE_ERRORS {
                println!("  {:48} {}", pattern, description.dimmed());
            }
        }
    }

    println!("Suite:");
    println!("  jobs: {}", config.suite.jobs);
    match config.suite.timeout_secs {
        Some(secs) => println!("  timeout: {}s", secs),
        None => println!("  timeout: none"),
    }
}

fn print_suite(report: &SuiteReport, verbose: bool) {
    println!();
    for scenario in &report.scenarios {
        print_scenario(scenario, verbose);
    }

    let failed = report.failed();
    let total = report.scenarios.len();
    println!();
    if failed == 0 {
        println!(
            "{} {}",
            "✓".green().bold(),
            format!("{} scenario(s) passed in {:.1}s", total, report.elapsed.as_secs_f64())
                .green()
                .bold()
        );
    } else {
        println!(
            "{} {}",
            "✗".red().bold(),
            format!("{} of {} scenario(s) failed", failed, total).red().bold()
        );
    }

    let leaked: Vec<_> = report.leaked().collect();
    if !leaked.is_empty() {
        println!(
            "\n{} cleanup failed for {} scenario(s); resources may still exist:",
            "WARNING:".yellow().bold(),
            leaked.len()
        );
        for scenario in leaked {
            println!("  {} ({})", scenario.name, scenario.id.dimmed());
        }
        println!("  Run 'vlan-e2e destroy <working_dir>' to clean up.");
    }
}

fn print_scenario(report: &ScenarioReport, verbose: bool) {
    let elapsed = format!("({:.1}s)", report.elapsed.as_secs_f64());
    if report.passed() {
        println!(
            "{} {} {} {}",
            "✓".green(),
            report.name.white().bold(),
            report.kind.as_str().dimmed(),
            elapsed.dimmed()
        );
    } else {
        println!(
            "{} {} {} {}",
            "✗".red(),
            report.name.white().bold(),
            report.kind.as_str().dimmed(),
            elapsed.dimmed()
        );
    }

    if verbose {
        for step in &report.steps {
            let mark = if step.passed { "✓".green() } else { "✗".red() };
            let exit = step
                .exit_code
                .map(|c| format!("exit {}", c))
                .unwrap_or_default();
            println!(
                "    {} {:9} {:8} {} attempt(s) {}ms",
                mark, step.step.as_str(), exit, step.attempts, step.elapsed_ms
            );
        }
    }

    if let Some(failure) = &report.failure {
        println!("    {} {}", "failed:".red(), failure);
        if let Some(excerpt) = failure.stderr_excerpt() {
            for line in excerpt.lines().filter(|l| !l.trim().is_empty()).take(8) {
                println!("      {}", line.dimmed());
            }
        }
    }

    match &report.cleanup {
        CleanupOutcome::NotRequired => {}
        CleanupOutcome::Succeeded => {
            if verbose || report.failure.is_some() {
                println!("    {} destroy succeeded", "cleanup:".cyan());
            }
        }
        CleanupOutcome::Failed(e) => {
            let label = if report.is_double_failure() {
                "cleanup also failed:"
            } else {
                "cleanup failed:"
            };
            println!("    {} {}", label.red().bold(), e);
        }
    }
}
