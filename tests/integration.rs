//! End-to-end integration tests for the vlan-e2e CLI
//!
//! These tests verify the complete scenario lifecycle by:
//! 1. Writing a module directory driven by the mock-terraform binary
//! 2. Running `vlan-e2e test` against scenario files
//! 3. Verifying the JSON report and the exact tool invocations

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Test context with paths and cleanup
struct TestContext {
    /// Scratch directory, removed on drop
    temp: TempDir,
    /// Config file pointing at the mock tool
    config_path: PathBuf,
}

impl TestContext {
    /// Create a new test context with zero-delay retries
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp.path().join("config.toml");

        let config_content = format!(
            r#"
[tool]
binary = '{binary}'
plan_changes_exit_code = 2

[retry]
max_attempts = 3
initial_delay_ms = 0
max_delay_ms = 0

[suite]
jobs = 2
"#,
            binary = env!("CARGO_BIN_EXE_mock-terraform"),
        );
        fs::write(&config_path, config_content).expect("Failed to write config");
        fs::create_dir_all(temp.path().join("scenarios")).expect("Failed to create scenarios dir");

        Self { temp, config_path }
    }

    /// Create a module directory; `mock` is the mock-terraform.json content
    fn module(&self, name: &str, mock: &str) -> PathBuf {
        let dir = self.temp.path().join(name);
        fs::create_dir_all(&dir).expect("Failed to create module dir");
        fs::write(dir.join("main.tf"), "# vlan module under test\n").expect("Failed to write main.tf");
        fs::write(dir.join("mock-terraform.json"), mock).expect("Failed to write mock config");
        dir
    }

    /// Write a scenario file; `working_dir` in it is relative to the scenarios dir
    fn scenario(&self, file: &str, yaml: &str) -> PathBuf {
        let path = self.scenarios_dir().join(file);
        fs::write(&path, yaml).expect("Failed to write scenario");
        path
    }

    fn scenarios_dir(&self) -> PathBuf {
        self.temp.path().join("scenarios")
    }

    /// Run a vlan-e2e command
    fn run(&self, args: &[&str]) -> CliOutput {
        let output = Command::new(env!("CARGO_BIN_EXE_vlan-e2e"))
            .arg("--config")
            .arg(&self.config_path)
            .args(args)
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to run vlan-e2e");

        CliOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }

    /// Run `test --json` on one scenario file and parse the report
    fn run_json(&self, scenario: &Path) -> (CliOutput, Value) {
        let output = self.run(&["test", "--json", scenario.to_str().unwrap()]);
        let report: Value = serde_json::from_str(&output.stdout).unwrap_or_else(|e| {
            panic!(
                "Report is not JSON ({}):\nstdout: {}\nstderr: {}",
                e, output.stdout, output.stderr
            )
        });
        (output, report)
    }
}

/// Output from a vlan-e2e command
#[derive(Debug)]
struct CliOutput {
    stdout: String,
    stderr: String,
    success: bool,
}

/// Every invocation the mock tool received in a module directory
fn invocations(module: &Path) -> Vec<String> {
    fs::read_to_string(module.join("mock-terraform.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Subcommands the mock tool received, in order
fn subcommands(module: &Path) -> Vec<String> {
    invocations(module)
        .iter()
        .filter_map(|line| line.split_whitespace().next().map(str::to_string))
        .collect()
}

fn step<'a>(scenario: &'a Value, name: &str) -> &'a Value {
    scenario["steps"]
        .as_array()
        .and_then(|steps| steps.iter().find(|s| s["step"] == name))
        .unwrap_or_else(|| panic!("no '{}' step in {}", name, scenario))
}

const VLAN_OUTPUTS: &str = r#"{"outputs": {"vlan": {"id": "100", "name": "vlan100", "vlan": "100"}}}"#;
const VLAN_OUTPUTS_NO_TAG: &str = r#"{"outputs": {"vlan": {"id": "100", "name": "vlan100"}}}"#;

const BASIC_SCENARIO: &str = r#"
name: vlan-basic
kind: apply
working_dir: ../basic
vars:
  vlan_id: "100"
outputs:
  - name: vlan
    required_keys: [id, name, vlan]
    values:
      vlan: "100"
"#;

// ============== Tests ==============

#[test]
fn test_apply_and_verify_passes() {
    let ctx = TestContext::new();
    let module = ctx.module("basic", VLAN_OUTPUTS);
    let scenario = ctx.scenario(
        "basic.yaml",
        &format!("{}check_idempotent: true\n", BASIC_SCENARIO),
    );

    let (output, report) = ctx.run_json(&scenario);
    assert!(output.success, "stderr: {}", output.stderr);
    assert_eq!(report["passed"], true);
    assert_eq!(report["total"], 1);

    let result = &report["scenarios"][0];
    assert_eq!(result["kind"], "apply");
    assert_eq!(result["cleanup"]["status"], "succeeded");
    assert_eq!(result["possible_leak"], false);

    assert_eq!(
        subcommands(&module),
        vec!["init", "apply", "output", "plan", "destroy"]
    );
    let calls = invocations(&module);
    assert!(calls.iter().all(|c| c.ends_with("TF_IN_AUTOMATION=1")));
    assert!(calls[1].contains("-auto-approve") && calls[1].contains("-var vlan_id=100"));
    assert!(calls[3].contains("-detailed-exitcode"));
    assert!(!module.join("mock.tfstate").exists(), "state should be destroyed");
}

#[test]
fn test_missing_key_fails_and_destroys_once() {
    let ctx = TestContext::new();
    let module = ctx.module("basic", VLAN_OUTPUTS_NO_TAG);
    let scenario = ctx.scenario("basic.yaml", BASIC_SCENARIO);

    let (output, report) = ctx.run_json(&scenario);
    assert!(!output.success);
    assert!(output.stderr.contains("1 of 1 scenario(s) failed"), "stderr: {}", output.stderr);

    let result = &report["scenarios"][0];
    assert_eq!(result["passed"], false);
    assert_eq!(result["failure"]["step"], "assert");
    assert!(result["failure"]["message"]
        .as_str()
        .unwrap()
        .contains("vlan"));
    assert_eq!(result["cleanup"]["status"], "succeeded");

    let destroys = subcommands(&module).iter().filter(|s| *s == "destroy").count();
    assert_eq!(destroys, 1);
    assert!(!module.join("mock.tfstate").exists());
}

#[test]
fn test_log_file_is_flushed_on_failing_exit() {
    let ctx = TestContext::new();
    ctx.module("basic", VLAN_OUTPUTS_NO_TAG);
    let scenario = ctx.scenario("basic.yaml", BASIC_SCENARIO);
    let log_path = ctx.temp.path().join("logs").join("vlan-e2e.log");

    let log_arg = format!("--log-file={}", log_path.display());
    let output = ctx.run(&[&log_arg, "test", scenario.to_str().unwrap()]);
    assert!(!output.success);

    let log = fs::read_to_string(&log_path).expect("log file should exist");
    assert!(log.contains("Scenario failed"), "log: {}", log);
    assert!(log.contains("vlan-basic#1"), "log: {}", log);
}

#[test]
fn test_transient_apply_failure_is_retried() {
    let ctx = TestContext::new();
    let module = ctx.module(
        "basic",
        r#"{
            "outputs": {"vlan": {"id": "100", "name": "vlan100", "vlan": "100"}},
            "failures": {"apply": [{"exit_code": 1, "stderr": "Error: 429 Too Many Requests"}]}
        }"#,
    );
    let scenario = ctx.scenario("basic.yaml", BASIC_SCENARIO);

    let (output, report) = ctx.run_json(&scenario);
    assert!(output.success, "stderr: {}", output.stderr);

    let apply = step(&report["scenarios"][0], "apply");
    assert_eq!(apply["attempts"], 2);
    assert_eq!(apply["exit_code"], 0);
    assert_eq!(
        subcommands(&module),
        vec!["init", "apply", "apply", "output", "destroy"]
    );
}

#[test]
fn test_retries_exhausted_fails_with_last_exit_code() {
    let ctx = TestContext::new();
    let module = ctx.module(
        "basic",
        r#"{
            "failures": {"apply": [{"exit_code": 1, "stderr": "Error: transport is closing", "repeat": true}]}
        }"#,
    );
    let scenario = ctx.scenario("basic.yaml", BASIC_SCENARIO);

    let (output, report) = ctx.run_json(&scenario);
    assert!(!output.success);

    let failure = &report["scenarios"][0]["failure"];
    assert_eq!(failure["step"], "apply");
    assert_eq!(failure["exit_code"], 1);
    assert!(failure["stderr_excerpt"]
        .as_str()
        .unwrap()
        .contains("transport is closing"));

    let applies = subcommands(&module).iter().filter(|s| *s == "apply").count();
    assert_eq!(applies, 3);
    assert_eq!(subcommands(&module).last().map(String::as_str), Some("destroy"));
}

#[test]
fn test_fatal_apply_failure_is_not_retried() {
    let ctx = TestContext::new();
    let module = ctx.module(
        "basic",
        r#"{"failures": {"apply": [{"exit_code": 1, "stderr": "Error: invalid VLAN tag 5000"}]}}"#,
    );
    let scenario = ctx.scenario("basic.yaml", BASIC_SCENARIO);

    let (output, report) = ctx.run_json(&scenario);
    assert!(!output.success);
    assert_eq!(report["scenarios"][0]["failure"]["step"], "apply");
    assert_eq!(subcommands(&module), vec!["init", "apply", "destroy"]);
}

#[test]
fn test_init_failure_skips_destroy() {
    let ctx = TestContext::new();
    let module = ctx.module(
        "basic",
        r#"{"failures": {"init": [{"exit_code": 1, "stderr": "Error: Invalid provider configuration"}]}}"#,
    );
    let scenario = ctx.scenario("basic.yaml", BASIC_SCENARIO);

    let (output, report) = ctx.run_json(&scenario);
    assert!(!output.success);

    let result = &report["scenarios"][0];
    assert_eq!(result["failure"]["step"], "init");
    assert_eq!(result["cleanup"]["status"], "not_required");
    assert_eq!(subcommands(&module), vec!["init"]);
}

#[test]
fn test_double_failure_reports_possible_leak() {
    let ctx = TestContext::new();
    let module = ctx.module(
        "basic",
        r#"{
            "outputs": {"vlan": {"id": "100", "name": "vlan100"}},
            "failures": {"destroy": [{"exit_code": 1, "stderr": "Error: VLAN is still referenced by a guest", "repeat": true}]}
        }"#,
    );
    let scenario = ctx.scenario("basic.yaml", BASIC_SCENARIO);

    let (output, report) = ctx.run_json(&scenario);
    assert!(!output.success);

    let result = &report["scenarios"][0];
    assert_eq!(result["failure"]["step"], "assert");
    assert_eq!(result["cleanup"]["status"], "failed");
    assert_eq!(result["cleanup"]["error"]["step"], "destroy");
    assert_eq!(result["possible_leak"], true);

    // Fatal destroy failures are not retried, and destroy never runs twice
    let destroys = subcommands(&module).iter().filter(|s| *s == "destroy").count();
    assert_eq!(destroys, 1);
    assert!(module.join("mock.tfstate").exists());
}

#[test]
fn test_plan_only_accepts_pending_changes() {
    let ctx = TestContext::new();
    let module = ctx.module("basic", "{}");
    let scenario = ctx.scenario(
        "plan.yaml",
        r#"
name: vlan-plan
kind: plan
working_dir: ../basic
plan_file: ./plan
"#,
    );

    let (output, report) = ctx.run_json(&scenario);
    assert!(output.success, "stderr: {}", output.stderr);

    let result = &report["scenarios"][0];
    assert_eq!(step(result, "plan")["exit_code"], 2);
    assert_eq!(result["cleanup"]["status"], "not_required");
    assert_eq!(subcommands(&module), vec!["init", "plan"]);
    assert!(invocations(&module)[1].contains("-out=./plan"));
    assert!(module.join("plan").exists());
}

#[test]
fn test_plan_only_rejects_unexpected_exit_code() {
    let ctx = TestContext::new();
    ctx.module("basic", r#"{"plan_exit_code": 3}"#);
    let scenario = ctx.scenario(
        "plan.yaml",
        "name: vlan-plan\nkind: plan\nworking_dir: ../basic\n",
    );

    let (output, report) = ctx.run_json(&scenario);
    assert!(!output.success);
    let failure = &report["scenarios"][0]["failure"];
    assert_eq!(failure["step"], "plan");
    assert_eq!(failure["exit_code"], 3);
}

#[test]
fn test_validate_only() {
    let ctx = TestContext::new();
    let module = ctx.module("basic", "{}");
    let scenario = ctx.scenario(
        "validate.yaml",
        "name: vlan-validate\nkind: validate\nworking_dir: ../basic\n",
    );

    let (output, report) = ctx.run_json(&scenario);
    assert!(output.success, "stderr: {}", output.stderr);
    assert_eq!(report["scenarios"][0]["kind"], "validate");
    assert_eq!(subcommands(&module), vec!["init", "validate"]);
}

#[test]
fn test_suite_runs_directory_of_scenarios() {
    let ctx = TestContext::new();
    let basic = ctx.module("basic", VLAN_OUTPUTS);
    let multi = ctx.module(
        "multiple",
        r#"{"outputs": {"vlans": {"mgmt": {"tag": 10}, "storage": {"tag": 20}}}}"#,
    );
    ctx.scenario("a_basic.yaml", BASIC_SCENARIO);
    ctx.scenario(
        "b_multiple.yaml",
        r#"
name: vlan-multiple
working_dir: ../multiple
outputs:
  - name: vlans
    shape: json
    required_keys: [mgmt, storage]
"#,
    );

    let output = ctx.run(&["test", "--json", "--jobs", "2", ctx.scenarios_dir().to_str().unwrap()]);
    assert!(output.success, "stdout: {}\nstderr: {}", output.stdout, output.stderr);

    let report: Value = serde_json::from_str(&output.stdout).unwrap();
    assert_eq!(report["total"], 2);
    assert_eq!(report["scenarios"][0]["name"], "vlan-basic");
    assert_eq!(report["scenarios"][1]["name"], "vlan-multiple");
    assert_ne!(report["scenarios"][0]["id"], report["scenarios"][1]["id"]);

    assert_eq!(subcommands(&basic).last().map(String::as_str), Some("destroy"));
    assert_eq!(subcommands(&multi).last().map(String::as_str), Some("destroy"));
}

#[test]
fn test_scenarios_sharing_a_module_take_turns() {
    let ctx = TestContext::new();
    let module = ctx.module("basic", VLAN_OUTPUTS);
    ctx.scenario("a_basic.yaml", BASIC_SCENARIO);
    ctx.scenario("b_plan.yaml", "name: vlan-plan\nkind: plan\nworking_dir: ../basic\n");
    ctx.scenario(
        "c_validate.yaml",
        "name: vlan-validate\nkind: validate\nworking_dir: ./../basic\n",
    );

    let output = ctx.run(&["test", "--json", "--jobs", "3", ctx.scenarios_dir().to_str().unwrap()]);
    assert!(output.success, "stdout: {}\nstderr: {}", output.stdout, output.stderr);

    // Each scenario's invocations form one uninterrupted run in the log
    let mut runs: Vec<Vec<String>> = Vec::new();
    for sub in subcommands(&module) {
        match runs.last_mut() {
            Some(run) if sub != "init" => run.push(sub),
            _ => runs.push(vec![sub]),
        }
    }
    runs.sort();
    assert_eq!(
        runs,
        vec![
            vec!["init", "apply", "output", "destroy"],
            vec!["init", "plan"],
            vec!["init", "validate"],
        ]
    );
}

#[test]
fn test_human_report() {
    let ctx = TestContext::new();
    ctx.module("basic", VLAN_OUTPUTS_NO_TAG);
    let scenario = ctx.scenario("basic.yaml", BASIC_SCENARIO);

    let output = ctx.run(&["test", "--verbose", scenario.to_str().unwrap()]);
    assert!(!output.success);
    assert!(output.stdout.contains("vlan-basic"), "stdout: {}", output.stdout);
    assert!(output.stdout.contains("failed:"), "stdout: {}", output.stdout);
    assert!(output.stdout.contains("destroy succeeded"), "stdout: {}", output.stdout);
}

#[test]
fn test_invalid_scenario_is_rejected() {
    let ctx = TestContext::new();
    ctx.module("basic", "{}");
    let scenario = ctx.scenario(
        "bad.yaml",
        r#"
name: vlan-bad
kind: validate
working_dir: ../basic
outputs:
  - name: vlan
"#,
    );

    let output = ctx.run(&["test", scenario.to_str().unwrap()]);
    assert!(!output.success);
    assert!(output.stderr.contains("apply scenario"), "stderr: {}", output.stderr);
}

#[test]
fn test_destroy_command_is_idempotent() {
    let ctx = TestContext::new();
    let module = ctx.module("basic", "{}");
    fs::write(module.join("mock.tfstate"), "{}").unwrap();
    let dir = module.to_str().unwrap();

    let output = ctx.run(&["destroy", dir, "--var", "vlan_id=100"]);
    assert!(output.success, "stderr: {}", output.stderr);
    assert!(!module.join("mock.tfstate").exists());

    // Nothing left: destroying again still succeeds
    let output = ctx.run(&["destroy", dir]);
    assert!(output.success, "stderr: {}", output.stderr);

    let calls = invocations(&module);
    assert_eq!(calls.len(), 2);
    assert!(calls[0].contains("-var vlan_id=100"));
    assert!(calls[0].contains("-no-color"));
}

#[test]
fn test_config_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["config"]);
    assert!(output.success, "stderr: {}", output.stderr);
    assert!(output.stdout.contains("mock-terraform"), "stdout: {}", output.stdout);
    assert!(output.stdout.contains("max attempts: 3"));
    assert!(output.stdout.contains("Connection to remote API closed"));
}
