//! Mock Terraform binary for integration testing
//!
//! Implements the subset of the Terraform CLI contract the harness relies on
//! (exit codes, `-detailed-exitcode`, `output -json`, idempotent destroy)
//! without talking to any infrastructure.
//!
//! Behaviour is driven by an optional `mock-terraform.json` in the working
//! directory:
//!
//! ```json
//! {
//!   "outputs": { "vlan": { "id": "100", "name": "vlan100", "vlan": "100" } },
//!   "plan_exit_code": 0,
//!   "failures": {
//!     "apply": [ { "exit_code": 1, "stderr": "Error: 429 Too Many Requests" } ],
//!     "destroy": [ { "exit_code": 1, "stderr": "Error: VLAN busy", "repeat": true } ]
//!   }
//! }
//! ```
//!
//! The Nth invocation of a subcommand uses the Nth failure entry, if any;
//! an entry marked `repeat` applies to every later invocation as well.
//! Every invocation is appended to `mock-terraform.log`.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

const SCENARIO_FILE: &str = "mock-terraform.json";
const LOG_FILE: &str = "mock-terraform.log";
const STATE_FILE: &str = "mock.tfstate";
const INIT_DIR: &str = ".terraform";

#[derive(Deserialize, Default)]
#[serde(default)]
struct MockScenario {
    outputs: Map<String, Value>,
    /// Overrides the detailed exit code plan would report
    plan_exit_code: Option<i32>,
    failures: HashMap<String, Vec<Failure>>,
}

#[derive(Deserialize, Clone)]
struct Failure {
    exit_code: i32,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    repeat: bool,
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = run(&args);
    std::process::exit(code);
}

fn run(args: &[String]) -> i32 {
    let Some(subcommand) = args.first().map(String::as_str) else {
        eprintln!("Usage: terraform [global options] <subcommand> [args]");
        return 127;
    };

    let scenario = match load_scenario() {
        Ok(scenario) => scenario,
        Err(e) => {
            eprintln!("mock-terraform: invalid {}: {}", SCENARIO_FILE, e);
            return 64;
        }
    };

    let previous = count_invocations(subcommand);
    log_invocation(args);

    if let Some(failure) = scheduled_failure(&scenario, subcommand, previous) {
        print!("{}", failure.stdout);
        eprintln!("{}", failure.stderr);
        return failure.exit_code;
    }

    let has_flag = |flag: &str| args.iter().any(|a| a == flag);

    match subcommand {
        "init" => {
            if let Err(e) = fs::create_dir_all(INIT_DIR) {
                eprintln!("Error: Failed to create {}: {}", INIT_DIR, e);
                return 1;
            }
            println!("Terraform has been successfully initialized!");
            0
        }
        "validate" => {
            if !initialized() {
                return not_initialized();
            }
            println!("Success! The configuration is valid.");
            0
        }
        "plan" => {
            if !initialized() {
                return not_initialized();
            }
            if let Some(out) = args.iter().find_map(|a| a.strip_prefix("-out=")) {
                if let Err(e) = fs::write(out, "mock plan") {
                    eprintln!("Error: Failed to write plan file: {}", e);
                    return 1;
                }
            }

            let pending = !Path::new(STATE_FILE).exists();
            let detailed = has_flag("-detailed-exitcode");
            match scenario.plan_exit_code {
                Some(code) => {
                    println!("Plan: mock result");
                    code
                }
                None if pending => {
                    println!("Plan: 1 to add, 0 to change, 0 to destroy.");
                    if detailed {
                        2
                    } else {
                        0
                    }
                }
                None => {
                    println!("No changes. Your infrastructure matches the configuration.");
                    0
                }
            }
        }
        "apply" => {
            if !initialized() {
                return not_initialized();
            }
            if !has_flag("-auto-approve") {
                eprintln!("Error: No value for required variable: approval");
                return 1;
            }
            let state = Value::Object(scenario.outputs.clone()).to_string();
            if let Err(e) = fs::write(STATE_FILE, state) {
                eprintln!("Error: Failed to persist state: {}", e);
                return 1;
            }
            println!("Apply complete! Resources: 1 added, 0 changed, 0 destroyed.");
            0
        }
        "output" => {
            let outputs = match fs::read_to_string(STATE_FILE) {
                Ok(state) => serde_json::from_str::<Map<String, Value>>(&state).unwrap_or_default(),
                Err(_) => Map::new(),
            };
            let rendered: Map<String, Value> = outputs
                .into_iter()
                .map(|(name, value)| {
                    let kind = type_name(&value);
                    (name, json!({ "sensitive": false, "type": kind, "value": value }))
                })
                .collect();
            println!("{}", Value::Object(rendered));
            0
        }
        "destroy" => {
            if !has_flag("-auto-approve") {
                eprintln!("Error: No value for required variable: approval");
                return 1;
            }
            let destroyed = if Path::new(STATE_FILE).exists() {
                match fs::remove_file(STATE_FILE) {
                    Ok(()) => 1,
                    Err(e) => {
                        eprintln!("Error: Failed to remove state: {}", e);
                        return 1;
                    }
                }
            } else {
                0
            };
            println!("Destroy complete! Resources: {} destroyed.", destroyed);
            0
        }
        other => {
            eprintln!("Terraform has no command named \"{}\".", other);
            1
        }
    }
}

fn load_scenario() -> Result<MockScenario, String> {
    match fs::read_to_string(SCENARIO_FILE) {
        Ok(content) => serde_json::from_str(&content).map_err(|e| e.to_string()),
        Err(_) => Ok(MockScenario::default()),
    }
}

fn scheduled_failure(scenario: &MockScenario, subcommand: &str, previous: usize) -> Option<Failure> {
    let failures = scenario.failures.get(subcommand)?;
    match failures.get(previous) {
        Some(failure) => Some(failure.clone()),
        None => failures.last().filter(|f| f.repeat).cloned(),
    }
}

fn count_invocations(subcommand: &str) -> usize {
    fs::read_to_string(LOG_FILE)
        .map(|log| {
            log.lines()
                .filter(|line| line.split_whitespace().next() == Some(subcommand))
                .count()
        })
        .unwrap_or(0)
}

fn log_invocation(args: &[String]) {
    if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(LOG_FILE) {
        let automation = std::env::var("TF_IN_AUTOMATION").unwrap_or_default();
        writeln!(file, "{} TF_IN_AUTOMATION={}", args.join(" "), automation).ok();
    }
}

fn initialized() -> bool {
    Path::new(INIT_DIR).is_dir()
}

fn not_initialized() -> i32 {
    eprintln!("Error: Module not installed. Run \"terraform init\" first.");
    1
}

fn type_name(value: &Value) -> Value {
    match value {
        Value::String(_) => json!("string"),
        Value::Number(_) => json!("number"),
        Value::Bool(_) => json!("bool"),
        Value::Array(_) => json!(["list", "dynamic"]),
        Value::Object(_) => json!(["object", {}]),
        Value::Null => Value::Null,
    }
}
