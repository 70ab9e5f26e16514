//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios.
//!
//! ```yaml
//! name: vlan-basic
//! kind: apply
//! working_dir: ../examples/basic
//! outputs:
//!   - name: vlan
//!     required_keys: [id, name, vlan]
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::common::paths::resolve_relative;
use crate::common::{Error, Result};
use crate::tool::ToolOptions;

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Which lifecycle shape to run
    #[serde(default)]
    pub kind: ScenarioKind,
    /// Module (or module example) directory, relative to the scenario file
    pub working_dir: PathBuf,
    /// Suppress ANSI colors in tool output
    #[serde(default = "default_true")]
    pub no_color: bool,
    /// Where plan persists its plan artifact, relative to the working directory
    pub plan_file: Option<PathBuf>,
    /// Input variables for plan/apply/destroy
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Extra environment for the tool (provider endpoints, tokens)
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Additional transient failure patterns for this module (regex -> description)
    #[serde(default)]
    pub retryable_errors: BTreeMap<String, String>,
    /// Output assertions, checked after apply
    #[serde(default)]
    pub outputs: Vec<OutputAssertion>,
    /// After apply, a plan must report no pending changes
    #[serde(default)]
    pub check_idempotent: bool,
}

fn default_true() -> bool {
    true
}

/// Lifecycle shape of a scenario
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// init, apply, assert outputs, destroy
    #[default]
    #[serde(alias = "apply_and_verify")]
    Apply,
    /// init, plan; nothing is created
    #[serde(alias = "plan_only")]
    Plan,
    /// init, validate; nothing is created
    #[serde(alias = "validate_only")]
    Validate,
}

impl ScenarioKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::Apply => "apply-and-verify",
            ScenarioKind::Plan => "plan-only",
            ScenarioKind::Validate => "validate-only",
        }
    }
}

/// How an output value is read
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputShape {
    /// A flat object; every value is read as a string
    #[default]
    Map,
    /// Any structured value, kept as-is
    Json,
}

/// Assertions on one named output
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct OutputAssertion {
    /// Output name
    pub name: String,
    #[serde(default)]
    pub shape: OutputShape,
    /// The output must not be empty
    #[serde(default = "default_true")]
    pub non_empty: bool,
    /// Keys that must be present
    #[serde(default)]
    pub required_keys: Vec<String>,
    /// Exact expected values (key -> value)
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl ScenarioConfig {
    /// Load a scenario from a YAML file
    ///
    /// Relative `working_dir` is resolved against the scenario file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read test scenario '{}': {}",
                path.display(),
                e
            ))
        })?;

        let base = path.parent().unwrap_or(Path::new("."));
        Self::from_yaml(&content, base).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse a scenario, resolving relative paths against `base`
    pub fn from_yaml(content: &str, base: &Path) -> Result<Self> {
        let mut scenario: ScenarioConfig = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse test scenario: {}", e)))?;

        scenario.working_dir = resolve_relative(base, &scenario.working_dir);
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Scenario name must not be empty".to_string()));
        }

        if self.kind != ScenarioKind::Apply {
            if !self.outputs.is_empty() {
                return Err(Error::Config(format!(
                    "Scenario '{}': outputs can only be asserted in an apply scenario",
                    self.name
                )));
            }
            if self.check_idempotent {
                return Err(Error::Config(format!(
                    "Scenario '{}': check_idempotent requires an apply scenario",
                    self.name
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for output in &self.outputs {
            if !seen.insert(output.name.as_str()) {
                return Err(Error::Config(format!(
                    "Scenario '{}': output '{}' is asserted twice",
                    self.name, output.name
                )));
            }
        }

        Ok(())
    }

    /// Invocation options for this scenario
    pub fn tool_options(&self) -> ToolOptions {
        ToolOptions {
            working_dir: self.working_dir.clone(),
            no_color: self.no_color,
            plan_file: self.plan_file.clone(),
            vars: self.vars.clone(),
            env: self.env.clone(),
        }
    }
}

/// Collect scenario files from files and directories (`*.yaml`, `*.yml`),
/// sorted within each directory
pub fn discover(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.is_file()
                        && matches!(
                            p.extension().and_then(|e| e.to_str()),
                            Some("yaml") | Some("yml")
                        )
                })
                .collect();
            entries.sort();
            found.extend(entries);
        } else if path.exists() {
            found.push(path.clone());
        } else {
            return Err(Error::Config(format!(
                "Scenario path '{}' does not exist",
                path.display()
            )));
        }
    }

    if found.is_empty() {
        return Err(Error::Config("No scenario files found".to_string()));
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply_scenario() {
        let scenario = ScenarioConfig::from_yaml(
            r#"
name: vlan-basic
description: Creates a single VLAN and checks its outputs
working_dir: ../examples/basic
vars:
  vlan_id: "100"
outputs:
  - name: vlan
    required_keys: [id, name, vlan]
    values:
      vlan: "100"
"#,
            Path::new("/repo/test"),
        )
        .unwrap();

        assert_eq!(scenario.kind, ScenarioKind::Apply);
        assert!(scenario.no_color);
        assert_eq!(scenario.working_dir, PathBuf::from("/repo/test/../examples/basic"));
        assert_eq!(scenario.outputs.len(), 1);

        let output = &scenario.outputs[0];
        assert_eq!(output.shape, OutputShape::Map);
        assert!(output.non_empty);
        assert_eq!(output.required_keys, vec!["id", "name", "vlan"]);
        assert_eq!(output.values["vlan"], "100");

        let options = scenario.tool_options();
        assert_eq!(options.vars["vlan_id"], "100");
        assert!(options.plan_file.is_none());
    }

    #[test]
    fn test_parse_plan_scenario_with_alias() {
        let scenario = ScenarioConfig::from_yaml(
            "name: plan\nkind: plan_only\nworking_dir: /abs/basic\nplan_file: ./plan\n",
            Path::new("/repo/test"),
        )
        .unwrap();
        assert_eq!(scenario.kind, ScenarioKind::Plan);
        assert_eq!(scenario.working_dir, PathBuf::from("/abs/basic"));
        assert_eq!(scenario.plan_file, Some(PathBuf::from("./plan")));
    }

    #[test]
    fn test_outputs_rejected_outside_apply() {
        let err = ScenarioConfig::from_yaml(
            "name: v\nkind: validate\nworking_dir: .\noutputs:\n  - name: vlan\n",
            Path::new("."),
        )
        .unwrap_err();
        assert!(err.to_string().contains("only be asserted in an apply scenario"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = ScenarioConfig::from_yaml(
            "name: v\nworking_dir: .\nterraform_dir: ../examples\n",
            Path::new("."),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let err = ScenarioConfig::from_yaml(
            "name: v\nworking_dir: .\noutputs:\n  - name: vlan\n  - name: vlan\n",
            Path::new("."),
        )
        .unwrap_err();
        assert!(err.to_string().contains("asserted twice"));
    }

    #[test]
    fn test_discover_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "").unwrap();
        std::fs::write(dir.path().join("a.yml"), "").unwrap();
        std::fs::write(dir.path().join("notes.md"), "").unwrap();

        let found = discover(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.yml", "b.yaml"]);
    }

    #[test]
    fn test_discover_missing_path() {
        assert!(discover(&[PathBuf::from("/nonexistent/scenarios")]).is_err());
    }

    #[test]
    fn test_bundled_scenarios_load() {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        let scenarios: Vec<ScenarioConfig> = discover(&[dir])
            .unwrap()
            .iter()
            .map(|p| ScenarioConfig::load(p).unwrap())
            .collect();

        let kinds: Vec<_> = scenarios.iter().map(|s| (s.name.as_str(), s.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("vlan-basic", ScenarioKind::Apply),
                ("vlan-multiple", ScenarioKind::Apply),
                ("vlan-plan-only", ScenarioKind::Plan),
                ("vlan-validation", ScenarioKind::Validate),
            ]
        );
        assert_eq!(scenarios[1].outputs[0].shape, OutputShape::Json);
    }
}
