//! CLI command definitions
//!
//! Defines the clap commands for the harness CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run test scenarios defined in YAML files
    Test {
        /// Scenario files, or directories containing *.yaml scenarios
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Number of scenarios to run in parallel (default from config: 4)
        #[arg(long, short)]
        jobs: Option<usize>,

        /// Cancel the run after this many seconds; applied scenarios still destroy
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Show every step of every scenario
        #[arg(long, short)]
        verbose: bool,
    },

    /// Destroy everything a module directory provisioned (recovers leaked scenarios)
    Destroy {
        /// Module directory that was applied
        working_dir: PathBuf,

        /// Input variables the module was applied with (key=value)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Keep ANSI colors in tool output
        #[arg(long)]
        color: bool,
    },

    /// Show the effective configuration
    Config,
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("vlan_id=100"),
            Ok(("vlan_id".to_string(), "100".to_string()))
        );
        assert_eq!(
            parse_var("comment=a=b"),
            Ok(("comment".to_string(), "a=b".to_string()))
        );
        assert!(parse_var("=100").is_err());
        assert!(parse_var("vlan_id").is_err());
    }
}
