//! vlan-e2e - lifecycle test harness for the Proxmox network VLAN module
//!
//! Drives Terraform through init, validate, plan, apply, output and destroy
//! for each scenario, and fails loudly when the module breaks its contract.

use clap::Parser;
use std::path::PathBuf;
use vlan_e2e::commands::Commands;
use vlan_e2e::{cli, common::logging};

#[derive(Parser)]
#[command(name = "vlan-e2e", about = "Lifecycle test harness for the Proxmox VLAN module")]
#[command(version, long_about = None)]
struct Cli {
    /// Config file (default: platform config dir, vlan-e2e/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to a file (default location if no path is given)
    #[arg(long, global = true)]
    log_file: Option<Option<PathBuf>>,

    /// Debug-level logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_path = match cli.log_file {
        Some(Some(path)) => Some(path),
        Some(None) => logging::default_log_path(),
        None => None,
    };
    let log_guard = logging::init_cli(cli.debug, log_path.as_deref());

    let result = cli::dispatch(cli.command, cli.config.as_deref()).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        // process::exit skips destructors; flush the log file first
        drop(log_guard);
        std::process::exit(1);
    }
}
