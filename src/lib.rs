//! vlan-e2e - lifecycle test harness for the Proxmox network VLAN module
//!
//! This library drives a Terraform-compatible tool through a module's
//! lifecycle, retries known-transient failures, and asserts on the module's
//! outputs, guaranteeing that anything it applied is destroyed again.

pub mod cli;
pub mod commands;
pub mod common;
pub mod testing;
pub mod tool;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use testing::{Harness, ScenarioConfig, ScenarioReport};
