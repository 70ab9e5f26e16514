//! Error types for the harness
//!
//! Each layer owns its error type so a report can say exactly what went
//! wrong: the tool failed ([`InvocationError`]), an output could not be read
//! ([`ExtractionError`]), or the module broke its contract ([`AssertionError`]).
//! [`ScenarioError`] pins any of them to the lifecycle step that failed.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::tool::{FailureKind, Step};

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of stderr characters kept in an invocation error
const EXCERPT_CHARS: usize = 600;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Layer Errors ===
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Assertion(#[from] AssertionError),

    #[error("Cancelled before the {0} step could start")]
    Cancelled(Step),

    // === Tool Errors ===
    #[error("Provisioning tool '{name}' not found. Install it or set [tool] binary in the config file")]
    ToolNotFound { name: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid retryable error pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Suite Errors ===
    #[error("{failed} of {total} scenario(s) failed")]
    ScenariosFailed { failed: usize, total: usize },

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid pattern error
    pub fn invalid_pattern(pattern: &str, reason: impl ToString) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The invocation failure behind this error, if any
    pub fn invocation(&self) -> Option<&InvocationError> {
        match self {
            Error::Invocation(e) => Some(e),
            _ => None,
        }
    }
}

/// A failed run of the provisioning tool
///
/// Transient failures are retried inside the invocation layer, so a caller
/// only ever sees `kind == Transient` when the scenario was cancelled
/// between attempts. Exhausted retries surface as `Fatal` with
/// `retries_exhausted` set.
#[derive(Error, Debug, Clone)]
#[error(
    "{step} failed ({kind}) with {} after {attempts} attempt(s){}: {stderr_excerpt}",
    describe_exit(.exit_code),
    describe_signature(.signature, .retries_exhausted)
)]
pub struct InvocationError {
    pub kind: FailureKind,
    pub step: Step,
    /// `None` when the process could not be spawned or was killed by a signal
    pub exit_code: Option<i32>,
    pub attempts: u32,
    pub stderr_excerpt: String,
    /// Description of the transient signature that matched, if any
    pub signature: Option<String>,
    pub retries_exhausted: bool,
    /// Wall time from the first attempt until the failure was given up on
    pub elapsed: Duration,
}

impl InvocationError {
    /// Failure to start the tool at all
    pub fn spawn(
        step: Step,
        program: &std::path::Path,
        error: &io::Error,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            kind: FailureKind::Fatal,
            step,
            exit_code: None,
            attempts,
            stderr_excerpt: format!("failed to run '{}': {}", program.display(), error),
            signature: None,
            retries_exhausted: false,
            elapsed,
        }
    }

    /// Keep the tail of stderr, where the tool prints its final error
    pub fn excerpt(stderr: &str) -> String {
        let trimmed = stderr.trim();
        let count = trimmed.chars().count();
        if count <= EXCERPT_CHARS {
            return trimmed.to_string();
        }
        let tail: String = trimmed.chars().skip(count - EXCERPT_CHARS).collect();
        format!("...{}", tail)
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}

fn describe_signature(signature: &Option<String>, exhausted: &bool) -> String {
    match (signature, *exhausted) {
        (Some(sig), true) => format!(" (retries exhausted: {})", sig),
        (Some(sig), false) => format!(" ({})", sig),
        (None, _) => String::new(),
    }
}

/// A named output could not be read from the tool's result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Output '{name}' not found. Available: {available:?}")]
    Missing { name: String, available: Vec<String> },

    #[error("Output '{name}' is not well-formed: {reason}")]
    Malformed { name: String, reason: String },
}

/// An extracted output broke the module's interface contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssertionError {
    #[error("Output '{output}' should not be empty")]
    Empty { output: String },

    #[error("Output '{output}' is missing keys {missing_keys:?}")]
    MissingKeys {
        output: String,
        missing_keys: Vec<String>,
    },

    #[error("Output '{output}' has unexpected values: {}", describe_mismatches(.mismatches))]
    ValueMismatch {
        output: String,
        mismatches: Vec<ValueMismatch>,
    },

    #[error("Plan after apply still reports pending changes (exit code {exit_code})")]
    NotIdempotent { exit_code: i32 },
}

/// One key whose value did not match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueMismatch {
    pub key: String,
    pub expected: String,
    /// `None` when the key is absent
    pub actual: Option<String>,
}

fn describe_mismatches(mismatches: &[ValueMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| match &m.actual {
            Some(actual) => format!("{}: expected '{}', got '{}'", m.key, m.expected, actual),
            None => format!("{}: expected '{}', key absent", m.key, m.expected),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Terminal failure of a scenario, tagged with the step that failed
#[derive(Error, Debug)]
#[error("{step} step failed: {source}")]
pub struct ScenarioError {
    pub step: Step,
    #[source]
    pub source: Error,
}

impl ScenarioError {
    pub fn new(step: Step, source: impl Into<Error>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }

    /// Exit code of the failed invocation, if the tool ran
    pub fn exit_code(&self) -> Option<i32> {
        self.source.invocation().and_then(|e| e.exit_code)
    }

    /// Tail of the tool's stderr, if the failure came from an invocation
    pub fn stderr_excerpt(&self) -> Option<&str> {
        self.source
            .invocation()
            .map(|e| e.stderr_excerpt.as_str())
            .filter(|s| !s.is_empty())
    }
}
