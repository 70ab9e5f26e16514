//! Failure classification
//!
//! Decides whether a failed tool run is worth retrying by matching its
//! captured output against a table of regex signatures. Anything unmatched
//! is fatal.

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{Error, Result};

/// Whether a failure is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Fatal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Fatal => f.write_str("fatal"),
        }
    }
}

/// Known transient failures of Terraform and its provider plumbing,
/// as `(pattern, description)`
pub const DEFAULT_RETRYABLE_ERRORS: &[(&str, &str)] = &[
    // Provider downloads flake constantly in CI
    (
        "unable to verify signature",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        "unable to verify checksum",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        "no provider exists with the given name",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        "registry service is unreachable",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        "Error installing provider",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        "Failed to query available provider packages",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        "timeout while waiting for plugin to start",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        "timed out waiting for server handshake",
        "Failed to retrieve plugin due to transient network error",
    ),
    (
        "could not query provider registry for",
        "Failed to retrieve plugin due to transient network error",
    ),
    // Hypervisor API
    ("read: connection reset by peer", "Connection reset by remote API"),
    ("transport is closing", "Connection to remote API closed"),
    ("TLS handshake timeout", "Remote API TLS handshake timed out"),
    ("(?i)429 too many requests|rate limit(ed|ing)? exceeded", "API rate limiting"),
    (
        "Provider produced inconsistent result after apply",
        "Provider eventual consistency error",
    ),
    // Another process holds the state lock
    ("Error acquiring the state lock", "State lock held by another process"),
];

/// Verdict for one failed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: FailureKind,
    /// Description of the signature that made it transient
    pub signature: Option<String>,
}

impl Classification {
    fn fatal() -> Self {
        Self {
            kind: FailureKind::Fatal,
            signature: None,
        }
    }

    fn transient(description: &str) -> Self {
        Self {
            kind: FailureKind::Transient,
            signature: Some(description.to_string()),
        }
    }
}

/// Table of transient failure signatures
#[derive(Debug, Clone)]
pub struct Classifier {
    patterns: Vec<(Regex, String)>,
    set: RegexSet,
}

impl Classifier {
    /// Build a classifier from `(pattern, description)` pairs.
    /// Fails on the first pattern that is not a valid regex.
    pub fn new<I, P, D>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, D)>,
        P: AsRef<str>,
        D: Into<String>,
    {
        let mut compiled = Vec::new();
        for (pattern, description) in patterns {
            let pattern = pattern.as_ref();
            let regex = Regex::new(pattern).map_err(|e| Error::invalid_pattern(pattern, e))?;
            compiled.push((regex, description.into()));
        }

        let set = RegexSet::new(compiled.iter().map(|(r, _)| r.as_str()))
            .map_err(|e| Error::Internal(format!("Failed to build pattern set: {}", e)))?;

        Ok(Self {
            patterns: compiled,
            set,
        })
    }

    /// Classifier seeded with [`DEFAULT_RETRYABLE_ERRORS`]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_RETRYABLE_ERRORS.iter().copied())
            .expect("built-in retryable error patterns are valid")
    }

    /// Classifier that treats every failure as fatal
    pub fn fatal_only() -> Self {
        Self {
            patterns: Vec::new(),
            set: RegexSet::empty(),
        }
    }

    /// Add more `(pattern, description)` pairs on top of this table
    pub fn extend<I, P, D>(&self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, D)>,
        P: AsRef<str>,
        D: Into<String>,
    {
        let existing = self
            .patterns
            .iter()
            .map(|(r, d)| (r.as_str().to_string(), d.clone()));
        let extra: Vec<(String, String)> = patterns
            .into_iter()
            .map(|(p, d)| (p.as_ref().to_string(), d.into()))
            .collect();

        Self::new(existing.chain(extra))
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Classify a failed run from its captured output
    pub fn classify(&self, stdout: &str, stderr: &str) -> Classification {
        for text in [stderr, stdout] {
            if let Some(index) = self.set.matches(text).into_iter().next() {
                return Classification::transient(&self.patterns[index].1);
            }
        }

        Classification::fatal()
    }
}
