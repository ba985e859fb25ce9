//! Error taxonomy for the change-detection engine.
//!
//! Only [`ConfigError`] ever reaches a caller as a hard failure. Parse errors
//! advance the adapter fallback chain, provider errors degrade a file to its
//! deterministic result, and classification errors drop a single rule.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A single parse strategy could not produce a usable node tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{strategy}: grammar could not be loaded: {reason}")]
    Grammar {
        strategy: &'static str,
        reason: String,
    },
    #[error("{strategy}: parser produced no tree")]
    NoTree { strategy: &'static str },
    #[error("{strategy}: syntax error at line {line}")]
    Syntax { strategy: &'static str, line: usize },
    #[error("{strategy}: legacy construct `{construct}` at line {line}")]
    LegacyConstruct {
        strategy: &'static str,
        construct: String,
        line: usize,
    },
    #[error("{strategy}: syntax errors cover {error_bytes} of {total_bytes} bytes")]
    TooManyErrors {
        strategy: &'static str,
        error_bytes: usize,
        total_bytes: usize,
    },
    #[error("{strategy}: no declarations or imports found")]
    NothingExtracted { strategy: &'static str },
    #[error("fallback chain has no strategies")]
    Exhausted,
}

/// Errors from an external interpretation provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("authentication rejected by provider")]
    Auth,
    #[error("rate limited by provider")]
    RateLimited,
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("call budget exhausted")]
    BudgetExhausted,
    #[error("cancelled")]
    Cancelled,
    #[error("no providers configured")]
    NoProviders,
}

impl ProviderError {
    /// Whether retrying the same provider could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::Timeout(_)
                | ProviderError::RateLimited
                | ProviderError::Unavailable(_)
        )
    }
}

/// A single classification rule failed on one node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rule {rule} failed on {node_id}: {reason}")]
pub struct ClassificationError {
    pub rule: &'static str,
    pub node_id: String,
    pub reason: String,
}

impl ClassificationError {
    pub fn new(rule: &'static str, node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule,
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid engine configuration. Raised before any file is analysed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
