//! Error types shared by the configuration stores, monitor and watch adapter.

use std::fmt;

use thiserror::Error;

/// Aggregate validation failure.
///
/// Validators never stop at the first problem: every violated rule is pushed
/// here so one submission reports everything that is wrong with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<String>,
}

impl ValidationErrors {
    /// Creates an empty error set.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Records one violation.
    pub fn push(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Merges the violations of a nested check, if any.
    pub fn merge<E: Into<ValidationErrors>>(&mut self, result: std::result::Result<(), E>) {
        if let Err(nested) = result {
            self.errors.extend(nested.into().errors);
        }
    }

    /// Merges the violations of a nested check, prefixing each message.
    pub fn merge_prefixed<E: Into<ValidationErrors>>(
        &mut self,
        prefix: &str,
        result: std::result::Result<(), E>,
    ) {
        if let Err(nested) = result {
            self.errors.extend(
                nested
                    .into()
                    .errors
                    .into_iter()
                    .map(|e| format!("{}{}", prefix, e)),
            );
        }
    }

    /// Returns true if no violation was recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded violations.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// The recorded messages, in discovery order.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Converts into `Ok(())` when empty, `Err(self)` otherwise.
    pub fn into_result(self) -> std::result::Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<String> for ValidationErrors {
    fn from(message: String) -> Self {
        Self {
            errors: vec![message],
        }
    }
}

impl From<&str> for ValidationErrors {
    fn from(message: &str) -> Self {
        Self::from(message.to_string())
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "no validation errors"),
            1 => write!(f, "{}", self.errors[0]),
            n => write!(f, "{} errors occurred: {}", n, self.errors.join("; ")),
        }
    }
}

impl std::error::Error for ValidationErrors {}

/// Errors surfaced by configuration stores and their caches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    #[error("undeclared type: {0:?}")]
    UnknownType(String),

    #[error("invalid nil configuration object")]
    NilPayload,

    #[error("mismatched message type {actual:?} and type {expected:?}")]
    SchemaMismatch { expected: String, actual: String },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("config not found: {kind}/{key}")]
    NotFound { kind: String, key: String },

    #[error("config already exists: {kind}/{key}")]
    AlreadyExists { kind: String, key: String },

    #[error("revision mismatch for {kind}/{key}: expected {expected:?}, found {actual:?}")]
    RevisionConflict {
        kind: String,
        key: String,
        expected: String,
        actual: String,
    },

    #[error("backend error: {0}")]
    TransientBackend(String),

    #[error("waiting till full synchronization")]
    NotYetSynchronized,
}

impl ConfigError {
    /// Returns true if the error is transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConfigError::TransientBackend(_) | ConfigError::NotYetSynchronized
        )
    }
}

/// Result type for configuration store operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
