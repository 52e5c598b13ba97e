//! Error types for Keystone operations.
//!
//! Errors are split the same way the storage layer reports them:
//!
//! - **`Error`**: failures that stop the requested operation (missing entity,
//!   id collision, database failure, ...)
//! - **`BatchFailure`**: per-item failures collected by batch execution and
//!   import; the batch keeps going and reports them at the end
//!
//! ## Error Categorization
//!
//! `BatchErrorKind` uses a 4xx/5xx style categorization:
//! - Input problems (caller's fault): missing ids, collisions, rule violations
//! - Internal problems (our fault): database or serialization failures

use thiserror::Error;

use crate::types::EntityId;

/// Result type for Keystone operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Keystone operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An entity or relation referenced by id does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Create attempted with an id (or identity) that is already taken
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A structural rule was broken (blocked delete, missing endpoint, self-loop)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The graph is not acyclic; carries the members of one offending cycle
    #[error("cycle detected among {} entities: {}", cycle.len(), format_cycle(cycle))]
    CycleDetected {
        /// Entities forming the cycle
        cycle: Vec<EntityId>,
    },

    /// Commit, rollback or CRUD attempted on a finished transaction
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The store is closed or the database could not be reached
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed caller input (empty identifier, confidence out of range, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A traversal or snapshot ceiling was exceeded
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant failure (poisoned lock, inconsistent snapshot)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` for [`Error::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` for id collisions.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Returns `true` if this error came from the input rather than the engine.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        BatchErrorKind::from(self).is_input_error()
    }
}

fn format_cycle(cycle: &[EntityId]) -> String {
    cycle
        .iter()
        .map(EntityId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A single operation that failed inside a batch.
///
/// Failures are collected while the rest of the batch continues. The caller
/// inspects them to decide whether the committed result is acceptable.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// Position of the operation in the submitted batch
    pub index: usize,
    /// Category of the error
    pub kind: BatchErrorKind,
    /// Human-readable error message
    pub message: String,
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation #{}: {} ({})", self.index, self.message, self.kind)
    }
}

impl std::error::Error for BatchFailure {}

impl BatchFailure {
    /// Build a failure record from the error an operation returned.
    #[must_use]
    pub fn new(index: usize, error: &Error) -> Self {
        Self {
            index,
            kind: BatchErrorKind::from(error),
            message: error.to_string(),
        }
    }
}

/// Categorization of batch item failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchErrorKind {
    // === Input Problems (analogous to HTTP 4xx) ===
    /// Referenced entity or relation does not exist
    NotFound,

    /// Id or identity already taken
    AlreadyExists,

    /// Structural rule broken
    ConstraintViolation,

    /// Malformed input
    InvalidInput,

    // === Internal Problems (analogous to HTTP 5xx) ===
    /// Database operation failed
    DatabaseError,

    /// Anything else the engine could not complete
    InternalError,
}

impl From<&Error> for BatchErrorKind {
    fn from(error: &Error) -> Self {
        match error {
            Error::NotFound(_) => Self::NotFound,
            Error::AlreadyExists(_) => Self::AlreadyExists,
            Error::ConstraintViolation(_) | Error::CycleDetected { .. } => {
                Self::ConstraintViolation
            }
            Error::InvalidInput(_) | Error::LimitExceeded(_) | Error::Config(_) => {
                Self::InvalidInput
            }
            Error::Database(_) | Error::Connection(_) | Error::Transaction(_) => {
                Self::DatabaseError
            }
            Error::Serialization(_) | Error::Io(_) | Error::Internal(_) => Self::InternalError,
        }
    }
}

impl std::fmt::Display for BatchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::ConstraintViolation => write!(f, "constraint violation"),
            Self::InvalidInput => write!(f, "invalid input"),
            Self::DatabaseError => write!(f, "database error"),
            Self::InternalError => write!(f, "internal error"),
        }
    }
}

impl BatchErrorKind {
    /// Returns `true` if this is an input problem (4xx-style).
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::AlreadyExists | Self::ConstraintViolation | Self::InvalidInput
        )
    }

    /// Returns `true` if this is an internal problem (5xx-style).
    #[must_use]
    pub fn is_internal_error(&self) -> bool {
        matches!(self, Self::DatabaseError | Self::InternalError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_error_kind_categorization() {
        // Input errors (4xx-style)
        assert!(BatchErrorKind::NotFound.is_input_error());
        assert!(BatchErrorKind::AlreadyExists.is_input_error());
        assert!(BatchErrorKind::ConstraintViolation.is_input_error());
        assert!(!BatchErrorKind::NotFound.is_internal_error());

        // Internal errors (5xx-style)
        assert!(BatchErrorKind::DatabaseError.is_internal_error());
        assert!(BatchErrorKind::InternalError.is_internal_error());
        assert!(!BatchErrorKind::DatabaseError.is_input_error());
    }

    #[test]
    fn batch_failure_display_includes_index_and_kind() {
        let failure = BatchFailure::new(3, &Error::NotFound("entity ent-123".to_string()));

        let display = failure.to_string();
        assert!(display.contains("#3"));
        assert!(display.contains("ent-123"));
        assert!(display.contains("not found"));
    }

    #[test]
    fn cycle_detected_lists_members() {
        let error = Error::CycleDetected {
            cycle: vec![EntityId::from("ent-a"), EntityId::from("ent-b")],
        };

        let display = error.to_string();
        assert!(display.contains("2 entities"));
        assert!(display.contains("ent-a -> ent-b"));
    }

    #[test]
    fn error_predicates() {
        assert!(Error::NotFound("x".into()).is_not_found());
        assert!(Error::AlreadyExists("x".into()).is_conflict());
        assert!(Error::InvalidInput("x".into()).is_input_error());
        assert!(!Error::Internal("x".into()).is_input_error());
    }
}
