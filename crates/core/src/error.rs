//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
///
/// `InsufficientStock`, `VersionConflict`, `InvalidTransition` and
/// `InvalidArgument` are caller errors; `VersionConflict` is the only one a
/// caller can resolve by re-reading and retrying. `DuplicateRecord` is raised
/// when two writers race to create the same uniquely-keyed record; the loser
/// re-fetches instead of retrying the insert.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A referenced record (inventory entry, purchase order, item, recommendation) is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input was rejected before touching any state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Available quantity does not cover the request.
    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: Decimal, requested: Decimal },

    /// Optimistic concurrency check failed (stale version).
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    /// The current lifecycle status does not allow the requested operation.
    #[error("cannot {operation} while {status}")]
    InvalidTransition { status: String, operation: String },

    /// A referenced record is in a state that forbids the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A uniquely-keyed record already exists.
    #[error("duplicate record: {0}")]
    DuplicateRecord(String),
}

impl DomainError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn insufficient_stock(available: Decimal, requested: Decimal) -> Self {
        Self::InsufficientStock {
            available,
            requested,
        }
    }

    pub fn version_conflict(expected: u64, actual: u64) -> Self {
        Self::VersionConflict { expected, actual }
    }

    pub fn invalid_transition(status: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::InvalidTransition {
            status: status.into(),
            operation: operation.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::DuplicateRecord(msg.into())
    }

    /// Whether a caller may succeed by re-reading current state and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::DuplicateRecord(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_reports_both_quantities() {
        let err = DomainError::insufficient_stock(Decimal::new(40, 0), Decimal::new(80, 0));
        assert_eq!(err.to_string(), "insufficient stock: available 40, requested 80");
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(DomainError::version_conflict(0, 1).is_retryable());
        assert!(DomainError::duplicate("inventory").is_retryable());
        assert!(!DomainError::invalid_argument("quantity").is_retryable());
        assert!(!DomainError::invalid_transition("received", "approve").is_retryable());
    }
}
