//! Service-level error type and its client-facing classification.

use thiserror::Error;

use stockroom_advisor::AdvisorError;
use stockroom_core::DomainError;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Persistence failed for a reason other than a conflict or duplicate.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A collaborator (forecast provider) failed or timed out.
    #[error("upstream failure: {0}")]
    Upstream(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// How a failure surfaces to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ClientError,
    NotFound,
    ServerError,
}

impl ServiceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ServiceError::Domain(DomainError::NotFound(_)) => ErrorClass::NotFound,
            ServiceError::Domain(_) => ErrorClass::ClientError,
            ServiceError::Storage(_) | ServiceError::Upstream(_) => ErrorClass::ServerError,
        }
    }

    /// Message safe to show a client; server errors carry no internal detail.
    pub fn public_message(&self) -> String {
        match self.class() {
            ErrorClass::ServerError => "internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the caller may retry after re-reading state.
    pub fn is_retryable(&self) -> bool {
        self.domain().is_some_and(DomainError::is_retryable)
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict {
                expected, actual, ..
            } => ServiceError::Domain(DomainError::version_conflict(expected, actual)),
            StoreError::Duplicate(what) => ServiceError::Domain(DomainError::duplicate(what)),
            StoreError::Backend(msg) => ServiceError::Storage(msg),
        }
    }
}

impl From<AdvisorError> for ServiceError {
    fn from(err: AdvisorError) -> Self {
        match err {
            AdvisorError::InvalidInput(msg) => {
                ServiceError::Domain(DomainError::invalid_argument(msg))
            }
            other => ServiceError::Upstream(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn classification_follows_taxonomy() {
        let cases = [
            (
                ServiceError::from(DomainError::not_found("purchase order")),
                ErrorClass::NotFound,
            ),
            (
                ServiceError::from(DomainError::insufficient_stock(dec!(40), dec!(80))),
                ErrorClass::ClientError,
            ),
            (
                ServiceError::from(DomainError::version_conflict(0, 1)),
                ErrorClass::ClientError,
            ),
            (
                ServiceError::from(DomainError::invalid_transition("draft", "receive")),
                ErrorClass::ClientError,
            ),
            (
                ServiceError::Storage("connection reset".into()),
                ErrorClass::ServerError,
            ),
        ];

        for (err, class) in cases {
            assert_eq!(err.class(), class, "{err}");
        }
    }

    #[test]
    fn server_errors_hide_detail() {
        let err = ServiceError::Storage("password authentication failed for user app".into());
        assert_eq!(err.public_message(), "internal server error");

        let err = ServiceError::from(DomainError::invalid_argument("quantity must be positive"));
        assert!(err.public_message().contains("quantity must be positive"));
    }

    #[test]
    fn store_conflicts_become_version_conflicts() {
        let err = ServiceError::from(StoreError::Conflict {
            entity: "inventory record".into(),
            expected: 3,
            actual: 4,
        });
        assert_eq!(
            err.domain(),
            Some(&DomainError::VersionConflict {
                expected: 3,
                actual: 4
            })
        );
        assert!(err.is_retryable());

        let err = ServiceError::from(StoreError::Duplicate("order number".into()));
        assert!(matches!(err.domain(), Some(DomainError::DuplicateRecord(_))));
    }
}
