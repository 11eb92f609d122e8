//! Collaborators shared by every service, and the commit/rollback step.

use std::sync::Arc;

use tracing::warn;

use stockroom_core::Clock;

use crate::audit::{AuditEntry, AuditSink, record_best_effort};
use crate::error::ServiceResult;
use crate::store::{Store, UnitOfWork};

#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub audit: Arc<dyn AuditSink>,
}

impl ServiceContext {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            clock,
            audit,
        }
    }

    pub(crate) async fn audit(&self, entry: AuditEntry) {
        record_best_effort(self.audit.as_ref(), entry).await;
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext").finish_non_exhaustive()
    }
}

/// Commit on success, roll back on failure.
///
/// A failed rollback is only logged: the original error is what the caller
/// needs, and the backend discards an abandoned transaction anyway.
pub(crate) async fn complete<T>(
    uow: Box<dyn UnitOfWork>,
    result: ServiceResult<T>,
) -> ServiceResult<T> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            warn!(error = %err, "operation rejected, rolling back");
            if let Err(rollback) = uow.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}
