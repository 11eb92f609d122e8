//! Audit trail of committed mutations.
//!
//! Entries are emitted only after the owning transaction commits, and a sink
//! failure never fails the operation: it is logged and dropped.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stockroom_core::{TenantId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub tenant_id: TenantId,
    pub actor: UserId,
    /// Dotted action name, e.g. `inventory.movement.outbound`.
    pub action: String,
    pub entity_type: &'static str,
    pub entity_id: Uuid,
    pub changes: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
#[error("audit sink failed: {0}")]
pub struct AuditError(pub String);

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Writes entries as structured `tracing` events on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "audit",
            tenant_id = %entry.tenant_id,
            actor = %entry.actor,
            action = %entry.action,
            entity_type = entry.entity_type,
            entity_id = %entry.entity_id,
            changes = %entry.changes,
            "audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.action).collect()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .map_err(|_| AuditError("lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _entry: AuditEntry) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Record after commit; failures are logged, never returned.
pub(crate) async fn record_best_effort(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action.clone();
    let entity_id = entry.entity_id;
    if let Err(err) = sink.record(entry).await {
        tracing::warn!(%action, %entity_id, error = %err, "audit entry dropped");
    }
}
