//! Stock Ledger service: the single writer of inventory quantities.
//!
//! The `*_in` functions run inside a caller's unit of work so movements and
//! purchase order receipts can compose ledger mutations into one transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use stockroom_core::{AggregateRoot, DomainError, ExpectedVersion, TenantId, UserId};
use stockroom_inventory::{InventoryKey, InventoryRecord, StockThresholds};

use crate::audit::AuditEntry;
use crate::context::{ServiceContext, complete};
use crate::error::{ServiceError, ServiceResult};
use crate::store::{InventoryFilter, Pagination, UnitOfWork};

pub(crate) fn missing(key: InventoryKey) -> DomainError {
    DomainError::not_found(format!(
        "inventory for product {} in warehouse {}",
        key.product_id, key.warehouse_id
    ))
}

/// Existing entry for `key`, or a new zero entry staged for insert.
pub(crate) async fn get_or_create_in(
    uow: &mut dyn UnitOfWork,
    key: InventoryKey,
    now: DateTime<Utc>,
) -> ServiceResult<InventoryRecord> {
    if let Some(record) = uow.inventory(key).await? {
        return Ok(record);
    }
    let record = InventoryRecord::new(key, now);
    uow.insert_inventory(&record).await?;
    Ok(record)
}

/// Apply `delta` to `record` and stage the write under a CAS on the version read.
pub(crate) async fn apply_delta_in(
    uow: &mut dyn UnitOfWork,
    record: &InventoryRecord,
    delta: Decimal,
    expected: ExpectedVersion,
    now: DateTime<Utc>,
) -> ServiceResult<InventoryRecord> {
    let next = record.apply_delta(delta, expected, now).into_result()?;
    uow.update_inventory(&next, record.version()).await?;
    Ok(next)
}

/// Add received stock to `key`, creating the entry on first use.
///
/// Not version-checked: concurrent additions to the same entry all land.
/// Returns the row as written.
pub(crate) async fn add_stock_in(
    uow: &mut dyn UnitOfWork,
    key: InventoryKey,
    quantity: Decimal,
    now: DateTime<Utc>,
) -> ServiceResult<InventoryRecord> {
    get_or_create_in(&mut *uow, key, now).await?;
    Ok(uow.increment_inventory(key, quantity, now).await?)
}

#[derive(Debug, Clone)]
pub struct StockLedger {
    ctx: ServiceContext,
}

impl StockLedger {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, key: InventoryKey) -> ServiceResult<Option<InventoryRecord>> {
        Ok(self.ctx.store.inventory(key).await?)
    }

    /// Existing entry, or a new one persisted immediately with quantity 0.
    ///
    /// Two concurrent creators race on the unique key; the loser gets
    /// `DuplicateRecord` and should re-fetch.
    #[instrument(
        skip(self),
        fields(tenant_id = %key.tenant_id, product_id = %key.product_id, warehouse_id = %key.warehouse_id),
        err
    )]
    pub async fn get_or_create(&self, key: InventoryKey) -> ServiceResult<InventoryRecord> {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let result = get_or_create_in(uow.as_mut(), key, now).await;
        complete(uow, result).await
    }

    /// Quantity not held by reservations; zero when no entry exists.
    pub async fn available_quantity(&self, key: InventoryKey) -> ServiceResult<Decimal> {
        Ok(self
            .get(key)
            .await?
            .map_or(Decimal::ZERO, |record| record.available_quantity()))
    }

    /// Adjust the on-hand quantity directly, outside any movement.
    #[instrument(
        skip(self),
        fields(tenant_id = %key.tenant_id, product_id = %key.product_id, warehouse_id = %key.warehouse_id),
        err
    )]
    pub async fn apply_delta(
        &self,
        key: InventoryKey,
        delta: Decimal,
        expected: ExpectedVersion,
        actor: UserId,
    ) -> ServiceResult<InventoryRecord> {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let result = async {
            let record = uow.inventory(key).await?.ok_or_else(|| missing(key))?;
            apply_delta_in(uow.as_mut(), &record, delta, expected, now).await
        }
        .await;
        let record = complete(uow, result).await?;

        info!(quantity = %record.quantity(), version = record.version(), "inventory adjusted");
        self.audit(&record, actor, "inventory.adjusted", json!({ "delta": delta }), now)
            .await;
        Ok(record)
    }

    #[instrument(
        skip(self),
        fields(tenant_id = %key.tenant_id, product_id = %key.product_id, warehouse_id = %key.warehouse_id),
        err
    )]
    pub async fn reserve(
        &self,
        key: InventoryKey,
        amount: Decimal,
        expected: ExpectedVersion,
        actor: UserId,
    ) -> ServiceResult<InventoryRecord> {
        let record = self
            .mutate(key, |record, now| record.reserve(amount, expected, now))
            .await?;
        self.audit(
            &record,
            actor,
            "inventory.reserved",
            json!({ "amount": amount, "reserved_quantity": record.reserved_quantity() }),
            record.meta().updated_at,
        )
        .await;
        Ok(record)
    }

    #[instrument(
        skip(self),
        fields(tenant_id = %key.tenant_id, product_id = %key.product_id, warehouse_id = %key.warehouse_id),
        err
    )]
    pub async fn release(
        &self,
        key: InventoryKey,
        amount: Decimal,
        expected: ExpectedVersion,
        actor: UserId,
    ) -> ServiceResult<InventoryRecord> {
        let record = self
            .mutate(key, |record, now| record.release(amount, expected, now))
            .await?;
        self.audit(
            &record,
            actor,
            "inventory.released",
            json!({ "amount": amount, "reserved_quantity": record.reserved_quantity() }),
            record.meta().updated_at,
        )
        .await;
        Ok(record)
    }

    #[instrument(
        skip(self, thresholds),
        fields(tenant_id = %key.tenant_id, product_id = %key.product_id, warehouse_id = %key.warehouse_id),
        err
    )]
    pub async fn set_thresholds(
        &self,
        key: InventoryKey,
        thresholds: StockThresholds,
        expected: ExpectedVersion,
        actor: UserId,
    ) -> ServiceResult<InventoryRecord> {
        let changes = json!({
            "minimum_stock": thresholds.minimum_stock,
            "safety_stock": thresholds.safety_stock,
            "reorder_point": thresholds.reorder_point,
        });
        let record = self
            .mutate(key, move |record, now| {
                record.with_thresholds(thresholds, expected, now)
            })
            .await?;
        self.audit(
            &record,
            actor,
            "inventory.thresholds_updated",
            changes,
            record.meta().updated_at,
        )
        .await;
        Ok(record)
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        filter: &InventoryFilter,
        page: Pagination,
    ) -> ServiceResult<Vec<InventoryRecord>> {
        Ok(self.ctx.store.list_inventory(tenant_id, filter, page).await?)
    }

    async fn mutate<F>(&self, key: InventoryKey, change: F) -> ServiceResult<InventoryRecord>
    where
        F: FnOnce(&InventoryRecord, DateTime<Utc>) -> Result<InventoryRecord, DomainError> + Send,
    {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let result = async {
            let current = uow.inventory(key).await?.ok_or_else(|| missing(key))?;
            let next = change(&current, now)?;
            uow.update_inventory(&next, current.version()).await?;
            Ok::<_, ServiceError>(next)
        }
        .await;
        let record = complete(uow, result).await?;
        info!(version = record.version(), "inventory updated");
        Ok(record)
    }

    async fn audit(
        &self,
        record: &InventoryRecord,
        actor: UserId,
        action: &str,
        mut changes: serde_json::Value,
        at: DateTime<Utc>,
    ) {
        if let Some(map) = changes.as_object_mut() {
            map.insert("quantity".into(), json!(record.quantity()));
            map.insert("version".into(), json!(record.version()));
        }
        self.ctx
            .audit(AuditEntry {
                tenant_id: record.meta().tenant_id,
                actor,
                action: action.to_string(),
                entity_type: "inventory_record",
                entity_id: Uuid::from(record.meta().id),
                changes,
                recorded_at: at,
            })
            .await;
    }
}
