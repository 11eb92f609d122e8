//! Movement Recorder: one or two ledger mutations plus one immutable
//! movement record, committed as a single unit of work.
//!
//! ```text
//! request ─ validate ─┬─ read source (outbound/transfer) ─ availability check
//!                     ├─ credit destination, created on first use (additive, unversioned)
//!                     ├─ debit source (CAS on the version read)
//!                     └─ insert MovementRecord ─ commit ─ audit
//! ```
//!
//! Any failure before commit discards every staged write, so a movement is
//! never logged without its ledger effect or the other way round.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use stockroom_core::{DomainError, MovementId, RecordMeta, TenantId};
use stockroom_inventory::{
    InboundRequest, InventoryKey, InventoryRecord, MovementRecord, MovementType, OutboundRequest,
    TransferRequest,
};

use crate::audit::AuditEntry;
use crate::context::{ServiceContext, complete};
use crate::error::ServiceResult;
use crate::ledger::{add_stock_in, apply_delta_in, missing};
use crate::store::{MovementFilter, Pagination, UnitOfWork};

/// Source entry for an outbound or transfer, checked against the requested quantity.
async fn checked_source(
    uow: &mut dyn UnitOfWork,
    key: InventoryKey,
    quantity: Decimal,
) -> ServiceResult<InventoryRecord> {
    let record = uow.inventory(key).await?.ok_or_else(|| missing(key))?;
    let available = record.available_quantity();
    if available < quantity {
        return Err(DomainError::insufficient_stock(available, quantity).into());
    }
    Ok(record)
}

/// Inbound inside an open unit of work; never version-checked.
pub(crate) async fn inbound_in(
    uow: &mut dyn UnitOfWork,
    request: &InboundRequest,
    now: DateTime<Utc>,
) -> ServiceResult<MovementRecord> {
    request.validate()?;
    let updated = add_stock_in(&mut *uow, request.destination(), request.quantity, now).await?;

    let movement = MovementRecord {
        meta: RecordMeta::new(MovementId::new(), request.tenant_id, now),
        movement_type: MovementType::Inbound,
        product_id: request.product_id,
        source_warehouse_id: None,
        destination_warehouse_id: Some(request.destination_warehouse_id),
        quantity: request.quantity,
        quantity_before: updated.quantity() - request.quantity,
        quantity_after: updated.quantity(),
        reference_number: request.reference_number.clone(),
        notes: request.notes.clone(),
        performed_by: request.performed_by,
        performed_at: now,
        approved_by: None,
        approved_at: None,
    };
    movement.validate_shape()?;
    uow.insert_movement(&movement).await?;
    Ok(movement)
}

async fn outbound_in(
    uow: &mut dyn UnitOfWork,
    request: &OutboundRequest,
    now: DateTime<Utc>,
) -> ServiceResult<MovementRecord> {
    let record = checked_source(&mut *uow, request.source(), request.quantity).await?;
    let updated = apply_delta_in(
        &mut *uow,
        &record,
        -request.quantity,
        request.expected_version.into(),
        now,
    )
    .await?;

    let movement = MovementRecord {
        meta: RecordMeta::new(MovementId::new(), request.tenant_id, now),
        movement_type: MovementType::Outbound,
        product_id: request.product_id,
        source_warehouse_id: Some(request.source_warehouse_id),
        destination_warehouse_id: None,
        quantity: request.quantity,
        quantity_before: record.quantity(),
        quantity_after: updated.quantity(),
        reference_number: request.reference_number.clone(),
        notes: request.notes.clone(),
        performed_by: request.performed_by,
        performed_at: now,
        approved_by: None,
        approved_at: None,
    };
    movement.validate_shape()?;
    uow.insert_movement(&movement).await?;
    Ok(movement)
}

async fn transfer_in(
    uow: &mut dyn UnitOfWork,
    request: &TransferRequest,
    now: DateTime<Utc>,
) -> ServiceResult<MovementRecord> {
    let source = checked_source(&mut *uow, request.source(), request.quantity).await?;
    let destination_after =
        add_stock_in(&mut *uow, request.destination(), request.quantity, now).await?;
    apply_delta_in(
        &mut *uow,
        &source,
        -request.quantity,
        request.expected_version.into(),
        now,
    )
    .await?;

    let movement = MovementRecord {
        meta: RecordMeta::new(MovementId::new(), request.tenant_id, now),
        movement_type: MovementType::Transfer,
        product_id: request.product_id,
        source_warehouse_id: Some(request.source_warehouse_id),
        destination_warehouse_id: Some(request.destination_warehouse_id),
        quantity: request.quantity,
        // Source before, destination after.
        quantity_before: source.quantity(),
        quantity_after: destination_after.quantity(),
        reference_number: request.reference_number.clone(),
        notes: request.notes.clone(),
        performed_by: request.performed_by,
        performed_at: now,
        approved_by: None,
        approved_at: None,
    };
    movement.validate_shape()?;
    uow.insert_movement(&movement).await?;
    Ok(movement)
}

pub(crate) fn movement_audit_entry(movement: &MovementRecord) -> AuditEntry {
    AuditEntry {
        tenant_id: movement.meta.tenant_id,
        actor: movement.performed_by,
        action: movement.movement_type.audit_action().to_string(),
        entity_type: "stock_movement",
        entity_id: Uuid::from(movement.meta.id),
        changes: json!({
            "product_id": movement.product_id,
            "source_warehouse_id": movement.source_warehouse_id,
            "destination_warehouse_id": movement.destination_warehouse_id,
            "quantity": movement.quantity,
            "quantity_before": movement.quantity_before,
            "quantity_after": movement.quantity_after,
            "reference_number": movement.reference_number,
        }),
        recorded_at: movement.performed_at,
    }
}

#[derive(Debug, Clone)]
pub struct MovementRecorder {
    ctx: ServiceContext,
}

impl MovementRecorder {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Receive stock, creating the destination entry on first use.
    #[instrument(
        skip(self, request),
        fields(
            tenant_id = %request.tenant_id,
            product_id = %request.product_id,
            warehouse_id = %request.destination_warehouse_id,
            quantity = %request.quantity,
        ),
        err
    )]
    pub async fn inbound(&self, request: InboundRequest) -> ServiceResult<MovementRecord> {
        request.validate()?;
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let result = inbound_in(uow.as_mut(), &request, now).await;
        let movement = complete(uow, result).await?;
        self.committed(&movement).await;
        Ok(movement)
    }

    /// Ship stock; fails `NotFound` without a source entry and
    /// `InsufficientStock` when available quantity falls short.
    #[instrument(
        skip(self, request),
        fields(
            tenant_id = %request.tenant_id,
            product_id = %request.product_id,
            warehouse_id = %request.source_warehouse_id,
            quantity = %request.quantity,
            expected_version = ?request.expected_version,
        ),
        err
    )]
    pub async fn outbound(&self, request: OutboundRequest) -> ServiceResult<MovementRecord> {
        request.validate()?;
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let result = outbound_in(uow.as_mut(), &request, now).await;
        let movement = complete(uow, result).await?;
        self.committed(&movement).await;
        Ok(movement)
    }

    /// Move stock between warehouses; both ledger entries change or neither does.
    #[instrument(
        skip(self, request),
        fields(
            tenant_id = %request.tenant_id,
            product_id = %request.product_id,
            source_warehouse_id = %request.source_warehouse_id,
            destination_warehouse_id = %request.destination_warehouse_id,
            quantity = %request.quantity,
            expected_version = ?request.expected_version,
        ),
        err
    )]
    pub async fn transfer(&self, request: TransferRequest) -> ServiceResult<MovementRecord> {
        request.validate()?;
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let result = transfer_in(uow.as_mut(), &request, now).await;
        let movement = complete(uow, result).await?;
        self.committed(&movement).await;
        Ok(movement)
    }

    /// Movement history, newest first.
    pub async fn history(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        page: Pagination,
    ) -> ServiceResult<Vec<MovementRecord>> {
        Ok(self.ctx.store.movements(tenant_id, filter, page).await?)
    }

    async fn committed(&self, movement: &MovementRecord) {
        info!(
            movement_id = %movement.meta.id,
            movement_type = %movement.movement_type,
            quantity_before = %movement.quantity_before,
            quantity_after = %movement.quantity_after,
            "movement recorded"
        );
        self.ctx.audit(movement_audit_entry(movement)).await;
    }
}
