//! Purchase order workflow over the store.
//!
//! Lifecycle rules live on [`PurchaseOrder`]; this service loads, applies and
//! persists them under a version CAS, and composes receipts with inbound
//! movements.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Value as JsonValue, json};
use tracing::{info, instrument};
use uuid::Uuid;

use stockroom_core::{
    AggregateRoot, DomainError, DomainResult, PurchaseOrderId, PurchaseOrderItemId,
    RecommendationId, SupplierId, TenantId, UserId,
};
use stockroom_inventory::{InboundRequest, MovementRecord};
use stockroom_purchasing::{NewPurchaseOrder, PurchaseOrder, PurchaseOrderUpdate, ReceiptLine};

use crate::audit::AuditEntry;
use crate::context::{ServiceContext, complete};
use crate::error::{ServiceError, ServiceResult};
use crate::movements::{inbound_in, movement_audit_entry};
use crate::store::{Pagination, PurchaseOrderFilter, UnitOfWork};

fn order_not_found(id: PurchaseOrderId) -> DomainError {
    DomainError::not_found(format!("purchase order {id}"))
}

async fn load_in(
    uow: &mut dyn UnitOfWork,
    tenant_id: TenantId,
    id: PurchaseOrderId,
) -> ServiceResult<PurchaseOrder> {
    Ok(uow
        .purchase_order(tenant_id, id)
        .await?
        .ok_or_else(|| order_not_found(id))?)
}

fn order_audit_entry(
    order: &PurchaseOrder,
    actor: UserId,
    action: &str,
    changes: JsonValue,
    at: DateTime<Utc>,
) -> AuditEntry {
    AuditEntry {
        tenant_id: order.meta().tenant_id,
        actor,
        action: action.to_string(),
        entity_type: "purchase_order",
        entity_id: Uuid::from(order.id_typed()),
        changes,
        recorded_at: at,
    }
}

#[derive(Debug, Clone)]
pub struct PurchaseOrderService {
    ctx: ServiceContext,
    default_currency: String,
}

impl PurchaseOrderService {
    pub fn new(ctx: ServiceContext, default_currency: impl Into<String>) -> Self {
        Self {
            ctx,
            default_currency: default_currency.into(),
        }
    }

    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, supplier_id = %input.supplier_id), err)]
    pub async fn create(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        input: NewPurchaseOrder,
    ) -> ServiceResult<PurchaseOrder> {
        let now = self.ctx.clock.now();
        let order = PurchaseOrder::create(tenant_id, actor, input, &self.default_currency, now)?;

        let mut uow = self.ctx.store.begin().await?;
        let result = uow
            .insert_purchase_order(&order)
            .await
            .map_err(ServiceError::from);
        complete(uow, result).await?;

        info!(order_number = order.order_number(), total = %order.total_amount(), "purchase order created");
        self.ctx
            .audit(order_audit_entry(
                &order,
                actor,
                "purchase_order.created",
                created_changes(&order),
                now,
            ))
            .await;
        Ok(order)
    }

    /// Draft a single-line order from an active recommendation and mark the
    /// recommendation approved, in one unit of work.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, recommendation_id = %recommendation_id), err)]
    pub async fn create_from_recommendation(
        &self,
        tenant_id: TenantId,
        recommendation_id: RecommendationId,
        supplier_id: SupplierId,
        order_number: Option<String>,
        actor: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let result = async {
            let mut recommendation = uow
                .recommendation(tenant_id, recommendation_id)
                .await?
                .ok_or_else(|| {
                    DomainError::not_found(format!("recommendation {recommendation_id}"))
                })?;
            let read_version = recommendation.version;

            let order = PurchaseOrder::from_recommendation(
                &recommendation,
                supplier_id,
                order_number,
                &self.default_currency,
                actor,
                now,
            )?;
            recommendation.mark_ordered(order.id_typed(), actor, now)?;

            uow.insert_purchase_order(&order).await?;
            uow.update_recommendation(&recommendation, read_version)
                .await?;
            Ok::<_, ServiceError>(order)
        }
        .await;
        let order = complete(uow, result).await?;

        info!(order_number = order.order_number(), "purchase order created from recommendation");
        self.ctx
            .audit(order_audit_entry(
                &order,
                actor,
                "purchase_order.created",
                created_changes(&order),
                now,
            ))
            .await;
        self.ctx
            .audit(AuditEntry {
                tenant_id,
                actor,
                action: "recommendation.approved".to_string(),
                entity_type: "recommendation",
                entity_id: Uuid::from(recommendation_id),
                changes: json!({ "purchase_order_id": order.id_typed() }),
                recorded_at: now,
            })
            .await;
        Ok(order)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, purchase_order_id = %id), err)]
    pub async fn approve(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
        actor: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        self.transition(tenant_id, id, actor, "purchase_order.approved", |order, now| {
            order.approve(actor, now)
        })
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, purchase_order_id = %id), err)]
    pub async fn send(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
        actor: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        self.transition(tenant_id, id, actor, "purchase_order.sent", |order, now| {
            order.send(now)
        })
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, purchase_order_id = %id), err)]
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
        actor: UserId,
        reason: Option<String>,
    ) -> ServiceResult<PurchaseOrder> {
        self.transition(tenant_id, id, actor, "purchase_order.cancelled", move |order, now| {
            order.cancel(actor, reason, now)
        })
        .await
    }

    /// Draft-only edits; any other status fails `InvalidTransition`.
    #[instrument(skip(self, changes), fields(tenant_id = %tenant_id, purchase_order_id = %id), err)]
    pub async fn update(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
        changes: PurchaseOrderUpdate,
        actor: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        self.transition(tenant_id, id, actor, "purchase_order.updated", move |order, now| {
            order.update(changes, now)
        })
        .await
    }

    /// Record cumulative received quantities per item.
    ///
    /// The whole request is validated against the order first. Each line then
    /// commits on its own together with its inbound movement and the settled
    /// status, so a failure partway leaves earlier lines committed and the
    /// stored status reflecting exactly that progress.
    #[instrument(skip(self, received), fields(tenant_id = %tenant_id, purchase_order_id = %id, lines = received.len()), err)]
    pub async fn receive(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
        received: BTreeMap<PurchaseOrderItemId, Decimal>,
        actor: UserId,
    ) -> ServiceResult<PurchaseOrder> {
        let order = self.get(tenant_id, id).await?;
        let plan = order.plan_receipt(&received)?;

        if plan.is_empty() {
            return self
                .transition(tenant_id, id, actor, "purchase_order.received", |order, now| {
                    order.settle_receipt_status(now)
                })
                .await;
        }

        let mut current = order;
        for line in &plan {
            let (order, movement) = self.receive_line(tenant_id, id, line, actor).await?;
            let now = order.meta().updated_at;

            if let Some(movement) = &movement {
                self.ctx.audit(movement_audit_entry(movement)).await;
            }
            self.ctx
                .audit(order_audit_entry(
                    &order,
                    actor,
                    "purchase_order.received",
                    json!({
                        "item_id": line.item_id,
                        "previously_received": line.previously_received,
                        "received_quantity": line.received_quantity,
                        "status": order.status(),
                    }),
                    now,
                ))
                .await;
            current = order;
        }

        info!(status = %current.status(), "purchase order receipt recorded");
        Ok(current)
    }

    pub async fn get(&self, tenant_id: TenantId, id: PurchaseOrderId) -> ServiceResult<PurchaseOrder> {
        Ok(self
            .ctx
            .store
            .purchase_order(tenant_id, id)
            .await?
            .ok_or_else(|| order_not_found(id))?)
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        filter: &PurchaseOrderFilter,
        page: Pagination,
    ) -> ServiceResult<Vec<PurchaseOrder>> {
        Ok(self
            .ctx
            .store
            .list_purchase_orders(tenant_id, filter, page)
            .await?)
    }

    async fn receive_line(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
        line: &ReceiptLine,
        actor: UserId,
    ) -> ServiceResult<(PurchaseOrder, Option<MovementRecord>)> {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let result = async {
            let mut order = load_in(uow.as_mut(), tenant_id, id).await?;
            let read_version = order.version();
            order.record_receipt(line, now)?;

            let increment = line.increment();
            let movement = match line.warehouse_id {
                Some(warehouse_id) if increment > Decimal::ZERO => {
                    let request = InboundRequest {
                        tenant_id,
                        product_id: line.product_id,
                        destination_warehouse_id: warehouse_id,
                        quantity: increment,
                        performed_by: actor,
                        reference_number: Some(order.order_number().to_string()),
                        notes: Some(format!("Received from PO {}", order.order_number())),
                    };
                    Some(inbound_in(uow.as_mut(), &request, now).await?)
                }
                _ => None,
            };

            uow.update_purchase_order(&order, read_version).await?;
            Ok::<_, ServiceError>((order, movement))
        }
        .await;
        complete(uow, result).await
    }

    async fn transition<F>(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
        actor: UserId,
        action: &'static str,
        change: F,
    ) -> ServiceResult<PurchaseOrder>
    where
        F: FnOnce(&mut PurchaseOrder, DateTime<Utc>) -> DomainResult<()> + Send,
    {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let result = async {
            let mut order = load_in(uow.as_mut(), tenant_id, id).await?;
            let read_version = order.version();
            let previous = order.status();
            change(&mut order, now)?;
            uow.update_purchase_order(&order, read_version).await?;
            Ok::<_, ServiceError>((order, previous))
        }
        .await;
        let (order, previous) = complete(uow, result).await?;

        info!(from = %previous, to = %order.status(), version = order.version(), "purchase order updated");
        self.ctx
            .audit(order_audit_entry(
                &order,
                actor,
                action,
                json!({
                    "previous_status": previous,
                    "status": order.status(),
                    "total_amount": order.total_amount(),
                }),
                now,
            ))
            .await;
        Ok(order)
    }
}

fn created_changes(order: &PurchaseOrder) -> JsonValue {
    json!({
        "order_number": order.order_number(),
        "supplier_id": order.supplier_id(),
        "status": order.status(),
        "total_amount": order.total_amount(),
        "currency": order.currency(),
        "items": order.items().len(),
        "ai_recommendation_id": order.ai_recommendation_id(),
    })
}
