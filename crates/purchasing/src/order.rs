use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockroom_core::{
    AggregateRoot, DomainError, DomainResult, ProductId, PurchaseOrderId, PurchaseOrderItemId,
    RecommendationId, RecordMeta, SupplierId, TenantId, TenantScoped, UserId, WarehouseId,
};

use crate::recommendation::Recommendation;
use crate::status::PurchaseOrderStatus;

const MAX_ORDER_NUMBER_LEN: usize = 50;

/// `PO-YYYYMMDD-XXXXXXXX`, the suffix being the low 32 bits of `seed` in upper hex.
///
/// The low bits are used because v7 identifiers carry their timestamp in the
/// high bits, and two orders created in the same millisecond must still differ.
pub fn generate_order_number(at: DateTime<Utc>, seed: Uuid) -> String {
    let hex = seed.simple().to_string().to_uppercase();
    format!("PO-{}-{}", at.format("%Y%m%d"), &hex[hex.len() - 8..])
}

fn validate_currency(currency: &str) -> DomainResult<()> {
    if currency.len() == 3 && currency.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(DomainError::invalid_argument(format!(
            "currency must be a 3-letter uppercase code, got '{currency}'"
        )))
    }
}

fn validate_line(quantity: Decimal, unit_cost: Decimal) -> DomainResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::invalid_argument(format!(
            "item quantity must be positive, got {quantity}"
        )));
    }
    if unit_cost < Decimal::ZERO {
        return Err(DomainError::invalid_argument(format!(
            "unit_cost cannot be negative, got {unit_cost}"
        )));
    }
    Ok(())
}

/// Purchase order line. Only `received_quantity` changes after the draft stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub id: PurchaseOrderItemId,
    pub product_id: ProductId,
    /// Destination of received goods. Items without one are received on paper only.
    pub warehouse_id: Option<WarehouseId>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub received_quantity: Decimal,
    pub line_number: u32,
}

impl PurchaseOrderItem {
    pub fn is_fully_received(&self) -> bool {
        self.received_quantity == self.quantity
    }
}

/// Input line for a new purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub product_id: ProductId,
    pub warehouse_id: Option<WarehouseId>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

/// Input for `PurchaseOrder::create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_id: SupplierId,
    /// Generated when absent.
    pub order_number: Option<String>,
    /// Falls back to the configured default currency when absent.
    pub currency: Option<String>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub items: Vec<NewLineItem>,
}

/// Change to an existing line while the order is still a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChange {
    pub item_id: PurchaseOrderItemId,
    pub quantity: Option<Decimal>,
    pub unit_cost: Option<Decimal>,
}

/// Draft-only edits. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderUpdate {
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub currency: Option<String>,
    pub items: Vec<ItemChange>,
}

impl PurchaseOrderUpdate {
    pub fn is_empty(&self) -> bool {
        self.expected_delivery_date.is_none()
            && self.notes.is_none()
            && self.currency.is_none()
            && self.items.is_empty()
    }
}

/// One validated step of a receive call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub item_id: PurchaseOrderItemId,
    pub product_id: ProductId,
    pub warehouse_id: Option<WarehouseId>,
    pub previously_received: Decimal,
    /// Cumulative received quantity after this step.
    pub received_quantity: Decimal,
}

impl ReceiptLine {
    /// Quantity that physically arrives with this step.
    pub fn increment(&self) -> Decimal {
        self.received_quantity - self.previously_received
    }
}

/// Plain field bag used by storage adapters to rehydrate an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderParts {
    pub meta: RecordMeta<PurchaseOrderId>,
    pub order_number: String,
    pub supplier_id: SupplierId,
    pub status: PurchaseOrderStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub expected_delivery_date: Option<NaiveDate>,
    pub actual_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub ai_recommendation_id: Option<RecommendationId>,
    pub items: Vec<PurchaseOrderItem>,
    pub version: u64,
}

/// Aggregate root: PurchaseOrder.
///
/// Every operation validates completely before touching any field, so a
/// rejected call leaves status, items and total exactly as they were. Each
/// successful mutation bumps `version` by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    meta: RecordMeta<PurchaseOrderId>,
    order_number: String,
    supplier_id: SupplierId,
    status: PurchaseOrderStatus,
    total_amount: Decimal,
    currency: String,
    expected_delivery_date: Option<NaiveDate>,
    actual_delivery_date: Option<NaiveDate>,
    notes: Option<String>,
    created_by: UserId,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    cancelled_by: Option<UserId>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    ai_recommendation_id: Option<RecommendationId>,
    items: Vec<PurchaseOrderItem>,
    version: u64,
}

impl PurchaseOrder {
    /// Create a draft order. `default_currency` applies when the input has none.
    pub fn create(
        tenant_id: TenantId,
        created_by: UserId,
        input: NewPurchaseOrder,
        default_currency: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if input.items.is_empty() {
            return Err(DomainError::invalid_argument(
                "purchase order needs at least one item",
            ));
        }
        for line in &input.items {
            validate_line(line.quantity, line.unit_cost)?;
        }

        let currency = input
            .currency
            .unwrap_or_else(|| default_currency.to_string());
        validate_currency(&currency)?;

        let id = PurchaseOrderId::new();
        let order_number = match input.order_number {
            Some(number) => {
                let number = number.trim().to_string();
                if number.is_empty() || number.len() > MAX_ORDER_NUMBER_LEN {
                    return Err(DomainError::invalid_argument(format!(
                        "order_number must be 1..={MAX_ORDER_NUMBER_LEN} characters"
                    )));
                }
                number
            }
            None => generate_order_number(now, *id.as_uuid()),
        };

        let items: Vec<PurchaseOrderItem> = input
            .items
            .into_iter()
            .zip(1u32..)
            .map(|(line, line_number)| PurchaseOrderItem {
                id: PurchaseOrderItemId::new(),
                product_id: line.product_id,
                warehouse_id: line.warehouse_id,
                quantity: line.quantity,
                unit_cost: line.unit_cost,
                total_cost: line.quantity * line.unit_cost,
                received_quantity: Decimal::ZERO,
                line_number,
            })
            .collect();

        let mut order = Self {
            meta: RecordMeta::new(id, tenant_id, now),
            order_number,
            supplier_id: input.supplier_id,
            status: PurchaseOrderStatus::Draft,
            total_amount: Decimal::ZERO,
            currency,
            expected_delivery_date: input.expected_delivery_date,
            actual_delivery_date: None,
            notes: input.notes,
            created_by,
            approved_by: None,
            approved_at: None,
            sent_at: None,
            received_at: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
            ai_recommendation_id: None,
            items,
            version: 0,
        };
        order.recompute_total();
        Ok(order)
    }

    /// Seed a single-line draft from an active recommendation.
    ///
    /// The line carries the recommended quantity at zero unit cost, destined
    /// for the recommendation's warehouse. Marking the recommendation
    /// actioned is the caller's job, in the same unit of work.
    pub fn from_recommendation(
        recommendation: &Recommendation,
        supplier_id: SupplierId,
        order_number: Option<String>,
        currency: &str,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        recommendation.ensure_active()?;
        let quantity = recommendation.recommended_value.ok_or_else(|| {
            DomainError::invalid_argument("recommendation has no recommended quantity")
        })?;

        let notes = recommendation
            .explanation
            .as_ref()
            .map(|text| format!("Created from recommendation: {text}"));

        let order_number = order_number.or_else(|| {
            Some(generate_order_number(
                now,
                *recommendation.meta.id.as_uuid(),
            ))
        });

        let mut order = Self::create(
            recommendation.meta.tenant_id,
            created_by,
            NewPurchaseOrder {
                supplier_id,
                order_number,
                currency: Some(currency.to_string()),
                expected_delivery_date: None,
                notes,
                items: vec![NewLineItem {
                    product_id: recommendation.product_id,
                    warehouse_id: Some(recommendation.warehouse_id),
                    quantity,
                    unit_cost: Decimal::ZERO,
                }],
            },
            currency,
            now,
        )?;
        order.ai_recommendation_id = Some(recommendation.meta.id);
        Ok(order)
    }

    /// Rehydrate from storage.
    pub fn from_parts(parts: PurchaseOrderParts) -> DomainResult<Self> {
        for item in &parts.items {
            if item.received_quantity < Decimal::ZERO || item.received_quantity > item.quantity {
                return Err(DomainError::invalid_argument(format!(
                    "item {} has received_quantity {} outside [0, {}]",
                    item.id, item.received_quantity, item.quantity
                )));
            }
        }

        let mut items = parts.items;
        items.sort_by_key(|item| item.line_number);

        Ok(Self {
            meta: parts.meta,
            order_number: parts.order_number,
            supplier_id: parts.supplier_id,
            status: parts.status,
            total_amount: parts.total_amount,
            currency: parts.currency,
            expected_delivery_date: parts.expected_delivery_date,
            actual_delivery_date: parts.actual_delivery_date,
            notes: parts.notes,
            created_by: parts.created_by,
            approved_by: parts.approved_by,
            approved_at: parts.approved_at,
            sent_at: parts.sent_at,
            received_at: parts.received_at,
            cancelled_by: parts.cancelled_by,
            cancelled_at: parts.cancelled_at,
            cancellation_reason: parts.cancellation_reason,
            ai_recommendation_id: parts.ai_recommendation_id,
            items,
            version: parts.version,
        })
    }

    pub fn into_parts(self) -> PurchaseOrderParts {
        PurchaseOrderParts {
            meta: self.meta,
            order_number: self.order_number,
            supplier_id: self.supplier_id,
            status: self.status,
            total_amount: self.total_amount,
            currency: self.currency,
            expected_delivery_date: self.expected_delivery_date,
            actual_delivery_date: self.actual_delivery_date,
            notes: self.notes,
            created_by: self.created_by,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            sent_at: self.sent_at,
            received_at: self.received_at,
            cancelled_by: self.cancelled_by,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
            ai_recommendation_id: self.ai_recommendation_id,
            items: self.items,
            version: self.version,
        }
    }

    pub fn meta(&self) -> &RecordMeta<PurchaseOrderId> {
        &self.meta
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.meta.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn supplier_id(&self) -> SupplierId {
        self.supplier_id
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn expected_delivery_date(&self) -> Option<NaiveDate> {
        self.expected_delivery_date
    }

    pub fn actual_delivery_date(&self) -> Option<NaiveDate> {
        self.actual_delivery_date
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    pub fn cancelled_by(&self) -> Option<UserId> {
        self.cancelled_by
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn ai_recommendation_id(&self) -> Option<RecommendationId> {
        self.ai_recommendation_id
    }

    pub fn items(&self) -> &[PurchaseOrderItem] {
        &self.items
    }

    pub fn item(&self, item_id: PurchaseOrderItemId) -> Option<&PurchaseOrderItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn is_fully_received(&self) -> bool {
        self.items.iter().all(PurchaseOrderItem::is_fully_received)
    }

    pub fn approve(&mut self, approver: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_transition(PurchaseOrderStatus::Approved, "approve")?;
        self.status = PurchaseOrderStatus::Approved;
        self.approved_by = Some(approver);
        self.approved_at = Some(now);
        self.bump(now);
        Ok(())
    }

    pub fn send(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_transition(PurchaseOrderStatus::Sent, "send")?;
        self.status = PurchaseOrderStatus::Sent;
        self.sent_at = Some(now);
        self.bump(now);
        Ok(())
    }

    pub fn cancel(
        &mut self,
        actor: UserId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_transition(PurchaseOrderStatus::Cancelled, "cancel")?;
        self.status = PurchaseOrderStatus::Cancelled;
        self.cancelled_by = Some(actor);
        self.cancelled_at = Some(now);
        self.cancellation_reason = reason;
        self.bump(now);
        Ok(())
    }

    /// Apply draft-only edits; line edits recompute the total.
    pub fn update(&mut self, changes: PurchaseOrderUpdate, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invalid_transition(self.status.as_str(), "update"));
        }
        if let Some(currency) = &changes.currency {
            validate_currency(currency)?;
        }

        let mut items = self.items.clone();
        for change in &changes.items {
            let item = items
                .iter_mut()
                .find(|item| item.id == change.item_id)
                .ok_or_else(|| {
                    DomainError::not_found(format!(
                        "item {} on purchase order {}",
                        change.item_id, self.order_number
                    ))
                })?;
            let quantity = change.quantity.unwrap_or(item.quantity);
            let unit_cost = change.unit_cost.unwrap_or(item.unit_cost);
            validate_line(quantity, unit_cost)?;
            item.quantity = quantity;
            item.unit_cost = unit_cost;
            item.total_cost = quantity * unit_cost;
        }

        self.items = items;
        if let Some(date) = changes.expected_delivery_date {
            self.expected_delivery_date = Some(date);
        }
        if let Some(notes) = changes.notes {
            self.notes = Some(notes);
        }
        if let Some(currency) = changes.currency {
            self.currency = currency;
        }
        self.recompute_total();
        self.bump(now);
        Ok(())
    }

    /// Validate a receive request without changing anything.
    ///
    /// `received` maps item ids to cumulative received quantities. Lines come
    /// back in line-number order.
    pub fn plan_receipt(
        &self,
        received: &BTreeMap<PurchaseOrderItemId, Decimal>,
    ) -> DomainResult<Vec<ReceiptLine>> {
        self.ensure_accepts_receipts()?;

        let mut lines = Vec::with_capacity(received.len());
        for (&item_id, &quantity) in received {
            lines.push(self.receipt_line(item_id, quantity)?);
        }

        lines.sort_by_key(|line| {
            self.item(line.item_id)
                .map(|item| item.line_number)
                .unwrap_or(u32::MAX)
        });
        Ok(lines)
    }

    /// Commit one planned line and settle the status.
    ///
    /// The line is re-validated against the current state, since the order
    /// may have moved on since it was planned.
    pub fn record_receipt(&mut self, line: &ReceiptLine, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_accepts_receipts()?;
        let current = self.receipt_line(line.item_id, line.received_quantity)?;
        if current.previously_received != line.previously_received {
            return Err(DomainError::invalid_state(format!(
                "item {} was received concurrently ({} -> {})",
                line.item_id, line.previously_received, current.previously_received
            )));
        }

        let target = self.settled_status(Some(&current));
        if target != self.status {
            self.ensure_transition(target, "receive")?;
        }

        if let Some(item) = self.items.iter_mut().find(|item| item.id == line.item_id) {
            item.received_quantity = line.received_quantity;
        }
        self.apply_settled(target, now);
        Ok(())
    }

    /// Recompute the status from item progress without receiving anything.
    pub fn settle_receipt_status(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_accepts_receipts()?;
        let target = self.settled_status(None);
        if target != self.status {
            self.ensure_transition(target, "receive")?;
        }
        self.apply_settled(target, now);
        Ok(())
    }

    fn receipt_line(
        &self,
        item_id: PurchaseOrderItemId,
        quantity: Decimal,
    ) -> DomainResult<ReceiptLine> {
        let item = self.item(item_id).ok_or_else(|| {
            DomainError::not_found(format!(
                "item {item_id} on purchase order {}",
                self.order_number
            ))
        })?;

        if quantity < Decimal::ZERO {
            return Err(DomainError::invalid_argument(format!(
                "received quantity cannot be negative, got {quantity}"
            )));
        }
        if quantity > item.quantity {
            return Err(DomainError::invalid_argument(format!(
                "received quantity {quantity} exceeds ordered quantity {} for line {}",
                item.quantity, item.line_number
            )));
        }
        if quantity < item.received_quantity {
            return Err(DomainError::invalid_argument(format!(
                "received quantity {quantity} is below already received {} for line {}",
                item.received_quantity, item.line_number
            )));
        }

        Ok(ReceiptLine {
            item_id,
            product_id: item.product_id,
            warehouse_id: item.warehouse_id,
            previously_received: item.received_quantity,
            received_quantity: quantity,
        })
    }

    fn settled_status(&self, pending: Option<&ReceiptLine>) -> PurchaseOrderStatus {
        let all_received = self.items.iter().all(|item| match pending {
            Some(line) if line.item_id == item.id => line.received_quantity == item.quantity,
            _ => item.is_fully_received(),
        });
        if all_received {
            PurchaseOrderStatus::Received
        } else {
            PurchaseOrderStatus::PartiallyReceived
        }
    }

    fn apply_settled(&mut self, target: PurchaseOrderStatus, now: DateTime<Utc>) {
        self.status = target;
        if target == PurchaseOrderStatus::Received {
            self.received_at = Some(now);
            self.actual_delivery_date = Some(now.date_naive());
        }
        self.bump(now);
    }

    fn ensure_accepts_receipts(&self) -> DomainResult<()> {
        if self.status.accepts_receipts() {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.status.as_str(), "receive"))
        }
    }

    fn ensure_transition(&self, target: PurchaseOrderStatus, operation: &str) -> DomainResult<()> {
        if self.status.can_transition_to(target) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.status.as_str(), operation))
        }
    }

    fn recompute_total(&mut self) {
        self.total_amount = self.items.iter().map(|item| item.total_cost).sum();
    }

    fn bump(&mut self, now: DateTime<Utc>) {
        self.meta.touch(now);
        self.version += 1;
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.meta.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl TenantScoped for PurchaseOrder {
    fn tenant_id(&self) -> TenantId {
        self.meta.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap()
    }

    fn line(quantity: Decimal, unit_cost: Decimal) -> NewLineItem {
        NewLineItem {
            product_id: ProductId::new(),
            warehouse_id: Some(WarehouseId::new()),
            quantity,
            unit_cost,
        }
    }

    fn draft(items: Vec<NewLineItem>) -> PurchaseOrder {
        PurchaseOrder::create(
            TenantId::new(),
            UserId::new(),
            NewPurchaseOrder {
                supplier_id: SupplierId::new(),
                order_number: None,
                currency: None,
                expected_delivery_date: None,
                notes: None,
                items,
            },
            "USD",
            test_time(),
        )
        .unwrap()
    }

    fn sent_order() -> PurchaseOrder {
        let mut order = draft(vec![line(dec!(10), dec!(2.50)), line(dec!(5), dec!(4))]);
        order.approve(UserId::new(), test_time()).unwrap();
        order.send(test_time()).unwrap();
        order
    }

    fn receive(order: &mut PurchaseOrder, received: &[(usize, Decimal)]) -> DomainResult<()> {
        let map: BTreeMap<_, _> = received
            .iter()
            .map(|(idx, qty)| (order.items()[*idx].id, *qty))
            .collect();
        let plan = order.plan_receipt(&map)?;
        if plan.is_empty() {
            return order.settle_receipt_status(test_time());
        }
        for step in &plan {
            order.record_receipt(step, test_time())?;
        }
        Ok(())
    }

    #[test]
    fn create_computes_total_and_line_numbers() {
        let order = draft(vec![line(dec!(10), dec!(2.50)), line(dec!(3), dec!(1.10))]);

        assert_eq!(order.status(), PurchaseOrderStatus::Draft);
        assert_eq!(order.total_amount(), dec!(28.30));
        assert_eq!(order.items()[0].line_number, 1);
        assert_eq!(order.items()[1].line_number, 2);
        assert_eq!(order.items()[1].total_cost, dec!(3.30));
        assert_eq!(order.currency(), "USD");
        assert_eq!(order.version(), 0);
        assert!(order.order_number().starts_with("PO-20240315-"));
    }

    #[test]
    fn create_rejects_bad_lines() {
        let tenant = TenantId::new();
        let make = |items: Vec<NewLineItem>| {
            PurchaseOrder::create(
                tenant,
                UserId::new(),
                NewPurchaseOrder {
                    supplier_id: SupplierId::new(),
                    order_number: None,
                    currency: None,
                    expected_delivery_date: None,
                    notes: None,
                    items,
                },
                "USD",
                test_time(),
            )
        };

        assert!(matches!(make(vec![]), Err(DomainError::InvalidArgument(_))));
        assert!(matches!(
            make(vec![line(dec!(0), dec!(1))]),
            Err(DomainError::InvalidArgument(_))
        ));
        assert!(matches!(
            make(vec![line(dec!(1), dec!(-1))]),
            Err(DomainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn order_number_uses_low_bits_of_seed() {
        let seed = Uuid::parse_str("0190a1b2-c3d4-7e5f-8a9b-0c1d2e3f4a5b").unwrap();
        assert_eq!(generate_order_number(test_time(), seed), "PO-20240315-2E3F4A5B");
    }

    #[test]
    fn lifecycle_sets_timestamps_and_actors() {
        let approver = UserId::new();
        let mut order = draft(vec![line(dec!(1), dec!(1))]);

        order.approve(approver, test_time()).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Approved);
        assert_eq!(order.approved_by(), Some(approver));
        assert_eq!(order.approved_at(), Some(test_time()));

        order.send(test_time()).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Sent);
        assert_eq!(order.sent_at(), Some(test_time()));
        assert_eq!(order.version(), 2);
    }

    #[test]
    fn approve_twice_is_invalid_transition() {
        let mut order = draft(vec![line(dec!(1), dec!(1))]);
        order.approve(UserId::new(), test_time()).unwrap();

        match order.approve(UserId::new(), test_time()) {
            Err(DomainError::InvalidTransition { status, operation }) => {
                assert_eq!(status, "approved");
                assert_eq!(operation, "approve");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn cancel_records_reason_and_blocks_further_changes() {
        let actor = UserId::new();
        let mut order = draft(vec![line(dec!(1), dec!(1))]);
        order
            .cancel(actor, Some("supplier out of business".into()), test_time())
            .unwrap();

        assert_eq!(order.status(), PurchaseOrderStatus::Cancelled);
        assert_eq!(order.cancelled_by(), Some(actor));
        assert_eq!(order.cancellation_reason(), Some("supplier out of business"));
        assert!(order.approve(actor, test_time()).is_err());
        assert!(order.cancel(actor, None, test_time()).is_err());
    }

    #[test]
    fn update_only_in_draft_and_recomputes_total() {
        let mut order = draft(vec![line(dec!(10), dec!(2)), line(dec!(5), dec!(1))]);
        let first = order.items()[0].id;

        order
            .update(
                PurchaseOrderUpdate {
                    notes: Some("rush".into()),
                    currency: Some("EUR".into()),
                    items: vec![ItemChange {
                        item_id: first,
                        quantity: Some(dec!(4)),
                        unit_cost: None,
                    }],
                    ..Default::default()
                },
                test_time(),
            )
            .unwrap();

        assert_eq!(order.total_amount(), dec!(13));
        assert_eq!(order.currency(), "EUR");
        assert_eq!(order.notes(), Some("rush"));

        order.approve(UserId::new(), test_time()).unwrap();
        let err = order
            .update(
                PurchaseOrderUpdate {
                    notes: Some("late".into()),
                    ..Default::default()
                },
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(order.notes(), Some("rush"));
    }

    #[test]
    fn update_with_bad_item_change_leaves_order_untouched() {
        let mut order = draft(vec![line(dec!(10), dec!(2)), line(dec!(5), dec!(1))]);
        let before = order.clone();
        let first = order.items()[0].id;

        let err = order
            .update(
                PurchaseOrderUpdate {
                    notes: Some("x".into()),
                    items: vec![
                        ItemChange {
                            item_id: first,
                            quantity: Some(dec!(1)),
                            unit_cost: None,
                        },
                        ItemChange {
                            item_id: PurchaseOrderItemId::new(),
                            quantity: Some(dec!(1)),
                            unit_cost: None,
                        },
                    ],
                    ..Default::default()
                },
                test_time(),
            )
            .unwrap_err();

        assert!(matches!(err, DomainError::NotFound(_)));
        assert_eq!(order, before);
    }

    #[test]
    fn receive_partial_then_complete() {
        let mut order = sent_order();

        receive(&mut order, &[(0, dec!(10)), (1, dec!(3))]).unwrap();
        assert_eq!(order.items()[0].received_quantity, dec!(10));
        assert_eq!(order.items()[1].received_quantity, dec!(3));
        assert_eq!(order.status(), PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(order.received_at(), None);
        assert_eq!(order.actual_delivery_date(), None);

        receive(&mut order, &[(1, dec!(5))]).unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Received);
        assert!(order.received_at().is_some());
        assert_eq!(order.actual_delivery_date(), Some(test_time().date_naive()));
    }

    #[test]
    fn plan_reports_increments_over_previous_receipts() {
        let mut order = sent_order();
        receive(&mut order, &[(1, dec!(2))]).unwrap();

        let item = order.items()[1].id;
        let plan = order
            .plan_receipt(&BTreeMap::from([(item, dec!(5))]))
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].previously_received, dec!(2));
        assert_eq!(plan[0].increment(), dec!(3));
    }

    #[test]
    fn receive_rejects_bad_quantities_without_changes() {
        let mut order = sent_order();
        receive(&mut order, &[(1, dec!(3))]).unwrap();
        let before = order.clone();

        let over = receive(&mut order, &[(0, dec!(11))]).unwrap_err();
        assert!(matches!(over, DomainError::InvalidArgument(_)));

        let lowered = receive(&mut order, &[(1, dec!(2))]).unwrap_err();
        assert!(matches!(lowered, DomainError::InvalidArgument(_)));

        let unknown = order
            .plan_receipt(&BTreeMap::from([(PurchaseOrderItemId::new(), dec!(1))]))
            .unwrap_err();
        assert!(matches!(unknown, DomainError::NotFound(_)));

        assert_eq!(order, before);
    }

    #[test]
    fn receive_requires_sent_or_partially_received() {
        let order = draft(vec![line(dec!(1), dec!(1))]);
        let item = order.items()[0].id;

        match order.plan_receipt(&BTreeMap::from([(item, dec!(1))])) {
            Err(DomainError::InvalidTransition { status, operation }) => {
                assert_eq!(status, "draft");
                assert_eq!(operation, "receive");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn stale_receipt_line_is_rejected() {
        let mut order = sent_order();
        let item = order.items()[1].id;
        let stale = order
            .plan_receipt(&BTreeMap::from([(item, dec!(4))]))
            .unwrap();

        receive(&mut order, &[(1, dec!(2))]).unwrap();
        let err = order.record_receipt(&stale[0], test_time()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(order.items()[1].received_quantity, dec!(2));
    }

    #[test]
    fn from_recommendation_seeds_single_zero_cost_line() {
        let mut rec = Recommendation::new(
            TenantId::new(),
            crate::RecommendationKind::PurchaseOrder,
            ProductId::new(),
            WarehouseId::new(),
            test_time(),
        );
        rec.recommended_value = Some(dec!(40));
        rec.current_value = Some(dec!(12));
        rec.explanation = Some("demand spike expected".into());

        let order = PurchaseOrder::from_recommendation(
            &rec,
            SupplierId::new(),
            None,
            "USD",
            UserId::new(),
            test_time(),
        )
        .unwrap();

        assert_eq!(order.items().len(), 1);
        assert_eq!(order.items()[0].quantity, dec!(40));
        assert_eq!(order.items()[0].unit_cost, Decimal::ZERO);
        assert_eq!(order.items()[0].warehouse_id, Some(rec.warehouse_id));
        assert_eq!(order.total_amount(), Decimal::ZERO);
        assert_eq!(order.ai_recommendation_id(), Some(rec.meta.id));
        assert_eq!(
            order.notes(),
            Some("Created from recommendation: demand spike expected")
        );
    }

    fn operation() -> impl Strategy<Value = u8> {
        0u8..5
    }

    fn apply(order: &mut PurchaseOrder, op: u8) -> DomainResult<()> {
        match op {
            0 => order.approve(UserId::new(), test_time()),
            1 => order.send(test_time()),
            2 => order.cancel(UserId::new(), None, test_time()),
            3 => order.update(
                PurchaseOrderUpdate {
                    notes: Some("edit".into()),
                    ..Default::default()
                },
                test_time(),
            ),
            _ => receive(order, &[(0, dec!(10))]),
        }
    }

    proptest! {
        #[test]
        fn rejected_operations_leave_order_unchanged(ops in proptest::collection::vec(operation(), 1..12)) {
            let mut order = draft(vec![line(dec!(10), dec!(2)), line(dec!(5), dec!(1))]);

            for op in ops {
                let before = order.clone();
                match apply(&mut order, op) {
                    Ok(()) => {
                        prop_assert!(order.version() > before.version());
                        prop_assert!(
                            order.status() == before.status()
                                || before.status().can_transition_to(order.status())
                        );
                    }
                    Err(err) => {
                        prop_assert!(matches!(err, DomainError::InvalidTransition { .. }), "expected InvalidTransition, got {:?}", err);
                        prop_assert_eq!(&order, &before);
                    }
                }
            }
        }
    }
}
