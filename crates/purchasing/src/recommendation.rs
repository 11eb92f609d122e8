use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{
    AggregateRoot, DomainError, DomainResult, ProductId, PurchaseOrderId, RecommendationId,
    RecordMeta, TenantId, TenantScoped, UserId, WarehouseId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    ReorderPoint,
    ReorderQuantity,
    PurchaseOrder,
}

impl RecommendationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecommendationKind::ReorderPoint => "reorder_point",
            RecommendationKind::ReorderQuantity => "reorder_quantity",
            RecommendationKind::PurchaseOrder => "purchase_order",
        }
    }
}

impl core::str::FromStr for RecommendationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reorder_point" => Ok(RecommendationKind::ReorderPoint),
            "reorder_quantity" => Ok(RecommendationKind::ReorderQuantity),
            "purchase_order" => Ok(RecommendationKind::PurchaseOrder),
            other => Err(DomainError::invalid_argument(format!(
                "unknown recommendation kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Active,
    Approved,
    Rejected,
    Superseded,
}

impl RecommendationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecommendationStatus::Active => "active",
            RecommendationStatus::Approved => "approved",
            RecommendationStatus::Rejected => "rejected",
            RecommendationStatus::Superseded => "superseded",
        }
    }
}

impl core::fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for RecommendationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecommendationStatus::Active),
            "approved" => Ok(RecommendationStatus::Approved),
            "rejected" => Ok(RecommendationStatus::Rejected),
            "superseded" => Ok(RecommendationStatus::Superseded),
            other => Err(DomainError::invalid_argument(format!(
                "unknown recommendation status '{other}'"
            ))),
        }
    }
}

/// Advisory record written by the forecasting side and consumed by purchasing.
///
/// Only `active` recommendations can be acted upon; acting on one (ordering or
/// rejecting) is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub meta: RecordMeta<RecommendationId>,
    pub kind: RecommendationKind,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub recommended_value: Option<Decimal>,
    pub current_value: Option<Decimal>,
    /// 0..=1, higher is more pressing.
    pub urgency_score: Option<Decimal>,
    pub confidence_score: Option<Decimal>,
    pub explanation: Option<String>,
    pub status: RecommendationStatus,
    pub actioned_by: Option<UserId>,
    pub actioned_at: Option<DateTime<Utc>>,
    pub purchase_order_id: Option<PurchaseOrderId>,
    pub version: u64,
}

impl Recommendation {
    pub fn new(
        tenant_id: TenantId,
        kind: RecommendationKind,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            meta: RecordMeta::new(RecommendationId::new(), tenant_id, now),
            kind,
            product_id,
            warehouse_id,
            recommended_value: None,
            current_value: None,
            urgency_score: None,
            confidence_score: None,
            explanation: None,
            status: RecommendationStatus::Active,
            actioned_by: None,
            actioned_at: None,
            purchase_order_id: None,
            version: 0,
        }
    }

    pub fn ensure_active(&self) -> DomainResult<()> {
        if self.status == RecommendationStatus::Active {
            Ok(())
        } else {
            Err(DomainError::invalid_state(format!(
                "recommendation {} is {}, not active",
                self.meta.id, self.status
            )))
        }
    }

    /// Mark approved and link the purchase order created from it.
    pub fn mark_ordered(
        &mut self,
        purchase_order_id: PurchaseOrderId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.action(RecommendationStatus::Approved, actor, now)?;
        self.purchase_order_id = Some(purchase_order_id);
        Ok(())
    }

    pub fn reject(&mut self, actor: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        self.action(RecommendationStatus::Rejected, actor, now)
    }

    /// Retire in favour of a newer recommendation for the same stock.
    pub fn supersede(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        self.status = RecommendationStatus::Superseded;
        self.meta.touch(now);
        self.version += 1;
        Ok(())
    }

    fn action(
        &mut self,
        status: RecommendationStatus,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active()?;
        self.status = status;
        self.actioned_by = Some(actor);
        self.actioned_at = Some(now);
        self.meta.touch(now);
        self.version += 1;
        Ok(())
    }
}

impl AggregateRoot for Recommendation {
    type Id = RecommendationId;

    fn id(&self) -> &Self::Id {
        &self.meta.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl TenantScoped for Recommendation {
    fn tenant_id(&self) -> TenantId {
        self.meta.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active() -> Recommendation {
        Recommendation::new(
            TenantId::new(),
            RecommendationKind::ReorderQuantity,
            ProductId::new(),
            WarehouseId::new(),
            Utc::now(),
        )
    }

    #[test]
    fn mark_ordered_links_order_and_actor() {
        let mut rec = active();
        let po = PurchaseOrderId::new();
        let actor = UserId::new();

        rec.mark_ordered(po, actor, Utc::now()).unwrap();

        assert_eq!(rec.status, RecommendationStatus::Approved);
        assert_eq!(rec.purchase_order_id, Some(po));
        assert_eq!(rec.actioned_by, Some(actor));
        assert_eq!(rec.version, 1);
    }

    #[test]
    fn only_active_recommendations_can_be_actioned() {
        let mut rec = active();
        rec.reject(UserId::new(), Utc::now()).unwrap();

        let err = rec
            .mark_ordered(PurchaseOrderId::new(), UserId::new(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(rec.status, RecommendationStatus::Rejected);
        assert_eq!(rec.purchase_order_id, None);
    }

    #[test]
    fn superseded_is_not_active() {
        let mut rec = active();
        rec.status = RecommendationStatus::Superseded;
        assert!(rec.ensure_active().is_err());
        assert_eq!(
            "superseded".parse::<RecommendationStatus>().unwrap(),
            RecommendationStatus::Superseded
        );
        assert!("open".parse::<RecommendationKind>().is_err());
    }
}
