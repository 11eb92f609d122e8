//! Transactional persistence boundary.
//!
//! Services never touch a backend directly: they open a [`UnitOfWork`] from a
//! [`Store`], read and stage writes through it, then commit. Updates are a
//! compare-and-swap on the version the caller read, so two units of work that
//! read the same row cannot both commit a change to it. The one exception is
//! [`UnitOfWork::increment_inventory`], which adds to whatever quantity is
//! stored when the write lands.
//!
//! ## Backends
//!
//! - [`InMemoryStore`]: staged writes validated and applied atomically at commit (tests/dev).
//! - [`PostgresStore`]: one database transaction per unit of work.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockroom_core::{
    ProductId, PurchaseOrderId, RecommendationId, SupplierId, TenantId, WarehouseId,
};
use stockroom_inventory::{InventoryKey, InventoryRecord, MovementRecord, MovementType};
use stockroom_purchasing::{
    PurchaseOrder, PurchaseOrderStatus, Recommendation, RecommendationStatus,
};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Persistence failure.
///
/// These are infrastructure errors; services translate conflicts and
/// duplicates into the domain taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Compare-and-swap failed: the row moved on since it was read.
    #[error("{entity} changed concurrently: read version {expected}, stored version {actual}")]
    Conflict {
        entity: String,
        expected: u64,
        actual: u64,
    },

    /// Unique key already taken.
    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Pagination parameters for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).clamp(1, 1000),
            offset: offset.unwrap_or(0),
        }
    }

    pub(crate) fn window<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    /// Only entries whose quantity is below their minimum stock.
    pub low_stock_only: bool,
}

impl InventoryFilter {
    pub fn matches(&self, record: &InventoryRecord) -> bool {
        self.product_id.is_none_or(|p| record.product_id() == p)
            && self.warehouse_id.is_none_or(|w| record.warehouse_id() == w)
            && (!self.low_stock_only || record.is_low_stock())
    }
}

/// Movement history query. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    /// Matches either side of a transfer.
    pub warehouse_id: Option<WarehouseId>,
    pub movement_type: Option<MovementType>,
    pub performed_after: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn matches(&self, movement: &MovementRecord) -> bool {
        self.product_id.is_none_or(|p| movement.product_id == p)
            && self.warehouse_id.is_none_or(|w| movement.touches(w))
            && self.movement_type.is_none_or(|t| movement.movement_type == t)
            && self
                .performed_after
                .is_none_or(|after| movement.performed_at >= after)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderFilter {
    pub supplier_id: Option<SupplierId>,
    pub status: Option<PurchaseOrderStatus>,
}

impl PurchaseOrderFilter {
    pub fn matches(&self, order: &PurchaseOrder) -> bool {
        self.supplier_id.is_none_or(|s| order.supplier_id() == s)
            && self.status.is_none_or(|s| order.status() == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    pub status: Option<RecommendationStatus>,
}

impl RecommendationFilter {
    pub fn matches(&self, recommendation: &Recommendation) -> bool {
        self.product_id
            .is_none_or(|p| recommendation.product_id == p)
            && self
                .warehouse_id
                .is_none_or(|w| recommendation.warehouse_id == w)
            && self.status.is_none_or(|s| recommendation.status == s)
    }
}

/// One transaction against the store.
///
/// Reads observe this unit's own staged writes. Dropping a unit of work
/// without committing discards everything it staged.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn inventory(&mut self, key: InventoryKey) -> StoreResult<Option<InventoryRecord>>;

    /// Fails with `Duplicate` if the (tenant, product, warehouse) key exists.
    async fn insert_inventory(&mut self, record: &InventoryRecord) -> StoreResult<()>;

    /// Fails with `Conflict` unless the stored version equals `read_version`.
    async fn update_inventory(
        &mut self,
        record: &InventoryRecord,
        read_version: u64,
    ) -> StoreResult<()>;

    /// Add a positive `delta` to an existing entry without a version check.
    ///
    /// Returns the row as written: `quantity - delta` is the quantity it was
    /// applied on top of.
    async fn increment_inventory(
        &mut self,
        key: InventoryKey,
        delta: Decimal,
        at: DateTime<Utc>,
    ) -> StoreResult<InventoryRecord>;

    async fn insert_movement(&mut self, movement: &MovementRecord) -> StoreResult<()>;

    async fn purchase_order(
        &mut self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>>;

    /// Fails with `Duplicate` if the (tenant, order_number) key exists.
    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> StoreResult<()>;

    /// Rewrites the order row and its items, under CAS.
    async fn update_purchase_order(
        &mut self,
        order: &PurchaseOrder,
        read_version: u64,
    ) -> StoreResult<()>;

    async fn recommendation(
        &mut self,
        tenant_id: TenantId,
        id: RecommendationId,
    ) -> StoreResult<Option<Recommendation>>;

    async fn insert_recommendation(&mut self, recommendation: &Recommendation) -> StoreResult<()>;

    async fn update_recommendation(
        &mut self,
        recommendation: &Recommendation,
        read_version: u64,
    ) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Tenant-scoped persistent state plus non-transactional read accessors.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    async fn inventory(&self, key: InventoryKey) -> StoreResult<Option<InventoryRecord>>;

    async fn list_inventory(
        &self,
        tenant_id: TenantId,
        filter: &InventoryFilter,
        page: Pagination,
    ) -> StoreResult<Vec<InventoryRecord>>;

    async fn movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        page: Pagination,
    ) -> StoreResult<Vec<MovementRecord>>;

    async fn purchase_order(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>>;

    async fn list_purchase_orders(
        &self,
        tenant_id: TenantId,
        filter: &PurchaseOrderFilter,
        page: Pagination,
    ) -> StoreResult<Vec<PurchaseOrder>>;

    async fn recommendation(
        &self,
        tenant_id: TenantId,
        id: RecommendationId,
    ) -> StoreResult<Option<Recommendation>>;

    async fn list_recommendations(
        &self,
        tenant_id: TenantId,
        filter: &RecommendationFilter,
        page: Pagination,
    ) -> StoreResult<Vec<Recommendation>>;
}

#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        (**self).begin().await
    }

    async fn inventory(&self, key: InventoryKey) -> StoreResult<Option<InventoryRecord>> {
        (**self).inventory(key).await
    }

    async fn list_inventory(
        &self,
        tenant_id: TenantId,
        filter: &InventoryFilter,
        page: Pagination,
    ) -> StoreResult<Vec<InventoryRecord>> {
        (**self).list_inventory(tenant_id, filter, page).await
    }

    async fn movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        page: Pagination,
    ) -> StoreResult<Vec<MovementRecord>> {
        (**self).movements(tenant_id, filter, page).await
    }

    async fn purchase_order(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        (**self).purchase_order(tenant_id, id).await
    }

    async fn list_purchase_orders(
        &self,
        tenant_id: TenantId,
        filter: &PurchaseOrderFilter,
        page: Pagination,
    ) -> StoreResult<Vec<PurchaseOrder>> {
        (**self).list_purchase_orders(tenant_id, filter, page).await
    }

    async fn recommendation(
        &self,
        tenant_id: TenantId,
        id: RecommendationId,
    ) -> StoreResult<Option<Recommendation>> {
        (**self).recommendation(tenant_id, id).await
    }

    async fn list_recommendations(
        &self,
        tenant_id: TenantId,
        filter: &RecommendationFilter,
        page: Pagination,
    ) -> StoreResult<Vec<Recommendation>> {
        (**self).list_recommendations(tenant_id, filter, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_limit() {
        assert_eq!(Pagination::new(Some(5000), None).limit, 1000);
        assert_eq!(Pagination::new(Some(0), Some(3)).limit, 1);
        assert_eq!(Pagination::new(None, None), Pagination::default());
    }

    #[test]
    fn window_skips_then_takes() {
        let page = Pagination {
            limit: 2,
            offset: 1,
        };
        assert_eq!(page.window(vec![1, 2, 3, 4]), vec![2, 3]);
    }
}
