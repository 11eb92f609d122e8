//! Postgres-backed store.
//!
//! Each unit of work is one SQL transaction. Updates are compare-and-swap on
//! the `version` column, except inventory increments which add in place under
//! the row lock; inserts rely on the unique constraints in `sql/schema.sql`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | Any other | `Backend` |
//! | Other | N/A | `Backend` |
//!
//! A CAS update touching zero rows is reported as `Conflict`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockroom_core::{
    AggregateRoot, DomainError, InventoryRecordId, MovementId, ProductId, PurchaseOrderId,
    PurchaseOrderItemId, RecommendationId, RecordMeta, SupplierId, TenantId, UserId, WarehouseId,
};
use stockroom_inventory::{
    InventoryKey, InventoryParts, InventoryRecord, MovementRecord, StockThresholds,
};
use stockroom_purchasing::{
    PurchaseOrder, PurchaseOrderItem, PurchaseOrderParts, Recommendation,
};

use super::{
    InventoryFilter, MovementFilter, Pagination, PurchaseOrderFilter, RecommendationFilter, Store,
    StoreError, StoreResult, UnitOfWork,
};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

const INVENTORY_COLUMNS: &str = "id, tenant_id, product_id, warehouse_id, quantity, \
    reserved_quantity, minimum_stock, safety_stock, reorder_point, last_movement_at, version, \
    created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, tenant_id, movement_type, product_id, source_warehouse_id, \
    destination_warehouse_id, quantity, quantity_before, quantity_after, reference_number, notes, \
    performed_by, performed_at, approved_by, approved_at, created_at, updated_at";

const ORDER_COLUMNS: &str = "id, tenant_id, order_number, supplier_id, status, total_amount, \
    currency, expected_delivery_date, actual_delivery_date, notes, created_by, approved_by, \
    approved_at, sent_at, received_at, cancelled_by, cancelled_at, cancellation_reason, \
    ai_recommendation_id, version, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, purchase_order_id, product_id, warehouse_id, quantity, \
    unit_cost, total_cost, received_quantity, line_number";

const RECOMMENDATION_COLUMNS: &str = "id, tenant_id, kind, product_id, warehouse_id, \
    recommended_value, current_value, urgency_score, confidence_score, explanation, status, \
    actioned_by, actioned_at, purchase_order_id, version, created_at, updated_at";

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    pub async fn apply_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        Ok(())
    }

    async fn acquire(&self) -> StoreResult<sqlx::pool::PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))
    }
}

/// One SQL transaction. Dropped without commit, it rolls back.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn inventory(&mut self, key: InventoryKey) -> StoreResult<Option<InventoryRecord>> {
        fetch_inventory(&mut self.tx, key).await
    }

    async fn insert_inventory(&mut self, record: &InventoryRecord) -> StoreResult<()> {
        let thresholds = record.thresholds();
        sqlx::query(&format!(
            "INSERT INTO inventory_records ({INVENTORY_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(*record.meta().id.as_uuid())
        .bind(*record.meta().tenant_id.as_uuid())
        .bind(*record.product_id().as_uuid())
        .bind(*record.warehouse_id().as_uuid())
        .bind(record.quantity())
        .bind(record.reserved_quantity())
        .bind(thresholds.minimum_stock)
        .bind(thresholds.safety_stock)
        .bind(thresholds.reorder_point)
        .bind(record.last_movement_at())
        .bind(to_db_version(record.version())?)
        .bind(record.meta().created_at)
        .bind(record.meta().updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_inventory", e))?;
        Ok(())
    }

    async fn update_inventory(
        &mut self,
        record: &InventoryRecord,
        read_version: u64,
    ) -> StoreResult<()> {
        let thresholds = record.thresholds();
        let result = sqlx::query(
            r#"
            UPDATE inventory_records
            SET quantity = $3,
                reserved_quantity = $4,
                minimum_stock = $5,
                safety_stock = $6,
                reorder_point = $7,
                last_movement_at = $8,
                version = $9,
                updated_at = $10
            WHERE tenant_id = $1 AND id = $2 AND version = $11
            "#,
        )
        .bind(*record.meta().tenant_id.as_uuid())
        .bind(*record.meta().id.as_uuid())
        .bind(record.quantity())
        .bind(record.reserved_quantity())
        .bind(thresholds.minimum_stock)
        .bind(thresholds.safety_stock)
        .bind(thresholds.reorder_point)
        .bind(record.last_movement_at())
        .bind(to_db_version(record.version())?)
        .bind(record.meta().updated_at)
        .bind(to_db_version(read_version)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_inventory", e))?;

        if result.rows_affected() == 0 {
            let actual = current_version(
                &mut self.tx,
                "inventory_records",
                *record.meta().id.as_uuid(),
            )
            .await?;
            return Err(StoreError::Conflict {
                entity: format!("inventory record for {}", record.key()),
                expected: read_version,
                actual,
            });
        }
        Ok(())
    }

    async fn increment_inventory(
        &mut self,
        key: InventoryKey,
        delta: Decimal,
        at: DateTime<Utc>,
    ) -> StoreResult<InventoryRecord> {
        if delta <= Decimal::ZERO {
            return Err(StoreError::Backend(format!(
                "inventory increment must be positive, got {delta}"
            )));
        }
        let row = sqlx::query(&format!(
            "UPDATE inventory_records \
             SET quantity = quantity + $4, version = version + 1, \
                 last_movement_at = $5, updated_at = $5 \
             WHERE tenant_id = $1 AND product_id = $2 AND warehouse_id = $3 \
             RETURNING {INVENTORY_COLUMNS}"
        ))
        .bind(*key.tenant_id.as_uuid())
        .bind(*key.product_id.as_uuid())
        .bind(*key.warehouse_id.as_uuid())
        .bind(delta)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("increment_inventory", e))?;

        match row {
            Some(row) => inventory_from_row(&row),
            None => Err(StoreError::Backend(format!(
                "inventory record for {key} does not exist"
            ))),
        }
    }

    async fn insert_movement(&mut self, movement: &MovementRecord) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO stock_movements ({MOVEMENT_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        ))
        .bind(*movement.meta.id.as_uuid())
        .bind(*movement.meta.tenant_id.as_uuid())
        .bind(movement.movement_type.as_str())
        .bind(*movement.product_id.as_uuid())
        .bind(movement.source_warehouse_id.map(Uuid::from))
        .bind(movement.destination_warehouse_id.map(Uuid::from))
        .bind(movement.quantity)
        .bind(movement.quantity_before)
        .bind(movement.quantity_after)
        .bind(movement.reference_number.as_deref())
        .bind(movement.notes.as_deref())
        .bind(*movement.performed_by.as_uuid())
        .bind(movement.performed_at)
        .bind(movement.approved_by.map(Uuid::from))
        .bind(movement.approved_at)
        .bind(movement.meta.created_at)
        .bind(movement.meta.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    async fn purchase_order(
        &mut self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        fetch_order(&mut self.tx, tenant_id, id).await
    }

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO purchase_orders ({ORDER_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
              $19, $20, $21, $22)"
        ))
        .bind(*order.meta().id.as_uuid())
        .bind(*order.meta().tenant_id.as_uuid())
        .bind(order.order_number())
        .bind(*order.supplier_id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.total_amount())
        .bind(order.currency())
        .bind(order.expected_delivery_date())
        .bind(order.actual_delivery_date())
        .bind(order.notes())
        .bind(*order.created_by().as_uuid())
        .bind(order.approved_by().map(Uuid::from))
        .bind(order.approved_at())
        .bind(order.sent_at())
        .bind(order.received_at())
        .bind(order.cancelled_by().map(Uuid::from))
        .bind(order.cancelled_at())
        .bind(order.cancellation_reason())
        .bind(order.ai_recommendation_id().map(Uuid::from))
        .bind(to_db_version(order.version())?)
        .bind(order.meta().created_at)
        .bind(order.meta().updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_purchase_order", e))?;

        for item in order.items() {
            sqlx::query(&format!(
                "INSERT INTO purchase_order_items (tenant_id, {ITEM_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
            ))
            .bind(*order.meta().tenant_id.as_uuid())
            .bind(*item.id.as_uuid())
            .bind(*order.meta().id.as_uuid())
            .bind(*item.product_id.as_uuid())
            .bind(item.warehouse_id.map(Uuid::from))
            .bind(item.quantity)
            .bind(item.unit_cost)
            .bind(item.total_cost)
            .bind(item.received_quantity)
            .bind(item.line_number as i32)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_purchase_order_item", e))?;
        }
        Ok(())
    }

    async fn update_purchase_order(
        &mut self,
        order: &PurchaseOrder,
        read_version: u64,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE purchase_orders
            SET status = $3,
                total_amount = $4,
                currency = $5,
                expected_delivery_date = $6,
                actual_delivery_date = $7,
                notes = $8,
                approved_by = $9,
                approved_at = $10,
                sent_at = $11,
                received_at = $12,
                cancelled_by = $13,
                cancelled_at = $14,
                cancellation_reason = $15,
                version = $16,
                updated_at = $17
            WHERE tenant_id = $1 AND id = $2 AND version = $18
            "#,
        )
        .bind(*order.meta().tenant_id.as_uuid())
        .bind(*order.meta().id.as_uuid())
        .bind(order.status().as_str())
        .bind(order.total_amount())
        .bind(order.currency())
        .bind(order.expected_delivery_date())
        .bind(order.actual_delivery_date())
        .bind(order.notes())
        .bind(order.approved_by().map(Uuid::from))
        .bind(order.approved_at())
        .bind(order.sent_at())
        .bind(order.received_at())
        .bind(order.cancelled_by().map(Uuid::from))
        .bind(order.cancelled_at())
        .bind(order.cancellation_reason())
        .bind(to_db_version(order.version())?)
        .bind(order.meta().updated_at)
        .bind(to_db_version(read_version)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_purchase_order", e))?;

        if result.rows_affected() == 0 {
            let actual =
                current_version(&mut self.tx, "purchase_orders", *order.meta().id.as_uuid())
                    .await?;
            return Err(StoreError::Conflict {
                entity: format!("purchase order {}", order.order_number()),
                expected: read_version,
                actual,
            });
        }

        for item in order.items() {
            sqlx::query(
                r#"
                UPDATE purchase_order_items
                SET quantity = $3, unit_cost = $4, total_cost = $5, received_quantity = $6
                WHERE purchase_order_id = $1 AND id = $2
                "#,
            )
            .bind(*order.meta().id.as_uuid())
            .bind(*item.id.as_uuid())
            .bind(item.quantity)
            .bind(item.unit_cost)
            .bind(item.total_cost)
            .bind(item.received_quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_purchase_order_item", e))?;
        }
        Ok(())
    }

    async fn recommendation(
        &mut self,
        tenant_id: TenantId,
        id: RecommendationId,
    ) -> StoreResult<Option<Recommendation>> {
        fetch_recommendation(&mut self.tx, tenant_id, id).await
    }

    async fn insert_recommendation(&mut self, recommendation: &Recommendation) -> StoreResult<()> {
        let rec = recommendation;
        sqlx::query(&format!(
            "INSERT INTO recommendations ({RECOMMENDATION_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        ))
        .bind(*rec.meta.id.as_uuid())
        .bind(*rec.meta.tenant_id.as_uuid())
        .bind(rec.kind.as_str())
        .bind(*rec.product_id.as_uuid())
        .bind(*rec.warehouse_id.as_uuid())
        .bind(rec.recommended_value)
        .bind(rec.current_value)
        .bind(rec.urgency_score)
        .bind(rec.confidence_score)
        .bind(rec.explanation.as_deref())
        .bind(rec.status.as_str())
        .bind(rec.actioned_by.map(Uuid::from))
        .bind(rec.actioned_at)
        .bind(rec.purchase_order_id.map(Uuid::from))
        .bind(to_db_version(rec.version)?)
        .bind(rec.meta.created_at)
        .bind(rec.meta.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_recommendation", e))?;
        Ok(())
    }

    async fn update_recommendation(
        &mut self,
        recommendation: &Recommendation,
        read_version: u64,
    ) -> StoreResult<()> {
        let rec = recommendation;
        let result = sqlx::query(
            r#"
            UPDATE recommendations
            SET status = $3,
                actioned_by = $4,
                actioned_at = $5,
                purchase_order_id = $6,
                version = $7,
                updated_at = $8
            WHERE tenant_id = $1 AND id = $2 AND version = $9
            "#,
        )
        .bind(*rec.meta.tenant_id.as_uuid())
        .bind(*rec.meta.id.as_uuid())
        .bind(rec.status.as_str())
        .bind(rec.actioned_by.map(Uuid::from))
        .bind(rec.actioned_at)
        .bind(rec.purchase_order_id.map(Uuid::from))
        .bind(to_db_version(rec.version)?)
        .bind(rec.meta.updated_at)
        .bind(to_db_version(read_version)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_recommendation", e))?;

        if result.rows_affected() == 0 {
            let actual =
                current_version(&mut self.tx, "recommendations", *rec.meta.id.as_uuid()).await?;
            return Err(StoreError::Conflict {
                entity: format!("recommendation {}", rec.meta.id),
                expected: read_version,
                actual,
            });
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresUnitOfWork { tx }))
    }

    async fn inventory(&self, key: InventoryKey) -> StoreResult<Option<InventoryRecord>> {
        let mut conn = self.acquire().await?;
        fetch_inventory(&mut conn, key).await
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
    async fn list_inventory(
        &self,
        tenant_id: TenantId,
        filter: &InventoryFilter,
        page: Pagination,
    ) -> StoreResult<Vec<InventoryRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory_records \
             WHERE tenant_id = $1 \
               AND ($2::uuid IS NULL OR product_id = $2) \
               AND ($3::uuid IS NULL OR warehouse_id = $3) \
               AND (NOT $4 OR (minimum_stock IS NOT NULL AND quantity < minimum_stock)) \
             ORDER BY warehouse_id, product_id \
             LIMIT $5 OFFSET $6"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(filter.product_id.map(Uuid::from))
        .bind(filter.warehouse_id.map(Uuid::from))
        .bind(filter.low_stock_only)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_inventory", e))?;

        rows.iter().map(inventory_from_row).collect()
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
    async fn movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        page: Pagination,
    ) -> StoreResult<Vec<MovementRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE tenant_id = $1 \
               AND ($2::uuid IS NULL OR product_id = $2) \
               AND ($3::uuid IS NULL OR source_warehouse_id = $3 OR destination_warehouse_id = $3) \
               AND ($4::text IS NULL OR movement_type = $4) \
               AND ($5::timestamptz IS NULL OR performed_at >= $5) \
             ORDER BY performed_at DESC, id DESC \
             LIMIT $6 OFFSET $7"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(filter.product_id.map(Uuid::from))
        .bind(filter.warehouse_id.map(Uuid::from))
        .bind(filter.movement_type.map(|t| t.as_str()))
        .bind(filter.performed_after)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("movements", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    async fn purchase_order(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        let mut conn = self.acquire().await?;
        fetch_order(&mut conn, tenant_id, id).await
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
    async fn list_purchase_orders(
        &self,
        tenant_id: TenantId,
        filter: &PurchaseOrderFilter,
        page: Pagination,
    ) -> StoreResult<Vec<PurchaseOrder>> {
        let mut conn = self.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM purchase_orders \
             WHERE tenant_id = $1 \
               AND ($2::uuid IS NULL OR supplier_id = $2) \
               AND ($3::text IS NULL OR status = $3) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4 OFFSET $5"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(filter.supplier_id.map(Uuid::from))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("list_purchase_orders", e))?;

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| col::<Uuid>(row, "id"))
            .collect::<StoreResult<_>>()?;
        let mut items = fetch_items(&mut conn, &ids).await?;

        rows.iter()
            .map(|row| {
                let id = col::<Uuid>(row, "id")?;
                order_from_row(row, items.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn recommendation(
        &self,
        tenant_id: TenantId,
        id: RecommendationId,
    ) -> StoreResult<Option<Recommendation>> {
        let mut conn = self.acquire().await?;
        fetch_recommendation(&mut conn, tenant_id, id).await
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
    async fn list_recommendations(
        &self,
        tenant_id: TenantId,
        filter: &RecommendationFilter,
        page: Pagination,
    ) -> StoreResult<Vec<Recommendation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations \
             WHERE tenant_id = $1 \
               AND ($2::uuid IS NULL OR product_id = $2) \
               AND ($3::uuid IS NULL OR warehouse_id = $3) \
               AND ($4::text IS NULL OR status = $4) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $5 OFFSET $6"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(filter.product_id.map(Uuid::from))
        .bind(filter.warehouse_id.map(Uuid::from))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_recommendations", e))?;

        rows.iter().map(recommendation_from_row).collect()
    }
}

async fn fetch_inventory(
    conn: &mut PgConnection,
    key: InventoryKey,
) -> StoreResult<Option<InventoryRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {INVENTORY_COLUMNS} FROM inventory_records \
         WHERE tenant_id = $1 AND product_id = $2 AND warehouse_id = $3"
    ))
    .bind(*key.tenant_id.as_uuid())
    .bind(*key.product_id.as_uuid())
    .bind(*key.warehouse_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_inventory", e))?;

    row.as_ref().map(inventory_from_row).transpose()
}

async fn fetch_order(
    conn: &mut PgConnection,
    tenant_id: TenantId,
    id: PurchaseOrderId,
) -> StoreResult<Option<PurchaseOrder>> {
    let row = sqlx::query(&format!(
        "SELECT {ORDER_COLUMNS} FROM purchase_orders WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(*tenant_id.as_uuid())
    .bind(*id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_purchase_order", e))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut items = fetch_items(conn, &[*id.as_uuid()]).await?;
    order_from_row(&row, items.remove(id.as_uuid()).unwrap_or_default()).map(Some)
}

async fn fetch_items(
    conn: &mut PgConnection,
    order_ids: &[Uuid],
) -> StoreResult<HashMap<Uuid, Vec<PurchaseOrderItem>>> {
    if order_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query(&format!(
        "SELECT {ITEM_COLUMNS} FROM purchase_order_items \
         WHERE purchase_order_id = ANY($1) \
         ORDER BY purchase_order_id, line_number"
    ))
    .bind(order_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_purchase_order_items", e))?;

    let mut grouped: HashMap<Uuid, Vec<PurchaseOrderItem>> = HashMap::new();
    for row in &rows {
        let order_id = col::<Uuid>(row, "purchase_order_id")?;
        grouped.entry(order_id).or_default().push(item_from_row(row)?);
    }
    Ok(grouped)
}

async fn fetch_recommendation(
    conn: &mut PgConnection,
    tenant_id: TenantId,
    id: RecommendationId,
) -> StoreResult<Option<Recommendation>> {
    let row = sqlx::query(&format!(
        "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(*tenant_id.as_uuid())
    .bind(*id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("fetch_recommendation", e))?;

    row.as_ref().map(recommendation_from_row).transpose()
}

/// Stored version of a row after a failed CAS (0 if the row is gone).
async fn current_version(conn: &mut PgConnection, table: &str, id: Uuid) -> StoreResult<u64> {
    let version: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT version FROM {table} WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("current_version", e))?;

    version.map(from_db_version).transpose().map(|v| v.unwrap_or(0))
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Backend(format!("failed to decode column {name}: {e}")))
}

fn parse_col<T>(row: &PgRow, name: &str) -> StoreResult<T>
where
    T: core::str::FromStr<Err = DomainError>,
{
    col::<String>(row, name)?.parse().map_err(corrupt_row)
}

fn corrupt_row(err: DomainError) -> StoreError {
    StoreError::Backend(format!("corrupt row: {err}"))
}

fn to_db_version(version: u64) -> StoreResult<i64> {
    i64::try_from(version).map_err(|_| StoreError::Backend(format!("version {version} overflows")))
}

fn from_db_version(version: i64) -> StoreResult<u64> {
    u64::try_from(version)
        .map_err(|_| StoreError::Backend(format!("negative version {version} in storage")))
}

fn inventory_from_row(row: &PgRow) -> StoreResult<InventoryRecord> {
    InventoryRecord::from_parts(InventoryParts {
        meta: RecordMeta {
            id: InventoryRecordId::from_uuid(col(row, "id")?),
            tenant_id: TenantId::from_uuid(col(row, "tenant_id")?),
            created_at: col(row, "created_at")?,
            updated_at: col(row, "updated_at")?,
        },
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        warehouse_id: WarehouseId::from_uuid(col(row, "warehouse_id")?),
        quantity: col(row, "quantity")?,
        reserved_quantity: col(row, "reserved_quantity")?,
        thresholds: StockThresholds {
            minimum_stock: col(row, "minimum_stock")?,
            safety_stock: col(row, "safety_stock")?,
            reorder_point: col(row, "reorder_point")?,
        },
        last_movement_at: col(row, "last_movement_at")?,
        version: from_db_version(col(row, "version")?)?,
    })
    .map_err(corrupt_row)
}

fn movement_from_row(row: &PgRow) -> StoreResult<MovementRecord> {
    Ok(MovementRecord {
        meta: RecordMeta {
            id: MovementId::from_uuid(col(row, "id")?),
            tenant_id: TenantId::from_uuid(col(row, "tenant_id")?),
            created_at: col(row, "created_at")?,
            updated_at: col(row, "updated_at")?,
        },
        movement_type: parse_col(row, "movement_type")?,
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        source_warehouse_id: col::<Option<Uuid>>(row, "source_warehouse_id")?
            .map(WarehouseId::from_uuid),
        destination_warehouse_id: col::<Option<Uuid>>(row, "destination_warehouse_id")?
            .map(WarehouseId::from_uuid),
        quantity: col(row, "quantity")?,
        quantity_before: col(row, "quantity_before")?,
        quantity_after: col(row, "quantity_after")?,
        reference_number: col(row, "reference_number")?,
        notes: col(row, "notes")?,
        performed_by: UserId::from_uuid(col(row, "performed_by")?),
        performed_at: col(row, "performed_at")?,
        approved_by: col::<Option<Uuid>>(row, "approved_by")?.map(UserId::from_uuid),
        approved_at: col(row, "approved_at")?,
    })
}

fn item_from_row(row: &PgRow) -> StoreResult<PurchaseOrderItem> {
    let line_number: i32 = col(row, "line_number")?;
    Ok(PurchaseOrderItem {
        id: PurchaseOrderItemId::from_uuid(col(row, "id")?),
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        warehouse_id: col::<Option<Uuid>>(row, "warehouse_id")?.map(WarehouseId::from_uuid),
        quantity: col(row, "quantity")?,
        unit_cost: col(row, "unit_cost")?,
        total_cost: col(row, "total_cost")?,
        received_quantity: col(row, "received_quantity")?,
        line_number: u32::try_from(line_number)
            .map_err(|_| StoreError::Backend(format!("negative line number {line_number}")))?,
    })
}

fn order_from_row(row: &PgRow, items: Vec<PurchaseOrderItem>) -> StoreResult<PurchaseOrder> {
    PurchaseOrder::from_parts(PurchaseOrderParts {
        meta: RecordMeta {
            id: PurchaseOrderId::from_uuid(col(row, "id")?),
            tenant_id: TenantId::from_uuid(col(row, "tenant_id")?),
            created_at: col(row, "created_at")?,
            updated_at: col(row, "updated_at")?,
        },
        order_number: col(row, "order_number")?,
        supplier_id: SupplierId::from_uuid(col(row, "supplier_id")?),
        status: parse_col(row, "status")?,
        total_amount: col::<Decimal>(row, "total_amount")?,
        currency: col::<String>(row, "currency")?.trim().to_string(),
        expected_delivery_date: col(row, "expected_delivery_date")?,
        actual_delivery_date: col(row, "actual_delivery_date")?,
        notes: col(row, "notes")?,
        created_by: UserId::from_uuid(col(row, "created_by")?),
        approved_by: col::<Option<Uuid>>(row, "approved_by")?.map(UserId::from_uuid),
        approved_at: col(row, "approved_at")?,
        sent_at: col(row, "sent_at")?,
        received_at: col(row, "received_at")?,
        cancelled_by: col::<Option<Uuid>>(row, "cancelled_by")?.map(UserId::from_uuid),
        cancelled_at: col(row, "cancelled_at")?,
        cancellation_reason: col(row, "cancellation_reason")?,
        ai_recommendation_id: col::<Option<Uuid>>(row, "ai_recommendation_id")?
            .map(RecommendationId::from_uuid),
        items,
        version: from_db_version(col(row, "version")?)?,
    })
    .map_err(corrupt_row)
}

fn recommendation_from_row(row: &PgRow) -> StoreResult<Recommendation> {
    Ok(Recommendation {
        meta: RecordMeta {
            id: RecommendationId::from_uuid(col(row, "id")?),
            tenant_id: TenantId::from_uuid(col(row, "tenant_id")?),
            created_at: col(row, "created_at")?,
            updated_at: col(row, "updated_at")?,
        },
        kind: parse_col(row, "kind")?,
        product_id: ProductId::from_uuid(col(row, "product_id")?),
        warehouse_id: WarehouseId::from_uuid(col(row, "warehouse_id")?),
        recommended_value: col(row, "recommended_value")?,
        current_value: col(row, "current_value")?,
        urgency_score: col(row, "urgency_score")?,
        confidence_score: col(row, "confidence_score")?,
        explanation: col(row, "explanation")?,
        status: parse_col(row, "status")?,
        actioned_by: col::<Option<Uuid>>(row, "actioned_by")?.map(UserId::from_uuid),
        actioned_at: col(row, "actioned_at")?,
        purchase_order_id: col::<Option<Uuid>>(row, "purchase_order_id")?
            .map(PurchaseOrderId::from_uuid),
        version: from_db_version(col(row, "version")?)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(match db_err.constraint() {
                    Some(constraint) => format!("{operation} ({constraint})"),
                    None => operation.to_string(),
                }),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
