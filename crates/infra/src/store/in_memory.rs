use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use stockroom_core::{
    AggregateRoot, PurchaseOrderId, RecommendationId, TenantId, WarehouseId, scoped_to,
};
use stockroom_inventory::{InventoryKey, InventoryRecord, MovementRecord};
use stockroom_purchasing::{PurchaseOrder, Recommendation};

use super::{
    InventoryFilter, MovementFilter, Pagination, PurchaseOrderFilter, RecommendationFilter, Store,
    StoreError, StoreResult, UnitOfWork,
};

type OrderKey = (TenantId, PurchaseOrderId);
type RecommendationKey = (TenantId, RecommendationId);

#[derive(Debug, Default)]
struct Tables {
    inventory: HashMap<InventoryKey, InventoryRecord>,
    movements: Vec<MovementRecord>,
    orders: HashMap<OrderKey, PurchaseOrder>,
    order_numbers: HashMap<(TenantId, String), PurchaseOrderId>,
    recommendations: HashMap<RecommendationKey, Recommendation>,
}

#[derive(Debug, Clone)]
enum Write {
    InsertInventory(InventoryRecord),
    UpdateInventory(InventoryRecord, u64),
    /// Provisional result plus the delta; re-based on the stored row at commit.
    IncrementInventory(InventoryRecord, Decimal),
    InsertMovement(MovementRecord),
    InsertOrder(PurchaseOrder),
    UpdateOrder(PurchaseOrder, u64),
    InsertRecommendation(Recommendation),
    UpdateRecommendation(Recommendation, u64),
}

/// State as it would stand after the writes resolved so far.
#[derive(Default)]
struct PendingVersions {
    inventory: HashMap<InventoryKey, u64>,
    inventory_rows: HashMap<InventoryKey, InventoryRecord>,
    /// How far each incremented entry moved between staging and commit.
    drift: HashMap<InventoryKey, Decimal>,
    orders: HashMap<OrderKey, u64>,
    order_numbers: HashMap<(TenantId, String), PurchaseOrderId>,
    recommendations: HashMap<RecommendationKey, u64>,
}

fn check_insert<K: Hash + Eq>(
    pending: &mut HashMap<K, u64>,
    key: K,
    committed: Option<u64>,
    version: u64,
    what: impl FnOnce() -> String,
) -> StoreResult<()> {
    if pending.get(&key).copied().or(committed).is_some() {
        return Err(StoreError::Duplicate(what()));
    }
    pending.insert(key, version);
    Ok(())
}

fn check_update<K: Hash + Eq>(
    pending: &mut HashMap<K, u64>,
    key: K,
    committed: Option<u64>,
    read_version: u64,
    version: u64,
    what: impl FnOnce() -> String,
) -> StoreResult<()> {
    let current = pending.get(&key).copied().or(committed);
    if current != Some(read_version) {
        return Err(StoreError::Conflict {
            entity: what(),
            expected: read_version,
            actual: current.unwrap_or(0),
        });
    }
    pending.insert(key, version);
    Ok(())
}

/// Shift a movement's before/after quantities by the drift of the entries
/// they were read from: the source side for `before`, the destination side
/// for `after`, falling back to the only side a movement has.
fn rebase_movement(
    mut movement: MovementRecord,
    drift: &HashMap<InventoryKey, Decimal>,
) -> MovementRecord {
    let shift = |warehouse: Option<WarehouseId>| {
        warehouse
            .and_then(|w| {
                drift.get(&InventoryKey::new(
                    movement.meta.tenant_id,
                    movement.product_id,
                    w,
                ))
            })
            .copied()
            .unwrap_or(Decimal::ZERO)
    };
    let before_side = movement
        .source_warehouse_id
        .or(movement.destination_warehouse_id);
    let after_side = movement
        .destination_warehouse_id
        .or(movement.source_warehouse_id);
    let (before, after) = (shift(before_side), shift(after_side));
    movement.quantity_before += before;
    movement.quantity_after += after;
    movement
}

impl Tables {
    /// Validate a batch without applying it; later writes see earlier ones.
    ///
    /// Increments become plain updates of the row current at this point, and
    /// movements staged alongside them are re-based to match.
    fn resolve(&self, writes: Vec<Write>) -> StoreResult<Vec<Write>> {
        let mut pending = PendingVersions::default();
        let mut resolved = Vec::with_capacity(writes.len());

        for write in writes {
            match write {
                Write::InsertInventory(record) => {
                    let key = record.key();
                    check_insert(
                        &mut pending.inventory,
                        key,
                        self.inventory.get(&key).map(|r| r.version()),
                        record.version(),
                        || format!("inventory record for {key}"),
                    )?;
                    pending.inventory_rows.insert(key, record.clone());
                    resolved.push(Write::InsertInventory(record));
                }
                Write::UpdateInventory(record, read_version) => {
                    let key = record.key();
                    check_update(
                        &mut pending.inventory,
                        key,
                        self.inventory.get(&key).map(|r| r.version()),
                        read_version,
                        record.version(),
                        || format!("inventory record for {key}"),
                    )?;
                    pending.inventory_rows.insert(key, record.clone());
                    resolved.push(Write::UpdateInventory(record, read_version));
                }
                Write::IncrementInventory(staged, delta) => {
                    let key = staged.key();
                    let current = pending
                        .inventory_rows
                        .get(&key)
                        .or_else(|| self.inventory.get(&key))
                        .cloned()
                        .ok_or_else(|| {
                            StoreError::Backend(format!(
                                "inventory record for {key} does not exist"
                            ))
                        })?;
                    let next = current
                        .add_stock(delta, staged.meta().updated_at)
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                    pending
                        .drift
                        .insert(key, next.quantity() - staged.quantity());
                    pending.inventory.insert(key, next.version());
                    pending.inventory_rows.insert(key, next.clone());
                    resolved.push(Write::UpdateInventory(next, current.version()));
                }
                Write::InsertMovement(movement) => {
                    resolved.push(Write::InsertMovement(rebase_movement(
                        movement,
                        &pending.drift,
                    )));
                }
                Write::InsertOrder(order) => {
                    let number_key = (order.meta().tenant_id, order.order_number().to_string());
                    let number_taken = pending.order_numbers.contains_key(&number_key)
                        || self.order_numbers.contains_key(&number_key);
                    if number_taken {
                        return Err(StoreError::Duplicate(format!(
                            "purchase order number {}",
                            order.order_number()
                        )));
                    }
                    let key = (order.meta().tenant_id, order.id_typed());
                    check_insert(
                        &mut pending.orders,
                        key,
                        self.orders.get(&key).map(|o| o.version()),
                        order.version(),
                        || format!("purchase order {}", order.id_typed()),
                    )?;
                    pending.order_numbers.insert(number_key, order.id_typed());
                    resolved.push(Write::InsertOrder(order));
                }
                Write::UpdateOrder(order, read_version) => {
                    let key = (order.meta().tenant_id, order.id_typed());
                    check_update(
                        &mut pending.orders,
                        key,
                        self.orders.get(&key).map(|o| o.version()),
                        read_version,
                        order.version(),
                        || format!("purchase order {}", order.order_number()),
                    )?;
                    resolved.push(Write::UpdateOrder(order, read_version));
                }
                Write::InsertRecommendation(rec) => {
                    let key = (rec.meta.tenant_id, rec.meta.id);
                    check_insert(
                        &mut pending.recommendations,
                        key,
                        self.recommendations.get(&key).map(|r| r.version),
                        rec.version,
                        || format!("recommendation {}", rec.meta.id),
                    )?;
                    resolved.push(Write::InsertRecommendation(rec));
                }
                Write::UpdateRecommendation(rec, read_version) => {
                    let key = (rec.meta.tenant_id, rec.meta.id);
                    check_update(
                        &mut pending.recommendations,
                        key,
                        self.recommendations.get(&key).map(|r| r.version),
                        read_version,
                        rec.version,
                        || format!("recommendation {}", rec.meta.id),
                    )?;
                    resolved.push(Write::UpdateRecommendation(rec, read_version));
                }
            }
        }
        Ok(resolved)
    }

    fn apply(&mut self, writes: Vec<Write>) {
        for write in writes {
            match write {
                Write::InsertInventory(record)
                | Write::UpdateInventory(record, _)
                | Write::IncrementInventory(record, _) => {
                    self.inventory.insert(record.key(), record);
                }
                Write::InsertMovement(movement) => self.movements.push(movement),
                Write::InsertOrder(order) => {
                    let tenant_id = order.meta().tenant_id;
                    self.order_numbers.insert(
                        (tenant_id, order.order_number().to_string()),
                        order.id_typed(),
                    );
                    self.orders.insert((tenant_id, order.id_typed()), order);
                }
                Write::UpdateOrder(order, _) => {
                    self.orders
                        .insert((order.meta().tenant_id, order.id_typed()), order);
                }
                Write::InsertRecommendation(rec) | Write::UpdateRecommendation(rec, _) => {
                    self.recommendations
                        .insert((rec.meta.tenant_id, rec.meta.id), rec);
                }
            }
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// In-memory store with optimistic, all-or-nothing commits.
///
/// Inventory increments hand back a provisional row; the stored row and any
/// movement staged with it are re-based on the committed quantity.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> StoreResult<T> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(f(&tables))
    }
}

/// Staged writes against an [`InMemoryStore`].
pub struct InMemoryUnitOfWork {
    tables: Arc<RwLock<Tables>>,
    writes: Vec<Write>,
}

impl InMemoryUnitOfWork {
    fn committed<T>(&self, f: impl FnOnce(&Tables) -> Option<T>) -> StoreResult<Option<T>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(f(&tables))
    }

    /// Latest staged value matching `f`, newest write first.
    fn staged<T>(&self, f: impl Fn(&Write) -> Option<T>) -> Option<T> {
        self.writes.iter().rev().find_map(f)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn inventory(&mut self, key: InventoryKey) -> StoreResult<Option<InventoryRecord>> {
        let staged = self.staged(|w| match w {
            Write::InsertInventory(r)
            | Write::UpdateInventory(r, _)
            | Write::IncrementInventory(r, _)
                if r.key() == key =>
            {
                Some(r.clone())
            }
            _ => None,
        });
        match staged {
            Some(record) => Ok(Some(record)),
            None => self.committed(|t| t.inventory.get(&key).cloned()),
        }
    }

    async fn insert_inventory(&mut self, record: &InventoryRecord) -> StoreResult<()> {
        self.writes.push(Write::InsertInventory(record.clone()));
        Ok(())
    }

    async fn update_inventory(
        &mut self,
        record: &InventoryRecord,
        read_version: u64,
    ) -> StoreResult<()> {
        self.writes
            .push(Write::UpdateInventory(record.clone(), read_version));
        Ok(())
    }

    async fn increment_inventory(
        &mut self,
        key: InventoryKey,
        delta: Decimal,
        at: DateTime<Utc>,
    ) -> StoreResult<InventoryRecord> {
        let current = self.inventory(key).await?.ok_or_else(|| {
            StoreError::Backend(format!("inventory record for {key} does not exist"))
        })?;
        let next = current
            .add_stock(delta, at)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.writes
            .push(Write::IncrementInventory(next.clone(), delta));
        Ok(next)
    }

    async fn insert_movement(&mut self, movement: &MovementRecord) -> StoreResult<()> {
        self.writes.push(Write::InsertMovement(movement.clone()));
        Ok(())
    }

    async fn purchase_order(
        &mut self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        let staged = self.staged(|w| match w {
            Write::InsertOrder(o) | Write::UpdateOrder(o, _)
                if o.meta().tenant_id == tenant_id && o.id_typed() == id =>
            {
                Some(o.clone())
            }
            _ => None,
        });
        match staged {
            Some(order) => Ok(Some(order)),
            None => self.committed(|t| t.orders.get(&(tenant_id, id)).cloned()),
        }
    }

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> StoreResult<()> {
        self.writes.push(Write::InsertOrder(order.clone()));
        Ok(())
    }

    async fn update_purchase_order(
        &mut self,
        order: &PurchaseOrder,
        read_version: u64,
    ) -> StoreResult<()> {
        self.writes.push(Write::UpdateOrder(order.clone(), read_version));
        Ok(())
    }

    async fn recommendation(
        &mut self,
        tenant_id: TenantId,
        id: RecommendationId,
    ) -> StoreResult<Option<Recommendation>> {
        let staged = self.staged(|w| match w {
            Write::InsertRecommendation(r) | Write::UpdateRecommendation(r, _)
                if r.meta.tenant_id == tenant_id && r.meta.id == id =>
            {
                Some(r.clone())
            }
            _ => None,
        });
        match staged {
            Some(rec) => Ok(Some(rec)),
            None => self.committed(|t| t.recommendations.get(&(tenant_id, id)).cloned()),
        }
    }

    async fn insert_recommendation(&mut self, recommendation: &Recommendation) -> StoreResult<()> {
        self.writes
            .push(Write::InsertRecommendation(recommendation.clone()));
        Ok(())
    }

    async fn update_recommendation(
        &mut self,
        recommendation: &Recommendation,
        read_version: u64,
    ) -> StoreResult<()> {
        self.writes.push(Write::UpdateRecommendation(
            recommendation.clone(),
            read_version,
        ));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        let mut tables = this.tables.write().map_err(|_| poisoned())?;
        let writes = tables.resolve(this.writes)?;
        tables.apply(writes);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(InMemoryUnitOfWork {
            tables: self.tables.clone(),
            writes: Vec::new(),
        }))
    }

    async fn inventory(&self, key: InventoryKey) -> StoreResult<Option<InventoryRecord>> {
        self.read(|t| t.inventory.get(&key).cloned())
    }

    async fn list_inventory(
        &self,
        tenant_id: TenantId,
        filter: &InventoryFilter,
        page: Pagination,
    ) -> StoreResult<Vec<InventoryRecord>> {
        let mut records = self.read(|t| {
            scoped_to(tenant_id, t.inventory.values())
                .filter(|r| filter.matches(r))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        records.sort_by_key(|r| (r.warehouse_id(), r.product_id()));
        Ok(page.window(records))
    }

    async fn movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        page: Pagination,
    ) -> StoreResult<Vec<MovementRecord>> {
        let mut movements = self.read(|t| {
            scoped_to(tenant_id, &t.movements)
                .filter(|m| filter.matches(m))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        movements.sort_by(|a, b| {
            b.performed_at
                .cmp(&a.performed_at)
                .then_with(|| b.meta.id.cmp(&a.meta.id))
        });
        Ok(page.window(movements))
    }

    async fn purchase_order(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        self.read(|t| t.orders.get(&(tenant_id, id)).cloned())
    }

    async fn list_purchase_orders(
        &self,
        tenant_id: TenantId,
        filter: &PurchaseOrderFilter,
        page: Pagination,
    ) -> StoreResult<Vec<PurchaseOrder>> {
        let mut orders = self.read(|t| {
            scoped_to(tenant_id, t.orders.values())
                .filter(|o| filter.matches(o))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        orders.sort_by(|a, b| {
            b.meta()
                .created_at
                .cmp(&a.meta().created_at)
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        Ok(page.window(orders))
    }

    async fn recommendation(
        &self,
        tenant_id: TenantId,
        id: RecommendationId,
    ) -> StoreResult<Option<Recommendation>> {
        self.read(|t| t.recommendations.get(&(tenant_id, id)).cloned())
    }

    async fn list_recommendations(
        &self,
        tenant_id: TenantId,
        filter: &RecommendationFilter,
        page: Pagination,
    ) -> StoreResult<Vec<Recommendation>> {
        let mut recs = self.read(|t| {
            scoped_to(tenant_id, t.recommendations.values())
                .filter(|r| filter.matches(r))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        recs.sort_by(|a, b| {
            b.meta
                .created_at
                .cmp(&a.meta.created_at)
                .then_with(|| b.meta.id.cmp(&a.meta.id))
        });
        Ok(page.window(recs))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use stockroom_core::{ExpectedVersion, ProductId, WarehouseId};

    use super::*;

    fn key() -> InventoryKey {
        InventoryKey::new(TenantId::new(), ProductId::new(), WarehouseId::new())
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_and_dropped() {
        let store = InMemoryStore::new();
        let key = key();

        let mut uow = store.begin().await.unwrap();
        uow.insert_inventory(&InventoryRecord::new(key, Utc::now()))
            .await
            .unwrap();
        assert!(uow.inventory(key).await.unwrap().is_some());
        assert!(store.inventory(key).await.unwrap().is_none());

        drop(uow);
        assert!(store.inventory(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_then_update_in_one_unit_commits() {
        let store = InMemoryStore::new();
        let key = key();
        let record = InventoryRecord::new(key, Utc::now());
        let bumped = record
            .apply_delta(dec!(5), ExpectedVersion::Any, Utc::now())
            .into_result()
            .unwrap();

        let mut uow = store.begin().await.unwrap();
        uow.insert_inventory(&record).await.unwrap();
        uow.update_inventory(&bumped, 0).await.unwrap();
        uow.commit().await.unwrap();

        let stored = store.inventory(key).await.unwrap().unwrap();
        assert_eq!(stored.quantity(), dec!(5));
        assert_eq!(stored.version(), 1);
    }

    #[tokio::test]
    async fn duplicate_insert_fails_at_commit() {
        let store = InMemoryStore::new();
        let key = key();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first
            .insert_inventory(&InventoryRecord::new(key, Utc::now()))
            .await
            .unwrap();
        second
            .insert_inventory(&InventoryRecord::new(key, Utc::now()))
            .await
            .unwrap();

        first.commit().await.unwrap();
        match second.commit().await {
            Err(StoreError::Duplicate(_)) => {}
            other => panic!("expected Duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_update_conflicts_and_applies_nothing() {
        let store = InMemoryStore::new();
        let key = key();
        let record = InventoryRecord::new(key, Utc::now());
        let mut seed = store.begin().await.unwrap();
        seed.insert_inventory(&record).await.unwrap();
        seed.commit().await.unwrap();

        let plus = |r: &InventoryRecord, q| {
            r.apply_delta(q, ExpectedVersion::Any, Utc::now())
                .into_result()
                .unwrap()
        };

        let mut a = store.begin().await.unwrap();
        let mut b = store.begin().await.unwrap();
        a.update_inventory(&plus(&record, dec!(1)), 0).await.unwrap();
        b.insert_movement(&sample_movement(key)).await.unwrap();
        b.update_inventory(&plus(&record, dec!(2)), 0).await.unwrap();

        a.commit().await.unwrap();
        match b.commit().await {
            Err(StoreError::Conflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }

        let stored = store.inventory(key).await.unwrap().unwrap();
        assert_eq!(stored.quantity(), dec!(1));
        let movements = store
            .movements(key.tenant_id, &MovementFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert!(movements.is_empty());
    }

    #[tokio::test]
    async fn overlapping_increments_rebase_onto_the_committed_row() {
        let store = InMemoryStore::new();
        let key = key();
        let mut seed = store.begin().await.unwrap();
        seed.insert_inventory(&InventoryRecord::new(key, Utc::now()))
            .await
            .unwrap();
        seed.commit().await.unwrap();

        let mut a = store.begin().await.unwrap();
        let provisional = a
            .increment_inventory(key, dec!(2), Utc::now())
            .await
            .unwrap();
        assert_eq!(provisional.quantity(), dec!(2));
        a.insert_movement(&sample_movement(key)).await.unwrap();

        let mut b = store.begin().await.unwrap();
        b.increment_inventory(key, dec!(3), Utc::now())
            .await
            .unwrap();
        b.commit().await.unwrap();
        a.commit().await.unwrap();

        let stored = store.inventory(key).await.unwrap().unwrap();
        assert_eq!(stored.quantity(), dec!(5));
        assert_eq!(stored.version(), 2);
        let movements = store
            .movements(key.tenant_id, &MovementFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(
            (movements[0].quantity_before, movements[0].quantity_after),
            (dec!(3), dec!(5))
        );
    }

    #[tokio::test]
    async fn increment_requires_an_existing_entry() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let result = uow.increment_inventory(key(), dec!(1), Utc::now()).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn listings_only_return_the_requested_tenant() {
        let store = InMemoryStore::new();
        let (mine, theirs) = (key(), key());
        let mut uow = store.begin().await.unwrap();
        uow.insert_inventory(&InventoryRecord::new(mine, Utc::now()))
            .await
            .unwrap();
        uow.insert_inventory(&InventoryRecord::new(theirs, Utc::now()))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let listed = store
            .list_inventory(mine.tenant_id, &InventoryFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key(), mine);
    }

    fn sample_movement(key: InventoryKey) -> MovementRecord {
        use stockroom_core::{MovementId, RecordMeta, UserId};
        use stockroom_inventory::MovementType;

        let now = Utc::now();
        MovementRecord {
            meta: RecordMeta::new(MovementId::new(), key.tenant_id, now),
            movement_type: MovementType::Inbound,
            product_id: key.product_id,
            source_warehouse_id: None,
            destination_warehouse_id: Some(key.warehouse_id),
            quantity: dec!(2),
            quantity_before: dec!(0),
            quantity_after: dec!(2),
            reference_number: None,
            notes: None,
            performed_by: UserId::new(),
            performed_at: now,
            approved_by: None,
            approved_at: None,
        }
    }
}
