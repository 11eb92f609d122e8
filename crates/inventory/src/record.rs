use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{
    AggregateRoot, DomainError, DomainResult, ExpectedVersion, InventoryRecordId, ProductId,
    RecordMeta, TenantId, TenantScoped, WarehouseId,
};

/// Unique identity of a ledger entry: one per (tenant, product, warehouse).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryKey {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl InventoryKey {
    pub fn new(tenant_id: TenantId, product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            tenant_id,
            product_id,
            warehouse_id,
        }
    }
}

impl core::fmt::Display for InventoryKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "product {} at warehouse {}",
            self.product_id, self.warehouse_id
        )
    }
}

/// Replenishment thresholds attached to a ledger entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockThresholds {
    pub minimum_stock: Option<Decimal>,
    pub safety_stock: Option<Decimal>,
    pub reorder_point: Option<Decimal>,
}

impl StockThresholds {
    fn validate(&self) -> DomainResult<()> {
        let fields = [
            ("minimum_stock", self.minimum_stock),
            ("safety_stock", self.safety_stock),
            ("reorder_point", self.reorder_point),
        ];
        for (name, value) in fields {
            if value.is_some_and(|v| v < Decimal::ZERO) {
                return Err(DomainError::invalid_argument(format!(
                    "{name} cannot be negative"
                )));
            }
        }
        Ok(())
    }
}

/// Plain field bag used by storage adapters to rehydrate a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryParts {
    pub meta: RecordMeta<InventoryRecordId>,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub thresholds: StockThresholds,
    pub last_movement_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Stock ledger entry: current quantity at one (tenant, product, warehouse).
///
/// Invariant: `0 <= reserved_quantity <= quantity`. Every mutation returns a
/// new value whose version is exactly one higher; the receiver is never
/// modified in place, so a rejected mutation leaves nothing behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    meta: RecordMeta<InventoryRecordId>,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    quantity: Decimal,
    reserved_quantity: Decimal,
    thresholds: StockThresholds,
    last_movement_at: Option<DateTime<Utc>>,
    version: u64,
}

/// Result of applying a quantity delta.
///
/// Conflicts and shortfalls are ordinary outcomes here, matched explicitly by
/// callers; `into_result` converts them into the error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied(InventoryRecord),
    VersionConflict { expected: u64, actual: u64 },
    InsufficientStock { available: Decimal, requested: Decimal },
}

impl DeltaOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, DeltaOutcome::Applied(_))
    }

    pub fn into_result(self) -> DomainResult<InventoryRecord> {
        match self {
            DeltaOutcome::Applied(record) => Ok(record),
            DeltaOutcome::VersionConflict { expected, actual } => {
                Err(DomainError::version_conflict(expected, actual))
            }
            DeltaOutcome::InsufficientStock {
                available,
                requested,
            } => Err(DomainError::insufficient_stock(available, requested)),
        }
    }
}

impl InventoryRecord {
    /// A fresh, empty ledger entry (quantity 0, version 0).
    pub fn new(key: InventoryKey, now: DateTime<Utc>) -> Self {
        Self {
            meta: RecordMeta::new(InventoryRecordId::new(), key.tenant_id, now),
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            quantity: Decimal::ZERO,
            reserved_quantity: Decimal::ZERO,
            thresholds: StockThresholds::default(),
            last_movement_at: None,
            version: 0,
        }
    }

    /// Rehydrate from storage, rejecting rows that break the quantity invariant.
    pub fn from_parts(parts: InventoryParts) -> DomainResult<Self> {
        if parts.reserved_quantity < Decimal::ZERO {
            return Err(DomainError::invalid_argument("reserved_quantity cannot be negative"));
        }
        if parts.reserved_quantity > parts.quantity {
            return Err(DomainError::invalid_argument(
                "reserved_quantity cannot exceed quantity",
            ));
        }
        parts.thresholds.validate()?;

        Ok(Self {
            meta: parts.meta,
            product_id: parts.product_id,
            warehouse_id: parts.warehouse_id,
            quantity: parts.quantity,
            reserved_quantity: parts.reserved_quantity,
            thresholds: parts.thresholds,
            last_movement_at: parts.last_movement_at,
            version: parts.version,
        })
    }

    pub fn into_parts(self) -> InventoryParts {
        InventoryParts {
            meta: self.meta,
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            quantity: self.quantity,
            reserved_quantity: self.reserved_quantity,
            thresholds: self.thresholds,
            last_movement_at: self.last_movement_at,
            version: self.version,
        }
    }

    pub fn meta(&self) -> &RecordMeta<InventoryRecordId> {
        &self.meta
    }

    pub fn key(&self) -> InventoryKey {
        InventoryKey::new(self.meta.tenant_id, self.product_id, self.warehouse_id)
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn reserved_quantity(&self) -> Decimal {
        self.reserved_quantity
    }

    /// Quantity not held by reservations; outbound checks test against this.
    pub fn available_quantity(&self) -> Decimal {
        self.quantity - self.reserved_quantity
    }

    pub fn thresholds(&self) -> &StockThresholds {
        &self.thresholds
    }

    pub fn last_movement_at(&self) -> Option<DateTime<Utc>> {
        self.last_movement_at
    }

    pub fn is_low_stock(&self) -> bool {
        self.thresholds
            .minimum_stock
            .is_some_and(|minimum| self.quantity < minimum)
    }

    /// Add `delta` (positive or negative) to the on-hand quantity.
    ///
    /// The version expectation is checked first; a negative delta must then
    /// fit inside the available quantity so reservations stay covered.
    pub fn apply_delta(
        &self,
        delta: Decimal,
        expected: ExpectedVersion,
        now: DateTime<Utc>,
    ) -> DeltaOutcome {
        if let ExpectedVersion::Exact(expected) = expected {
            if expected != self.version {
                return DeltaOutcome::VersionConflict {
                    expected,
                    actual: self.version,
                };
            }
        }

        let quantity = self.quantity + delta;
        if quantity < self.reserved_quantity {
            return DeltaOutcome::InsufficientStock {
                available: self.available_quantity(),
                requested: -delta,
            };
        }

        let mut next = self.next_version(now);
        next.quantity = quantity;
        next.last_movement_at = Some(now);
        DeltaOutcome::Applied(next)
    }

    /// Add received stock with no version expectation; the result stays
    /// valid on top of whichever row is current at write time.
    pub fn add_stock(&self, quantity: Decimal, now: DateTime<Utc>) -> DomainResult<Self> {
        crate::request::ensure_positive("quantity", quantity)?;

        let mut next = self.next_version(now);
        next.quantity += quantity;
        next.last_movement_at = Some(now);
        Ok(next)
    }

    /// Hold `amount` of the available quantity for a pending outbound.
    pub fn reserve(
        &self,
        amount: Decimal,
        expected: ExpectedVersion,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        crate::request::ensure_positive("reserve amount", amount)?;
        expected.check(self.version)?;

        let available = self.available_quantity();
        if available < amount {
            return Err(DomainError::insufficient_stock(available, amount));
        }

        let mut next = self.next_version(now);
        next.reserved_quantity += amount;
        Ok(next)
    }

    /// Return previously reserved quantity to the available pool.
    pub fn release(
        &self,
        amount: Decimal,
        expected: ExpectedVersion,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        crate::request::ensure_positive("release amount", amount)?;
        expected.check(self.version)?;

        if amount > self.reserved_quantity {
            return Err(DomainError::invalid_argument(format!(
                "cannot release {amount}, only {} reserved",
                self.reserved_quantity
            )));
        }

        let mut next = self.next_version(now);
        next.reserved_quantity -= amount;
        Ok(next)
    }

    pub fn with_thresholds(
        &self,
        thresholds: StockThresholds,
        expected: ExpectedVersion,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        thresholds.validate()?;
        expected.check(self.version)?;

        let mut next = self.next_version(now);
        next.thresholds = thresholds;
        Ok(next)
    }

    fn next_version(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.meta.touch(now);
        next
    }
}

impl AggregateRoot for InventoryRecord {
    type Id = InventoryRecordId;

    fn id(&self) -> &Self::Id {
        &self.meta.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl TenantScoped for InventoryRecord {
    fn tenant_id(&self) -> TenantId {
        self.meta.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_key() -> InventoryKey {
        InventoryKey::new(TenantId::new(), ProductId::new(), WarehouseId::new())
    }

    fn stocked(quantity: Decimal, reserved: Decimal, version: u64) -> InventoryRecord {
        let now = Utc::now();
        let key = test_key();
        InventoryRecord::from_parts(InventoryParts {
            meta: RecordMeta::new(InventoryRecordId::new(), key.tenant_id, now),
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            quantity,
            reserved_quantity: reserved,
            thresholds: StockThresholds::default(),
            last_movement_at: None,
            version,
        })
        .unwrap()
    }

    #[test]
    fn new_record_starts_empty_at_version_zero() {
        let record = InventoryRecord::new(test_key(), Utc::now());
        assert_eq!(record.quantity(), Decimal::ZERO);
        assert_eq!(record.reserved_quantity(), Decimal::ZERO);
        assert_eq!(record.version(), 0);
        assert!(record.last_movement_at().is_none());
    }

    #[test]
    fn outbound_with_matching_version_decrements_and_bumps_version() {
        let record = stocked(dec!(100), dec!(0), 0);
        let now = Utc::now();

        let next = record
            .apply_delta(dec!(-30), ExpectedVersion::Exact(0), now)
            .into_result()
            .unwrap();

        assert_eq!(next.quantity(), dec!(70));
        assert_eq!(next.version(), 1);
        assert_eq!(next.last_movement_at(), Some(now));
        // The original value is untouched.
        assert_eq!(record.quantity(), dec!(100));
    }

    #[test]
    fn stale_version_is_a_conflict_outcome() {
        let record = stocked(dec!(70), dec!(0), 1);
        let outcome = record.apply_delta(dec!(-30), ExpectedVersion::Exact(0), Utc::now());
        assert_eq!(
            outcome,
            DeltaOutcome::VersionConflict {
                expected: 0,
                actual: 1
            }
        );
    }

    #[test]
    fn shortfall_reports_available_not_raw_quantity() {
        let record = stocked(dec!(50), dec!(10), 0);
        let outcome = record.apply_delta(dec!(-80), ExpectedVersion::Any, Utc::now());
        assert_eq!(
            outcome,
            DeltaOutcome::InsufficientStock {
                available: dec!(40),
                requested: dec!(80)
            }
        );
    }

    #[test]
    fn add_stock_ignores_version_and_rejects_non_positive() {
        let record = stocked(dec!(10), dec!(4), 7);
        let now = Utc::now();

        let next = record.add_stock(dec!(5), now).unwrap();
        assert_eq!(next.quantity(), dec!(15));
        assert_eq!(next.reserved_quantity(), dec!(4));
        assert_eq!(next.version(), 8);
        assert_eq!(next.last_movement_at(), Some(now));

        assert!(record.add_stock(dec!(0), now).is_err());
        assert!(record.add_stock(dec!(-1), now).is_err());
    }

    #[test]
    fn from_parts_rejects_reserved_above_quantity() {
        let now = Utc::now();
        let key = test_key();
        let err = InventoryRecord::from_parts(InventoryParts {
            meta: RecordMeta::new(InventoryRecordId::new(), key.tenant_id, now),
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            quantity: dec!(5),
            reserved_quantity: dec!(6),
            thresholds: StockThresholds::default(),
            last_movement_at: None,
            version: 0,
        })
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    #[test]
    fn reserve_and_release_move_available_quantity() {
        let record = stocked(dec!(20), dec!(0), 3);
        let now = Utc::now();

        let reserved = record.reserve(dec!(15), ExpectedVersion::Exact(3), now).unwrap();
        assert_eq!(reserved.available_quantity(), dec!(5));
        assert_eq!(reserved.version(), 4);

        let err = reserved.reserve(dec!(6), ExpectedVersion::Any, now).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(dec!(5), dec!(6)));

        let released = reserved.release(dec!(10), ExpectedVersion::Any, now).unwrap();
        assert_eq!(released.reserved_quantity(), dec!(5));
        assert_eq!(released.version(), 5);

        assert!(released.release(dec!(6), ExpectedVersion::Any, now).is_err());
    }

    #[test]
    fn low_stock_requires_a_minimum() {
        let record = stocked(dec!(3), dec!(0), 0);
        assert!(!record.is_low_stock());

        let thresholds = StockThresholds {
            minimum_stock: Some(dec!(5)),
            ..StockThresholds::default()
        };
        let record = record
            .with_thresholds(thresholds, ExpectedVersion::Exact(0), Utc::now())
            .unwrap();
        assert!(record.is_low_stock());
        assert_eq!(record.version(), 1);
    }

    #[test]
    fn negative_thresholds_are_rejected() {
        let record = stocked(dec!(3), dec!(0), 0);
        let thresholds = StockThresholds {
            safety_stock: Some(dec!(-1)),
            ..StockThresholds::default()
        };
        assert!(
            record
                .with_thresholds(thresholds, ExpectedVersion::Any, Utc::now())
                .is_err()
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of deltas, the quantity equals the sum
        /// of the applied deltas, never goes negative, and the version counts
        /// exactly the applied mutations.
        #[test]
        fn quantity_is_sum_of_applied_deltas(
            deltas in prop::collection::vec(-500i64..500i64, 1..40)
        ) {
            let now = Utc::now();
            let mut record = InventoryRecord::new(test_key(), now);
            let mut applied_sum = Decimal::ZERO;
            let mut applied = 0u64;

            for raw in deltas {
                let delta = Decimal::new(raw, 1);
                match record.apply_delta(delta, ExpectedVersion::Any, now) {
                    DeltaOutcome::Applied(next) => {
                        prop_assert_eq!(next.version(), record.version() + 1);
                        applied_sum += delta;
                        applied += 1;
                        record = next;
                    }
                    DeltaOutcome::InsufficientStock { .. } => {
                        prop_assert!(record.quantity() + delta < Decimal::ZERO);
                    }
                    DeltaOutcome::VersionConflict { .. } => {
                        prop_assert!(false, "Any never conflicts");
                    }
                }
                prop_assert!(record.quantity() >= Decimal::ZERO);
            }

            prop_assert_eq!(record.quantity(), applied_sum);
            prop_assert_eq!(record.version(), applied);
        }

        /// Property: a decrement fails iff available < requested.
        #[test]
        fn decrement_fails_iff_available_below_request(
            quantity in 0i64..10_000,
            reserved_share in 0i64..=100,
            requested in 1i64..12_000,
        ) {
            let quantity = Decimal::new(quantity, 2);
            let reserved = (quantity * Decimal::new(reserved_share, 2)).round_dp(2);
            let requested = Decimal::new(requested, 2);
            let record = stocked(quantity, reserved, 0);

            let outcome = record.apply_delta(-requested, ExpectedVersion::Any, Utc::now());
            let available = quantity - reserved;
            prop_assert_eq!(!outcome.is_applied(), available < requested);
        }

        /// Property: two mutations expecting the same version cannot both apply.
        #[test]
        fn same_expected_version_applies_once(first in 1i64..100, second in 1i64..100) {
            let now = Utc::now();
            let record = stocked(dec!(1000), dec!(0), 7);

            let after_first = record
                .apply_delta(Decimal::new(-first, 0), ExpectedVersion::Exact(7), now)
                .into_result()
                .unwrap();
            let second = after_first.apply_delta(Decimal::new(-second, 0), ExpectedVersion::Exact(7), now);
            prop_assert_eq!(second, DeltaOutcome::VersionConflict { expected: 7, actual: 8 });
        }
    }
}
