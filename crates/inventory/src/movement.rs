use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{
    DomainError, DomainResult, MovementId, ProductId, RecordMeta, TenantId, TenantScoped, UserId,
    WarehouseId,
};

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Inbound,
    Outbound,
    Transfer,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Inbound => "inbound",
            MovementType::Outbound => "outbound",
            MovementType::Transfer => "transfer",
        }
    }

    /// Audit action name for a committed movement of this kind.
    pub fn audit_action(self) -> &'static str {
        match self {
            MovementType::Inbound => "inventory.movement.inbound",
            MovementType::Outbound => "inventory.movement.outbound",
            MovementType::Transfer => "inventory.movement.transfer",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(MovementType::Inbound),
            "outbound" => Ok(MovementType::Outbound),
            "transfer" => Ok(MovementType::Transfer),
            other => Err(DomainError::invalid_argument(format!(
                "unknown movement type '{other}'"
            ))),
        }
    }
}

/// Immutable record of one stock movement and the ledger effect it caused.
///
/// For transfers `quantity_before` is the source quantity before the move and
/// `quantity_after` the destination quantity after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub meta: RecordMeta<MovementId>,
    pub movement_type: MovementType,
    pub product_id: ProductId,
    pub source_warehouse_id: Option<WarehouseId>,
    pub destination_warehouse_id: Option<WarehouseId>,
    pub quantity: Decimal,
    pub quantity_before: Decimal,
    pub quantity_after: Decimal,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub performed_by: UserId,
    pub performed_at: DateTime<Utc>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl MovementRecord {
    /// Check the warehouse/type pairing and the positive quantity.
    ///
    /// Inbound has only a destination, outbound only a source, transfer both.
    pub fn validate_shape(&self) -> DomainResult<()> {
        crate::request::ensure_positive("movement quantity", self.quantity)?;

        let shape_ok = match self.movement_type {
            MovementType::Inbound => {
                self.source_warehouse_id.is_none() && self.destination_warehouse_id.is_some()
            }
            MovementType::Outbound => {
                self.source_warehouse_id.is_some() && self.destination_warehouse_id.is_none()
            }
            MovementType::Transfer => {
                self.source_warehouse_id.is_some()
                    && self.destination_warehouse_id.is_some()
                    && self.source_warehouse_id != self.destination_warehouse_id
            }
        };

        if shape_ok {
            Ok(())
        } else {
            Err(DomainError::invalid_argument(format!(
                "warehouses do not match a {} movement",
                self.movement_type
            )))
        }
    }

    /// Warehouses touched by this movement.
    pub fn touches(&self, warehouse_id: WarehouseId) -> bool {
        self.source_warehouse_id == Some(warehouse_id)
            || self.destination_warehouse_id == Some(warehouse_id)
    }
}

impl TenantScoped for MovementRecord {
    fn tenant_id(&self) -> TenantId {
        self.meta.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn movement(
        movement_type: MovementType,
        source: Option<WarehouseId>,
        destination: Option<WarehouseId>,
    ) -> MovementRecord {
        let now = Utc::now();
        MovementRecord {
            meta: RecordMeta::new(MovementId::new(), TenantId::new(), now),
            movement_type,
            product_id: ProductId::new(),
            source_warehouse_id: source,
            destination_warehouse_id: destination,
            quantity: dec!(1),
            quantity_before: dec!(0),
            quantity_after: dec!(1),
            reference_number: None,
            notes: None,
            performed_by: UserId::new(),
            performed_at: now,
            approved_by: None,
            approved_at: None,
        }
    }

    #[test]
    fn warehouse_pairing_follows_movement_type() {
        let a = WarehouseId::new();
        let b = WarehouseId::new();

        assert!(movement(MovementType::Inbound, None, Some(a)).validate_shape().is_ok());
        assert!(movement(MovementType::Inbound, Some(a), Some(b)).validate_shape().is_err());
        assert!(movement(MovementType::Outbound, Some(a), None).validate_shape().is_ok());
        assert!(movement(MovementType::Outbound, None, Some(a)).validate_shape().is_err());
        assert!(movement(MovementType::Transfer, Some(a), Some(b)).validate_shape().is_ok());
        assert!(movement(MovementType::Transfer, Some(a), Some(a)).validate_shape().is_err());
    }

    #[test]
    fn movement_type_parses_its_own_names() {
        for kind in [MovementType::Inbound, MovementType::Outbound, MovementType::Transfer] {
            assert_eq!(kind.as_str().parse::<MovementType>().unwrap(), kind);
        }
        assert!("adjustment".parse::<MovementType>().is_err());
    }
}
