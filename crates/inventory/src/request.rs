//! Movement requests as issued by callers.
//!
//! Requests are validated before any ledger entry is read, so a malformed
//! request never touches stored state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, ProductId, TenantId, UserId, WarehouseId};

use crate::record::InventoryKey;

pub fn ensure_positive(what: &str, quantity: Decimal) -> DomainResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::invalid_argument(format!(
            "{what} must be positive, got {quantity}"
        )));
    }
    Ok(())
}

/// Receive stock into a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundRequest {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub destination_warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub performed_by: UserId,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

impl InboundRequest {
    pub fn validate(&self) -> DomainResult<()> {
        ensure_positive("quantity", self.quantity)
    }

    pub fn destination(&self) -> InventoryKey {
        InventoryKey::new(self.tenant_id, self.product_id, self.destination_warehouse_id)
    }
}

/// Ship stock out of a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub source_warehouse_id: WarehouseId,
    pub quantity: Decimal,
    /// Version of the source entry the caller last read, if it wants the check.
    pub expected_version: Option<u64>,
    pub performed_by: UserId,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

impl OutboundRequest {
    pub fn validate(&self) -> DomainResult<()> {
        ensure_positive("quantity", self.quantity)
    }

    pub fn source(&self) -> InventoryKey {
        InventoryKey::new(self.tenant_id, self.product_id, self.source_warehouse_id)
    }
}

/// Move stock between two warehouses of the same tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub source_warehouse_id: WarehouseId,
    pub destination_warehouse_id: WarehouseId,
    pub quantity: Decimal,
    /// Expected version of the source entry only.
    pub expected_version: Option<u64>,
    pub performed_by: UserId,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

impl TransferRequest {
    pub fn validate(&self) -> DomainResult<()> {
        ensure_positive("quantity", self.quantity)?;
        if self.source_warehouse_id == self.destination_warehouse_id {
            return Err(DomainError::invalid_argument(
                "source and destination warehouses must be different",
            ));
        }
        Ok(())
    }

    pub fn source(&self) -> InventoryKey {
        InventoryKey::new(self.tenant_id, self.product_id, self.source_warehouse_id)
    }

    pub fn destination(&self) -> InventoryKey {
        InventoryKey::new(self.tenant_id, self.product_id, self.destination_warehouse_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transfer(quantity: Decimal, same_warehouse: bool) -> TransferRequest {
        let source = WarehouseId::new();
        TransferRequest {
            tenant_id: TenantId::new(),
            product_id: ProductId::new(),
            source_warehouse_id: source,
            destination_warehouse_id: if same_warehouse { source } else { WarehouseId::new() },
            quantity,
            expected_version: None,
            performed_by: UserId::new(),
            reference_number: None,
            notes: None,
        }
    }

    #[test]
    fn zero_and_negative_quantities_are_rejected() {
        assert!(ensure_positive("quantity", dec!(0)).is_err());
        assert!(ensure_positive("quantity", dec!(-0.001)).is_err());
        assert!(ensure_positive("quantity", dec!(0.001)).is_ok());
    }

    #[test]
    fn transfer_to_same_warehouse_is_invalid() {
        let err = transfer(dec!(5), true).validate().unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
        assert!(transfer(dec!(5), false).validate().is_ok());
    }
}
