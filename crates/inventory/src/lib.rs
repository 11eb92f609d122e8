//! Inventory domain module (stock ledger + movements).
//!
//! This crate contains the quantity rules for a single (tenant, product,
//! warehouse) ledger entry and the immutable movement records that explain
//! every change, implemented purely as deterministic domain logic (no IO, no
//! HTTP, no storage).

pub mod movement;
pub mod record;
pub mod request;

pub use movement::{MovementRecord, MovementType};
pub use record::{DeltaOutcome, InventoryKey, InventoryParts, InventoryRecord, StockThresholds};
pub use request::{InboundRequest, OutboundRequest, TransferRequest, ensure_positive};
