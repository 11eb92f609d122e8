//! `stockroom-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the shared record metadata, optimistic version expectations,
//! the clock seam and the error taxonomy used by every other crate.

pub mod aggregate;
pub mod clock;
pub mod entity;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::{RecordMeta, TenantScoped, scoped_to};
pub use error::{DomainError, DomainResult};
pub use id::{
    InventoryRecordId, MovementId, ProductId, PurchaseOrderId, PurchaseOrderItemId,
    RecommendationId, SupplierId, TenantId, UserId, WarehouseId,
};
