//! Purchasing domain module (purchase order lifecycle + reorder recommendations).
//!
//! This crate contains the purchase order state machine and the rules for
//! receiving goods, implemented purely as deterministic domain logic (no IO,
//! no HTTP, no storage). Inventory effects of a receipt are described by
//! `ReceiptLine`s and carried out by the infrastructure layer.

pub mod order;
pub mod recommendation;
pub mod status;

pub use order::{
    ItemChange, NewLineItem, NewPurchaseOrder, PurchaseOrder, PurchaseOrderItem,
    PurchaseOrderParts, PurchaseOrderUpdate, ReceiptLine, generate_order_number,
};
pub use recommendation::{Recommendation, RecommendationKind, RecommendationStatus};
pub use status::PurchaseOrderStatus;
