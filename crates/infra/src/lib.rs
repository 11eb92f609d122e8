//! Infrastructure layer: persistence, services, audit, configuration.
//!
//! The domain crates decide; this crate loads state, applies their decisions
//! inside a unit of work, commits, and only then emits audit entries.
//!
//! ## Services
//!
//! - [`StockLedger`]: the only writer of inventory quantities.
//! - [`MovementRecorder`]: inbound / outbound / transfer, each all-or-nothing.
//! - [`PurchaseOrderService`]: purchase order lifecycle and receiving.
//! - [`RecommendationService`]: forecast-driven reorder recommendations.

pub mod audit;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod movements;
pub mod purchase_orders;
pub mod recommendations;
pub mod store;


pub use audit::{AuditEntry, AuditSink, InMemoryAuditSink, NoopAuditSink, TracingAuditSink};
pub use bootstrap::Services;
pub use config::{ConfigError, Settings, StoreBackend};
pub use context::ServiceContext;
pub use error::{ErrorClass, ServiceError, ServiceResult};
pub use ledger::StockLedger;
pub use movements::MovementRecorder;
pub use purchase_orders::PurchaseOrderService;
pub use recommendations::RecommendationService;
pub use store::{InMemoryStore, Pagination, PostgresStore, Store, StoreError, UnitOfWork};
