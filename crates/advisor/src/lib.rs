//! `stockroom-advisor`
//!
//! **Responsibility:** demand forecasting and reorder advice.
//!
//! This crate is advisory only:
//! - It never touches ledger or purchase order state.
//! - It turns demand history into forecasts, and forecasts into reorder advice.
//! - Persisting the advice as a recommendation is the caller's job.

pub mod demand;
pub mod error;
pub mod provider;
pub mod reorder;
pub mod smoothing;

pub use demand::{DemandPoint, daily_demand};
pub use error::AdvisorError;
pub use provider::{DemandForecast, ForecastFeatures, ForecastProvider, ForecastRequest};
pub use reorder::{ReorderAdvice, ReorderInputs, advise_reorder};
pub use smoothing::ExponentialSmoothing;
