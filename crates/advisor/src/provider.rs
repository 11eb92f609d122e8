use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{ProductId, TenantId, WarehouseId};

use crate::demand::DemandPoint;
use crate::error::AdvisorError;

/// Demand history handed to a forecast provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    /// Daily demand, oldest first.
    pub history: Vec<DemandPoint>,
    pub horizon_days: u32,
}

/// Descriptive statistics of the history a forecast was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastFeatures {
    pub historical_mean: f64,
    pub historical_std: f64,
    pub data_points: usize,
    /// Least-squares slope per day.
    pub trend: f64,
}

/// Predicted demand over the request horizon, with an 80% band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandForecast {
    pub predicted_demand: Decimal,
    pub confidence_lower: Decimal,
    pub confidence_upper: Decimal,
    pub confidence_level: Decimal,
    pub model_version: String,
    pub features: ForecastFeatures,
}

/// Source of demand forecasts.
///
/// Injected into the services that need it; implementations may call out to a
/// remote model, so callers bound each call in time.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn forecast(&self, request: &ForecastRequest) -> Result<DemandForecast, AdvisorError>;
}

#[async_trait]
impl<P> ForecastProvider for std::sync::Arc<P>
where
    P: ForecastProvider + ?Sized,
{
    async fn forecast(&self, request: &ForecastRequest) -> Result<DemandForecast, AdvisorError> {
        (**self).forecast(request).await
    }
}
