use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::error::AdvisorError;
use crate::provider::{DemandForecast, ForecastFeatures, ForecastProvider, ForecastRequest};

const MODEL_VERSION: &str = "exp-smoothing-1.0.0";
/// z-score of an 80% two-sided band.
const Z_80: f64 = 1.28;

/// In-process forecast provider using simple exponential smoothing.
///
/// Model:
/// - Smooth the daily demand series with factor `alpha`.
/// - Project the final smoothed level flat across the horizon.
/// - Band the prediction by `1.28` sample standard deviations of the history.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialSmoothing {
    alpha: f64,
}

impl Default for ExponentialSmoothing {
    fn default() -> Self {
        Self { alpha: 0.3 }
    }
}

impl ExponentialSmoothing {
    pub fn new(alpha: f64) -> Result<Self, AdvisorError> {
        if !(alpha.is_finite() && alpha > 0.0 && alpha <= 1.0) {
            return Err(AdvisorError::InvalidInput(format!(
                "alpha must be in (0, 1], got {alpha}"
            )));
        }
        Ok(Self { alpha })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Synchronous core of the provider.
    pub fn forecast_series(
        &self,
        series: &[Decimal],
        horizon_days: u32,
    ) -> Result<DemandForecast, AdvisorError> {
        if series.is_empty() {
            return Err(AdvisorError::InvalidInput(
                "demand history is required".to_string(),
            ));
        }
        if horizon_days == 0 {
            return Err(AdvisorError::InvalidInput(
                "horizon must be at least one day".to_string(),
            ));
        }

        let values = series
            .iter()
            .map(|q| {
                q.to_f64().ok_or_else(|| {
                    AdvisorError::InvalidInput(format!("demand value {q} is not representable"))
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let horizon = f64::from(horizon_days);
        let level = if values.len() < 2 {
            mean(&values)
        } else {
            values[1..]
                .iter()
                .fold(values[0], |level, v| self.alpha * v + (1.0 - self.alpha) * level)
        };
        let predicted = level * horizon;

        let std = if values.len() > 1 {
            stddev_sample(&values, mean(&values))
        } else {
            predicted * 0.2
        };

        Ok(DemandForecast {
            predicted_demand: to_decimal(predicted)?,
            confidence_lower: to_decimal((predicted - Z_80 * std).max(0.0))?,
            confidence_upper: to_decimal(predicted + Z_80 * std)?,
            confidence_level: Decimal::new(80, 2),
            model_version: MODEL_VERSION.to_string(),
            features: ForecastFeatures {
                historical_mean: mean(&values),
                historical_std: std,
                data_points: values.len(),
                trend: trend(&values),
            },
        })
    }
}

#[async_trait]
impl ForecastProvider for ExponentialSmoothing {
    async fn forecast(&self, request: &ForecastRequest) -> Result<DemandForecast, AdvisorError> {
        let series: Vec<Decimal> = request.history.iter().map(|p| p.quantity).collect();
        self.forecast_series(&series, request.horizon_days)
    }
}

fn to_decimal(value: f64) -> Result<Decimal, AdvisorError> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(3))
        .ok_or_else(|| AdvisorError::ForecastFailed(format!("non-finite forecast value {value}")))
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / (xs.len() as f64)
}

/// Sample standard deviation (n-1).
fn stddev_sample(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / ((xs.len() - 1) as f64);
    var.sqrt()
}

fn trend(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let x_mean = (xs.len() - 1) as f64 / 2.0;
    let y_mean = mean(xs);
    let (num, den) = xs.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, y)| {
        let dx = i as f64 - x_mean;
        (num + dx * (y - y_mean), den + dx * dx)
    });
    if den == 0.0 { 0.0 } else { num / den }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn constant_series_projects_level_across_horizon() {
        let model = ExponentialSmoothing::default();
        let forecast = model.forecast_series(&[dec!(4); 10], 7).unwrap();

        assert_eq!(forecast.predicted_demand, dec!(28));
        assert_eq!(forecast.confidence_lower, dec!(28));
        assert_eq!(forecast.confidence_upper, dec!(28));
        assert_eq!(forecast.features.data_points, 10);
        assert_eq!(forecast.features.trend, 0.0);
    }

    #[test]
    fn smoothing_weights_recent_values() {
        let model = ExponentialSmoothing::default();
        // level: 10 -> 0.3*20 + 0.7*10 = 13
        let forecast = model.forecast_series(&[dec!(10), dec!(20)], 1).unwrap();
        assert_eq!(forecast.predicted_demand, dec!(13));
        assert!(forecast.features.trend > 0.0);
    }

    #[test]
    fn single_point_uses_mean_and_twenty_percent_band() {
        let model = ExponentialSmoothing::default();
        let forecast = model.forecast_series(&[dec!(5)], 2).unwrap();

        assert_eq!(forecast.predicted_demand, dec!(10));
        // std = 2, band = 1.28 * 2
        assert_eq!(forecast.confidence_upper, dec!(12.56));
        assert_eq!(forecast.confidence_lower, dec!(7.44));
    }

    #[test]
    fn rejects_empty_history_and_bad_alpha() {
        let model = ExponentialSmoothing::default();
        assert!(matches!(
            model.forecast_series(&[], 7),
            Err(AdvisorError::InvalidInput(_))
        ));
        assert!(ExponentialSmoothing::new(0.0).is_err());
        assert!(ExponentialSmoothing::new(1.5).is_err());
        assert!(ExponentialSmoothing::new(0.5).is_ok());
    }

    #[tokio::test]
    async fn provider_uses_request_history() {
        use chrono::NaiveDate;
        use stockroom_core::{ProductId, TenantId, WarehouseId};

        use crate::demand::DemandPoint;

        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let request = ForecastRequest {
            tenant_id: TenantId::new(),
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            history: vec![
                DemandPoint { date: day, quantity: dec!(2) },
                DemandPoint { date: day, quantity: dec!(2) },
            ],
            horizon_days: 30,
        };

        let forecast = ExponentialSmoothing::default().forecast(&request).await.unwrap();
        assert_eq!(forecast.predicted_demand, dec!(60));
    }
}
