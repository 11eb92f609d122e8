//! Reorder recommendations: demand history in, advisory record out.
//!
//! The forecast call is the only suspension point outside the store and runs
//! under its own timeout, before any unit of work is opened.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use stockroom_advisor::{
    DemandForecast, ForecastProvider, ForecastRequest, ReorderInputs, advise_reorder,
    daily_demand,
};
use stockroom_core::{DomainError, RecommendationId, TenantId, UserId};
use stockroom_inventory::{InventoryKey, MovementRecord, MovementType};
use stockroom_purchasing::{Recommendation, RecommendationKind, RecommendationStatus};

use crate::audit::AuditEntry;
use crate::context::{ServiceContext, complete};
use crate::error::{ServiceError, ServiceResult};
use crate::ledger::missing;
use crate::store::{MovementFilter, Pagination, RecommendationFilter};

fn recommendation_not_found(id: RecommendationId) -> DomainError {
    DomainError::not_found(format!("recommendation {id}"))
}

fn audit_entry(recommendation: &Recommendation, actor: UserId, action: &str) -> AuditEntry {
    AuditEntry {
        tenant_id: recommendation.meta.tenant_id,
        actor,
        action: action.to_string(),
        entity_type: "recommendation",
        entity_id: Uuid::from(recommendation.meta.id),
        changes: json!({
            "kind": recommendation.kind,
            "status": recommendation.status,
            "recommended_value": recommendation.recommended_value,
            "urgency_score": recommendation.urgency_score,
        }),
        recorded_at: recommendation.meta.updated_at,
    }
}

#[derive(Clone)]
pub struct RecommendationService {
    ctx: ServiceContext,
    forecaster: Arc<dyn ForecastProvider>,
    forecast_timeout: Duration,
    horizon_days: u32,
    history_days: u32,
}

impl std::fmt::Debug for RecommendationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendationService")
            .field("forecast_timeout", &self.forecast_timeout)
            .field("horizon_days", &self.horizon_days)
            .field("history_days", &self.history_days)
            .finish_non_exhaustive()
    }
}

impl RecommendationService {
    pub fn new(
        ctx: ServiceContext,
        forecaster: Arc<dyn ForecastProvider>,
        forecast_timeout: Duration,
        horizon_days: u32,
        history_days: u32,
    ) -> Self {
        Self {
            ctx,
            forecaster,
            forecast_timeout,
            horizon_days,
            history_days,
        }
    }

    /// Forecast demand for one ledger entry and store a recommendation for
    /// the shortfall, superseding earlier active ones for the same stock.
    ///
    /// `Ok(None)` when available stock already covers predicted demand plus
    /// safety stock.
    #[instrument(
        skip(self),
        fields(tenant_id = %key.tenant_id, product_id = %key.product_id, warehouse_id = %key.warehouse_id),
        err
    )]
    pub async fn generate(
        &self,
        key: InventoryKey,
        requested_by: UserId,
    ) -> ServiceResult<Option<Recommendation>> {
        let record = self
            .ctx
            .store
            .inventory(key)
            .await?
            .ok_or_else(|| missing(key))?;

        let now = self.ctx.clock.now();
        let since = now - ChronoDuration::days(i64::from(self.history_days));
        let outbound = self.outbound_since(key, since).await?;
        let history = daily_demand(
            outbound.iter().map(|m| (m.performed_at, m.quantity)),
            since.date_naive(),
            now.date_naive(),
        );

        let forecast = self
            .forecast(ForecastRequest {
                tenant_id: key.tenant_id,
                product_id: key.product_id,
                warehouse_id: key.warehouse_id,
                history,
                horizon_days: self.horizon_days,
            })
            .await?;

        let inputs = ReorderInputs {
            available: record.available_quantity(),
            safety_stock: record.thresholds().safety_stock.unwrap_or(Decimal::ZERO),
            predicted_demand: forecast.predicted_demand,
            horizon_days: self.horizon_days,
        };
        let Some(advice) = advise_reorder(&inputs) else {
            info!(predicted = %forecast.predicted_demand, "stock covers predicted demand");
            return Ok(None);
        };

        let mut recommendation = Recommendation::new(
            key.tenant_id,
            RecommendationKind::PurchaseOrder,
            key.product_id,
            key.warehouse_id,
            now,
        );
        recommendation.recommended_value = Some(advice.quantity);
        recommendation.current_value = Some(inputs.available);
        recommendation.urgency_score = Some(advice.urgency);
        recommendation.confidence_score = Some(forecast.confidence_level);
        recommendation.explanation = Some(advice.explanation);

        let previous = self
            .ctx
            .store
            .list_recommendations(
                key.tenant_id,
                &RecommendationFilter {
                    product_id: Some(key.product_id),
                    warehouse_id: Some(key.warehouse_id),
                    status: Some(RecommendationStatus::Active),
                },
                Pagination::new(Some(1000), None),
            )
            .await?;

        let mut uow = self.ctx.store.begin().await?;
        let result = async {
            for stale in &previous {
                let mut current = uow
                    .recommendation(key.tenant_id, stale.meta.id)
                    .await?
                    .ok_or_else(|| recommendation_not_found(stale.meta.id))?;
                if current.status != RecommendationStatus::Active {
                    continue;
                }
                let read_version = current.version;
                current.supersede(now)?;
                uow.update_recommendation(&current, read_version).await?;
            }
            uow.insert_recommendation(&recommendation).await?;
            Ok::<_, ServiceError>(())
        }
        .await;
        complete(uow, result).await?;

        info!(
            recommendation_id = %recommendation.meta.id,
            quantity = %advice.quantity,
            urgency = %advice.urgency,
            superseded = previous.len(),
            "recommendation generated"
        );
        self.ctx
            .audit(audit_entry(&recommendation, requested_by, "recommendation.created"))
            .await;
        Ok(Some(recommendation))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, recommendation_id = %id), err)]
    pub async fn reject(
        &self,
        tenant_id: TenantId,
        id: RecommendationId,
        actor: UserId,
    ) -> ServiceResult<Recommendation> {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let result = async {
            let mut recommendation = uow
                .recommendation(tenant_id, id)
                .await?
                .ok_or_else(|| recommendation_not_found(id))?;
            let read_version = recommendation.version;
            recommendation.reject(actor, now)?;
            uow.update_recommendation(&recommendation, read_version)
                .await?;
            Ok::<_, ServiceError>(recommendation)
        }
        .await;
        let recommendation = complete(uow, result).await?;

        self.ctx
            .audit(audit_entry(&recommendation, actor, "recommendation.rejected"))
            .await;
        Ok(recommendation)
    }

    pub async fn get(&self, tenant_id: TenantId, id: RecommendationId) -> ServiceResult<Recommendation> {
        Ok(self
            .ctx
            .store
            .recommendation(tenant_id, id)
            .await?
            .ok_or_else(|| recommendation_not_found(id))?)
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        filter: &RecommendationFilter,
        page: Pagination,
    ) -> ServiceResult<Vec<Recommendation>> {
        Ok(self
            .ctx
            .store
            .list_recommendations(tenant_id, filter, page)
            .await?)
    }

    async fn forecast(&self, request: ForecastRequest) -> ServiceResult<DemandForecast> {
        match tokio::time::timeout(self.forecast_timeout, self.forecaster.forecast(&request)).await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServiceError::Upstream(format!(
                "forecast timed out after {} ms",
                self.forecast_timeout.as_millis()
            ))),
        }
    }

    /// Every outbound movement for `key` performed at or after `since`.
    async fn outbound_since(
        &self,
        key: InventoryKey,
        since: DateTime<Utc>,
    ) -> ServiceResult<Vec<MovementRecord>> {
        let filter = MovementFilter {
            product_id: Some(key.product_id),
            warehouse_id: Some(key.warehouse_id),
            movement_type: Some(MovementType::Outbound),
            performed_after: Some(since),
        };

        let mut all = Vec::new();
        let mut page = Pagination::new(Some(1000), None);
        loop {
            let batch = self.ctx.store.movements(key.tenant_id, &filter, page).await?;
            let done = batch.len() < page.limit as usize;
            all.extend(batch);
            if done {
                return Ok(all);
            }
            page.offset += page.limit;
        }
    }
}
