//! Wiring: settings in, ready-to-use services out.

use std::sync::Arc;

use tracing::info;

use stockroom_advisor::{ExponentialSmoothing, ForecastProvider};
use stockroom_core::{Clock, SystemClock};

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::{Settings, StoreBackend};
use crate::context::ServiceContext;
use crate::error::ServiceResult;
use crate::ledger::StockLedger;
use crate::movements::MovementRecorder;
use crate::purchase_orders::PurchaseOrderService;
use crate::recommendations::RecommendationService;
use crate::store::{InMemoryStore, PostgresStore, Store};

#[derive(Debug, Clone)]
pub struct Services {
    pub context: ServiceContext,
    pub ledger: StockLedger,
    pub movements: MovementRecorder,
    pub purchase_orders: PurchaseOrderService,
    pub recommendations: RecommendationService,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        settings: &Settings,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        forecaster: Arc<dyn ForecastProvider>,
    ) -> Self {
        let context = ServiceContext::new(store, clock, audit);
        Self {
            ledger: StockLedger::new(context.clone()),
            movements: MovementRecorder::new(context.clone()),
            purchase_orders: PurchaseOrderService::new(
                context.clone(),
                settings.default_currency.clone(),
            ),
            recommendations: RecommendationService::new(
                context.clone(),
                forecaster,
                settings.forecast_timeout,
                settings.forecast_horizon_days,
                settings.demand_history_days,
            ),
            context,
        }
    }

    /// Build the configured store (applying the schema for Postgres) with the
    /// system clock, tracing audit sink and exponential-smoothing forecaster.
    pub async fn from_settings(settings: &Settings) -> ServiceResult<Self> {
        let store: Arc<dyn Store> = match &settings.store {
            StoreBackend::Memory => {
                info!("using in-memory store");
                Arc::new(InMemoryStore::new())
            }
            StoreBackend::Postgres { database_url } => {
                let store = PostgresStore::connect(database_url).await?;
                store.apply_schema().await?;
                info!("connected to postgres");
                Arc::new(store)
            }
        };

        Ok(Self::new(
            store,
            settings,
            Arc::new(SystemClock),
            Arc::new(TracingAuditSink),
            Arc::new(ExponentialSmoothing::default()),
        ))
    }
}
