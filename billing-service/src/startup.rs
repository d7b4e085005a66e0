//! Application startup and lifecycle management.

use crate::config::{BillingConfig, SchedulerConfig, StoreBackend};
use crate::handlers;
use crate::services::{
    BillingEngine, BillingStore, Database, HttpSettlementClient, MemoryStore, SettlementClient,
    SubscriptionLifecycle, init_metrics,
};
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub store: Arc<dyn BillingStore>,
    pub lifecycle: SubscriptionLifecycle,
    pub engine: Arc<BillingEngine>,
}

impl AsRef<SchedulerConfig> for AppState {
    fn as_ref(&self) -> &SchedulerConfig {
        &self.config.scheduler
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the configured store backend.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        let store: Arc<dyn BillingStore> = match config.store.backend {
            StoreBackend::Postgres => {
                let db = Database::new(
                    config.store.database.url.expose_secret(),
                    config.store.database.max_connections,
                    config.store.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;
                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;
                Arc::new(db)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store - state is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let settlement: Arc<dyn SettlementClient> =
            Arc::new(HttpSettlementClient::new(&config.settlement));

        Self::build_with(config, store, settlement).await
    }

    /// Build the application with explicit store and settlement
    /// implementations. The test harness injects doubles through here.
    pub async fn build_with(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        settlement: Arc<dyn SettlementClient>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let lifecycle = SubscriptionLifecycle::new(store.clone());
        let engine = Arc::new(BillingEngine::new(
            store.clone(),
            settlement,
            lifecycle.clone(),
            config.settlement.timeout_secs,
            config.scheduler.charge_lease_secs,
        ));

        let state = AppState {
            config: config.clone(),
            store,
            lifecycle,
            engine,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Billing service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a handle to the billing store.
    pub fn store(&self) -> Arc<dyn BillingStore> {
        self.state.store.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_handler))
            // Merchant operator surface
            .route("/merchants", post(handlers::merchants::create_merchant))
            .route("/merchants/:id", get(handlers::merchants::get_merchant))
            // Merchant-scoped subscription surface
            .route(
                "/subscriptions",
                post(handlers::subscriptions::create_subscription)
                    .get(handlers::subscriptions::list_subscriptions),
            )
            .route(
                "/subscriptions/:id",
                get(handlers::subscriptions::get_subscription),
            )
            .route(
                "/subscriptions/:id/approve",
                post(handlers::subscriptions::approve_subscription),
            )
            .route(
                "/subscriptions/:id/cancel",
                post(handlers::subscriptions::cancel_subscription),
            )
            // Scheduler-driven internal surface
            .route(
                "/internal/billing/due",
                get(handlers::billing::get_due_subscriptions),
            )
            .route("/internal/billing/run", post(handlers::billing::run_batch))
            .route(
                "/internal/billing/runs",
                get(handlers::billing::list_billing_runs),
            )
            .route(
                "/internal/billing/runs/:id",
                get(handlers::billing::get_billing_run),
            )
            .route(
                "/internal/subscriptions/:id/charge-result",
                post(handlers::billing::record_charge_result),
            )
            .route(
                "/internal/subscriptions/:id/past-due",
                post(handlers::billing::mark_past_due),
            )
            .layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }),
            )
            .with_state(self.state);

        tracing::info!(
            service = "billing-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}
