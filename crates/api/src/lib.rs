//! HTTP API for the pulsa top-up service.
//!
//! Provides the top-up creation, payment callback and merchant listing
//! endpoints, with structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use gateway::PaymentGateway;
use metrics_exporter_prometheus::PrometheusHandle;
use topup::{OrphanReconciler, SettlementProcessor, TopupService};
use topup_store::TopupStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::{AuthGate, JwtAuthGate};
use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub store: Arc<dyn TopupStore>,
    pub topup_service: TopupService,
    pub settlement: SettlementProcessor,
    pub auth: Arc<dyn AuthGate>,
}

impl AppState {
    /// Builds the reconciler over the same store and services the handlers use.
    pub fn reconciler(&self, config: &Config) -> OrphanReconciler {
        OrphanReconciler::new(
            self.store.clone(),
            self.topup_service.clone(),
            self.settlement.clone(),
            config.reconciler_config(),
        )
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/topup", post(routes::topup::create))
        .route("/topup/callback", post(routes::topup::callback))
        .route("/topup/merchant/{id}", get(routes::topup::list_by_merchant))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over the given store and gateway.
pub fn create_state(
    store: Arc<dyn TopupStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: &Config,
) -> Arc<AppState> {
    let topup_service = TopupService::new(store.clone(), gateway, config.topup_config());
    let settlement = SettlementProcessor::new(store.clone(), config.gateway_server_key.clone());

    Arc::new(AppState {
        store,
        topup_service,
        settlement,
        auth: Arc::new(JwtAuthGate::new(&config.jwt_secret)),
    })
}
