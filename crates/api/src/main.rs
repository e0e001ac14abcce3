//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use gateway::{InMemoryGateway, PaymentGateway, SnapGateway};
use tokio::signal;
use tokio::sync::watch;
use topup_store::{InMemoryTopupStore, PostgresTopupStore, TopupStore};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn build_store(config: &Config) -> Result<Arc<dyn TopupStore>, BoxError> {
    let policy = config.ledger_policy();

    match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(url)
                .await?;
            let store = PostgresTopupStore::new(pool).with_policy(policy);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Ok(Arc::new(InMemoryTopupStore::new().with_policy(policy)))
        }
    }
}

fn build_gateway(config: &Config) -> Result<Arc<dyn PaymentGateway>, BoxError> {
    match config.gateway_config() {
        Some(gateway_config) => {
            tracing::info!(base_url = %gateway_config.base_url, "using HTTP payment gateway");
            Ok(Arc::new(SnapGateway::new(gateway_config)?))
        }
        None => {
            tracing::warn!("GATEWAY_BASE_URL not set, using in-memory payment gateway");
            Ok(Arc::new(InMemoryGateway::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        return Err(e.into());
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Build store, gateway and application state
    let store = build_store(&config).await?;
    let gateway = build_gateway(&config)?;
    let state = api::create_state(store, gateway, &config);

    // 4. Start the orphan reconciler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = tokio::spawn(state.reconciler(&config).run(shutdown_rx));

    // 5. Build the application
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = reconciler.await {
        tracing::error!(error = %e, "reconciler task failed");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
