//! API server entry point.

use std::error::Error;

use api::config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use store::{InMemoryStore, PostgresStore, Store};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
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

/// Builds the services over `store`, starts the reaper and serves until a
/// shutdown signal arrives.
async fn serve<S: Store>(
    store: S,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), Box<dyn Error>> {
    let (state, reaper) = api::bootstrap(store, config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper_handle = reaper.spawn(config.reaper_interval(), shutdown_rx);

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = reaper_handle.await {
        tracing::error!(error = %e, "reaper task failed");
    }
    served?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the store and serve
    let result = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, 10).await?;
            store.run_migrations().await?;
            serve(store, &config, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            let store = InMemoryStore::new();
            api::seed_demo_catalog(&store).await?;
            serve(store, &config, metrics_handle).await
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "server stopped with an error");
    } else {
        tracing::info!("server shut down gracefully");
    }
    result
}
