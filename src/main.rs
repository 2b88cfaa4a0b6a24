use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hvac_bridge::{
    api::{self, ApiState},
    config::Config,
    control::HvacClient,
    db::{self, store::SqlEventStore, Backend},
    hub::{HubConnection, HubOptions},
    sensors::{service::PipelineSettings, SensorPipeline},
    status::PipelineStatus,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent, env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!(
        t_min = config.thresholds.t_min(),
        t_max = config.thresholds.t_max(),
        ticks = config.ticks,
        timezone = %config.timezone,
        "Configuration loaded"
    );

    // Connect to DB and create the audit tables
    let backend = Backend::from_url(&config.database_url)?;
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool, backend).await?;
    info!(backend = ?backend, "Database ready");

    let store = SqlEventStore::new(pool, backend);
    let status = PipelineStatus::new();
    let hvac = HvacClient::new(&config).context("failed to build HVAC client")?;

    let pipeline = SensorPipeline::new(
        PipelineSettings::from_config(&config),
        Arc::new(hvac),
        Arc::new(store.clone()),
        status.clone(),
    );
    let hub = HubConnection::new(HubOptions::from_config(&config))
        .context("invalid sensor hub address")?;
    let connection = hub.state();

    // Sensor subscription runs until the stop flag is raised
    let (stop_tx, stop_rx) = watch::channel(false);
    let subscription = tokio::spawn(async move {
        hub.run(&pipeline, stop_rx).await;
    });

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP server listening");

    let state = ApiState { store, status, connection };
    let served = axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    stop_tx.send_replace(true);
    if let Err(e) = subscription.await {
        error!(error = %e, "Sensor subscription task failed");
    }
    info!("Shutdown complete");

    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
