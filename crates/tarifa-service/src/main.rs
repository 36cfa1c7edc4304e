//! Tarifa Service Binary

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tarifa_engine::RateEngine;
use tarifa_service::{
    api::{self, AppState},
    config::TarifaConfig,
    scheduler::{self, SchedulerStatus},
    SERVICE_VERSION,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TARIFA_LOG_JSON")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting Tarifa Service v{}", SERVICE_VERSION);

    let config = TarifaConfig::load()?;
    info!("Loaded configuration: {:?}", config);

    let registry = Registry::new();
    let engine = RateEngine::in_memory((&config.engine).into())?;
    engine.metrics().register(&registry)?;

    let status = Arc::new(SchedulerStatus::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handle = if config.scheduler.enabled {
        Some(scheduler::spawn(
            engine.clone(),
            config.scheduler.clone(),
            status.clone(),
            shutdown_rx,
        ))
    } else {
        info!("Scheduler disabled");
        None
    };

    let app = api::router(AppState {
        engine,
        registry: Arc::new(registry),
        scheduler: status,
    });

    let addr: SocketAddr = config.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Tarifa HTTP server listening on {}", addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }

    info!("Tarifa service stopped");
    Ok(())
}
