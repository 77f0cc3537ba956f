//! Xray Helper - Entry Point
//!
//! Runs the control server and the engine start pipeline side by side and
//! stops the engine on shutdown.

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use xray_helper::api::ApiServer;
use xray_helper::config::{default_config_path, Config, LogConfig};
use xray_helper::engine::Supervisor;
use xray_helper::services::{RefreshConfig, RefreshHandle, RefreshService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Xray Helper");

    // Load configuration
    let config_path = default_config_path();
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    info!("Configuration loaded");

    let supervisor = Supervisor::new(config.xray_config.clone(), config_path);

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start control server
    let api_server = ApiServer::new(config.server_config.clone(), supervisor.clone());
    let api_shutdown = shutdown_tx.subscribe();
    let mut api_task = tokio::spawn(async move { api_server.run(api_shutdown).await });

    // Start refresh service
    let (refresh_handle, refresh_shutdown) = RefreshHandle::new();
    let refresh_service = RefreshService::new(
        supervisor.clone(),
        RefreshConfig {
            interval: config.xray_config.refresh_interval(),
        },
    );
    let refresh_task = tokio::spawn(async move {
        refresh_service.run(refresh_shutdown).await;
    });

    // Bring the engine up; a failure here ends the process
    let start_supervisor = supervisor.clone();
    let start = async move {
        start_supervisor.start().await?;
        info!("Engine started");
        std::future::pending::<xray_helper::Result<()>>().await
    };

    let outcome: anyhow::Result<()> = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            Ok(())
        }
        result = start => result.context("engine start failed"),
        joined = &mut api_task => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("control server failed")),
            Err(e) => Err(anyhow::Error::new(e).context("control server task panicked")),
        },
    };

    // Send shutdown signal to all services
    let _ = shutdown_tx.send(true);
    refresh_handle.shutdown();

    if let Err(e) = supervisor.kill().await {
        error!("Failed to stop engine: {}", e);
    }

    let _ = refresh_task.await;
    if !api_task.is_finished() {
        let _ = api_task.await;
    }

    info!("Xray Helper stopped");
    outcome
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "xray_helper=info,xray=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if LogConfig::from_env().is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
}
