//! Periodic refresh service
//!
//! Re-probes the current endpoints on a fixed interval and reloads the
//! engine with the new selection. The subscription itself is not fetched
//! again; that only happens on a restart with reinit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, instrument};

use crate::engine::Supervisor;

/// Refresh service configuration
#[derive(Clone, Debug)]
pub struct RefreshConfig {
    /// Time between two refresh rounds
    pub interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2 * 60 * 60),
        }
    }
}

pub struct RefreshService {
    supervisor: Arc<Supervisor>,
    config: RefreshConfig,
}

impl RefreshService {
    pub fn new(supervisor: Arc<Supervisor>, config: RefreshConfig) -> Self {
        Self { supervisor, config }
    }

    /// Run the refresh loop until `shutdown` flips to true
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting refresh service ({}s interval)",
            self.config.interval.as_secs()
        );

        let mut ticker = interval(self.config.interval);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!("Timed refresh executing");
                    if let Err(e) = self.supervisor.refresh().await {
                        error!("Timed refresh failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Refresh service shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for stopping the refresh service
pub struct RefreshHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RefreshHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for RefreshHandle {
    fn default() -> Self {
        Self::new().0
    }
}
