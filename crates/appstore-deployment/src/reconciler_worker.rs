// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker purging installations whose engine app was deleted.
//!
//! A partial delete removes the engine app and marks the installation with
//! `deployment_app_delete_request`. Each poll:
//! 1. Loads up to `batch_size` marked GitOps installations, oldest first
//! 2. Asks the engine whether the app object still exists
//! 3. Runs the full delete for installations whose app is gone

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::orchestrator::{AppStoreOrchestrator, RequestContext};

/// Configuration for the orphan reconciler worker.
#[derive(Debug, Clone)]
pub struct OrphanReconcilerWorkerConfig {
    /// Whether the reconciler runs.
    pub enabled: bool,
    /// How often to poll.
    pub poll_interval: Duration,
    /// Maximum installations checked per poll.
    pub batch_size: i64,
}

impl Default for OrphanReconcilerWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(300), // 5 minutes
            batch_size: 50,
        }
    }
}

impl OrphanReconcilerWorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `APPSTORE_RECONCILER_ENABLED`: "true" or "1" to enable (default: true)
    /// - `APPSTORE_RECONCILER_POLL_INTERVAL_SECS`: seconds between polls (default: 300)
    /// - `APPSTORE_RECONCILER_BATCH_SIZE`: max installations per poll (default: 50)
    pub fn from_env() -> Self {
        let enabled = std::env::var("APPSTORE_RECONCILER_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        let poll_interval_secs = std::env::var("APPSTORE_RECONCILER_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        let batch_size = std::env::var("APPSTORE_RECONCILER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);

        Self {
            enabled,
            poll_interval: Duration::from_secs(poll_interval_secs),
            batch_size,
        }
    }
}

/// Background worker running the orphan purge on a timer.
pub struct OrphanReconcilerWorker {
    orchestrator: Arc<AppStoreOrchestrator>,
    ctx: RequestContext,
    config: OrphanReconcilerWorkerConfig,
    shutdown: Arc<Notify>,
}

impl OrphanReconcilerWorker {
    /// Create a new reconciler. `ctx` carries the engine token used for lookups.
    pub fn new(
        orchestrator: Arc<AppStoreOrchestrator>,
        ctx: RequestContext,
        config: OrphanReconcilerWorkerConfig,
    ) -> Self {
        Self {
            orchestrator,
            ctx,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reconciler loop until the shutdown signal is received.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Orphan reconciler worker disabled");
            return;
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Orphan reconciler worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Orphan reconciler worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "Failed to reconcile installations pending delete");
                    }
                }
            }
        }

        info!("Orphan reconciler worker stopped");
    }

    async fn reconcile(&self) -> Result<()> {
        let purged = self
            .orchestrator
            .reconcile_pending_deletes(&self.ctx, self.config.batch_size)
            .await?;
        if purged > 0 {
            info!(purged = purged, "Purged installations of deleted engine apps");
        } else {
            debug!("No installations purged");
        }
        Ok(())
    }
}
