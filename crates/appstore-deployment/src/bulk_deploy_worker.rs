// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker deploying installations enqueued by bulk requests.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, error, info};

use crate::chart_group::DeployPayload;
use crate::orchestrator::{AppStoreOrchestrator, RequestContext};

/// Configuration for the bulk deploy worker.
#[derive(Debug, Clone)]
pub struct BulkDeployWorkerConfig {
    /// Whether the worker consumes the queue.
    pub enabled: bool,
}

impl Default for BulkDeployWorkerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl BulkDeployWorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `APPSTORE_BULK_DEPLOY_ENABLED`: "true" or "1" to enable (default: true)
    pub fn from_env() -> Self {
        let enabled = std::env::var("APPSTORE_BULK_DEPLOY_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);
        Self { enabled }
    }
}

/// Drains the in-process bulk deploy queue, one payload at a time.
pub struct BulkDeployWorker {
    orchestrator: Arc<AppStoreOrchestrator>,
    ctx: RequestContext,
    receiver: Mutex<mpsc::Receiver<DeployPayload>>,
    config: BulkDeployWorkerConfig,
    shutdown: Arc<Notify>,
}

impl BulkDeployWorker {
    /// Create a worker consuming `receiver`.
    pub fn new(
        orchestrator: Arc<AppStoreOrchestrator>,
        ctx: RequestContext,
        receiver: mpsc::Receiver<DeployPayload>,
        config: BulkDeployWorkerConfig,
    ) -> Self {
        Self {
            orchestrator,
            ctx,
            receiver: Mutex::new(receiver),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Consume payloads until shutdown or until every publisher is gone.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Bulk deploy worker disabled");
            return;
        }
        info!("Bulk deploy worker started");

        let mut receiver = self.receiver.lock().await;
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Bulk deploy worker received shutdown signal");
                    break;
                }

                payload = receiver.recv() => {
                    match payload {
                        Some(payload) => self.deploy(payload).await,
                        None => {
                            info!("Bulk deploy queue closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("Bulk deploy worker stopped");
    }

    async fn deploy(&self, payload: DeployPayload) {
        debug!(
            installed_app_version_id = payload.installed_app_version_id,
            history_id = payload.installed_app_version_history_id,
            "Deploying bulk installation"
        );
        match self
            .orchestrator
            .perform_deploy_stage(&self.ctx, &payload)
            .await
        {
            Ok(dto) => info!(
                installed_app_id = dto.installed_app_id,
                app_name = %dto.app_name,
                "Bulk installation deployed"
            ),
            Err(e) => error!(
                installed_app_version_id = payload.installed_app_version_id,
                error = %e,
                "Bulk installation failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        assert!(BulkDeployWorkerConfig::default().enabled);
    }
}
