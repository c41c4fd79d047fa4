// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the deployment engine.
//!
//! [`DeploymentRuntime`] wires the orchestrator, the chart group service and
//! the background workers so the engine can run inside an existing tokio
//! application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use appstore_deployment::runtime::DeploymentRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = DeploymentRuntime::builder()
//!         .store(store)
//!         .catalog(catalog.clone())
//!         .environments(catalog)
//!         .helm(helm)
//!         .gitops(gitops_backend)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let dto = runtime.orchestrator().install_app(&ctx, request).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use appstore_state::Persistence;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backend::GitOpsBackend;
use crate::bulk_deploy_worker::{BulkDeployWorker, BulkDeployWorkerConfig};
use crate::catalog::{ChartCatalog, EnvironmentReader};
use crate::chart_group::{ChannelBulkDeployQueue, ChartGroupService};
use crate::config::DeploymentSettings;
use crate::helm::HelmClient;
use crate::orchestrator::{AppStoreOrchestrator, RequestContext};
use crate::reconciler_worker::{OrphanReconcilerWorker, OrphanReconcilerWorkerConfig};

/// Builder for creating a [`DeploymentRuntime`].
pub struct DeploymentRuntimeBuilder {
    store: Option<Arc<dyn Persistence>>,
    catalog: Option<Arc<dyn ChartCatalog>>,
    environments: Option<Arc<dyn EnvironmentReader>>,
    helm: Option<Arc<dyn HelmClient>>,
    gitops: Option<GitOpsBackend>,
    settings: DeploymentSettings,
    engine_token: String,
    bulk_queue_capacity: usize,
    reconciler_config: OrphanReconcilerWorkerConfig,
    bulk_deploy_config: BulkDeployWorkerConfig,
}

impl Default for DeploymentRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            catalog: None,
            environments: None,
            helm: None,
            gitops: None,
            settings: DeploymentSettings::default(),
            engine_token: String::new(),
            bulk_queue_capacity: 256,
            reconciler_config: OrphanReconcilerWorkerConfig::from_env(),
            bulk_deploy_config: BulkDeployWorkerConfig::from_env(),
        }
    }
}

impl DeploymentRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the release state store (required).
    pub fn store(mut self, store: Arc<dyn Persistence>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the chart catalog (required).
    pub fn catalog(mut self, catalog: Arc<dyn ChartCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set the environment reader (required).
    pub fn environments(mut self, environments: Arc<dyn EnvironmentReader>) -> Self {
        self.environments = Some(environments);
        self
    }

    /// Set the helm service client (required).
    pub fn helm(mut self, helm: Arc<dyn HelmClient>) -> Self {
        self.helm = Some(helm);
        self
    }

    /// Enable GitOps installations.
    ///
    /// Default: disabled
    pub fn gitops(mut self, gitops: GitOpsBackend) -> Self {
        self.gitops = Some(gitops);
        self
    }

    /// Set the policy switches.
    ///
    /// Default: [`DeploymentSettings::default()`]
    pub fn settings(mut self, settings: DeploymentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the engine token used by background workers.
    ///
    /// Default: empty
    pub fn engine_token(mut self, token: impl Into<String>) -> Self {
        self.engine_token = token.into();
        self
    }

    /// Set how many bulk deploy payloads may wait in the queue.
    ///
    /// Default: 256
    pub fn bulk_queue_capacity(mut self, capacity: usize) -> Self {
        self.bulk_queue_capacity = capacity;
        self
    }

    /// Set the orphan reconciler configuration.
    ///
    /// Default: Loaded from environment variables via [`OrphanReconcilerWorkerConfig::from_env()`].
    pub fn reconciler_config(mut self, config: OrphanReconcilerWorkerConfig) -> Self {
        self.reconciler_config = config;
        self
    }

    /// Set the bulk deploy worker configuration.
    ///
    /// Default: Loaded from environment variables via [`BulkDeployWorkerConfig::from_env()`].
    pub fn bulk_deploy_config(mut self, config: BulkDeployWorkerConfig) -> Self {
        self.bulk_deploy_config = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<DeploymentRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let catalog = self
            .catalog
            .ok_or_else(|| anyhow::anyhow!("catalog is required"))?;
        let environments = self
            .environments
            .ok_or_else(|| anyhow::anyhow!("environments is required"))?;
        let helm = self
            .helm
            .ok_or_else(|| anyhow::anyhow!("helm is required"))?;
        if self.bulk_queue_capacity == 0 {
            return Err(anyhow::anyhow!("bulk_queue_capacity must be positive"));
        }

        Ok(DeploymentRuntimeConfig {
            store,
            catalog,
            environments,
            helm,
            gitops: self.gitops,
            settings: self.settings,
            engine_token: self.engine_token,
            bulk_queue_capacity: self.bulk_queue_capacity,
            reconciler_config: self.reconciler_config,
            bulk_deploy_config: self.bulk_deploy_config,
        })
    }
}

/// Configuration for a [`DeploymentRuntime`].
pub struct DeploymentRuntimeConfig {
    store: Arc<dyn Persistence>,
    catalog: Arc<dyn ChartCatalog>,
    environments: Arc<dyn EnvironmentReader>,
    helm: Arc<dyn HelmClient>,
    gitops: Option<GitOpsBackend>,
    settings: DeploymentSettings,
    engine_token: String,
    bulk_queue_capacity: usize,
    reconciler_config: OrphanReconcilerWorkerConfig,
    bulk_deploy_config: BulkDeployWorkerConfig,
}

impl DeploymentRuntimeConfig {
    /// Start the runtime, spawning the background workers.
    pub async fn start(self) -> Result<DeploymentRuntime> {
        let gitops_enabled = self.gitops.is_some();
        let mut orchestrator = AppStoreOrchestrator::new(
            self.store,
            self.catalog,
            self.environments,
            self.helm,
            self.settings,
        );
        if let Some(gitops) = self.gitops {
            orchestrator = orchestrator.with_gitops(gitops);
        }
        let orchestrator = Arc::new(orchestrator);
        let ctx = RequestContext::new(self.engine_token);

        let (queue, receiver) = ChannelBulkDeployQueue::channel(self.bulk_queue_capacity);
        let chart_groups = Arc::new(ChartGroupService::new(
            orchestrator.clone(),
            Arc::new(queue),
        ));

        // Bulk deploy worker
        let bulk_deploy_worker = BulkDeployWorker::new(
            orchestrator.clone(),
            ctx.clone(),
            receiver,
            self.bulk_deploy_config,
        );
        let bulk_deploy_shutdown = bulk_deploy_worker.shutdown_handle();
        let bulk_deploy_handle = tokio::spawn(async move {
            bulk_deploy_worker.run().await;
        });

        // Orphan reconciler
        let reconciler = OrphanReconcilerWorker::new(
            orchestrator.clone(),
            ctx,
            self.reconciler_config,
        );
        let reconciler_shutdown = reconciler.shutdown_handle();
        let reconciler_handle = tokio::spawn(async move {
            reconciler.run().await;
        });

        info!(gitops_enabled = gitops_enabled, "DeploymentRuntime started");

        Ok(DeploymentRuntime {
            orchestrator,
            chart_groups,
            bulk_deploy_handle,
            reconciler_handle,
            bulk_deploy_shutdown,
            reconciler_shutdown,
        })
    }
}

/// A running deployment engine.
///
/// The runtime manages:
/// - the orchestrator serving install, upgrade, rollback and delete requests
/// - the chart group service and the worker draining its queue
/// - the orphan reconciler
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct DeploymentRuntime {
    orchestrator: Arc<AppStoreOrchestrator>,
    chart_groups: Arc<ChartGroupService>,
    bulk_deploy_handle: JoinHandle<()>,
    reconciler_handle: JoinHandle<()>,
    bulk_deploy_shutdown: Arc<Notify>,
    reconciler_shutdown: Arc<Notify>,
}

impl DeploymentRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> DeploymentRuntimeBuilder {
        DeploymentRuntimeBuilder::new()
    }

    /// The orchestrator.
    pub fn orchestrator(&self) -> &Arc<AppStoreOrchestrator> {
        &self.orchestrator
    }

    /// The chart group service.
    pub fn chart_groups(&self) -> &Arc<ChartGroupService> {
        &self.chart_groups
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals both workers to stop, then waits for them. A payload being
    /// deployed when the signal arrives is finished first.
    pub async fn shutdown(self) -> Result<()> {
        info!("DeploymentRuntime shutting down...");

        self.bulk_deploy_shutdown.notify_one();
        self.reconciler_shutdown.notify_one();

        if let Err(e) = self.bulk_deploy_handle.await {
            error!("Bulk deploy worker task panicked: {}", e);
        }
        if let Err(e) = self.reconciler_handle.await {
            error!("Orphan reconciler task panicked: {}", e);
        }

        info!("DeploymentRuntime shutdown complete");
        Ok(())
    }

    /// Check if the workers are still running.
    pub fn is_running(&self) -> bool {
        !self.bulk_deploy_handle.is_finished() && !self.reconciler_handle.is_finished()
    }
}
