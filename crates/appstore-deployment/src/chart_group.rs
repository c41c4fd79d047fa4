// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chart group and default cluster component installs.
//!
//! A bulk request records every installation in one transaction, then hands
//! each one to the bulk deploy queue. The consumer ([`crate::bulk_deploy_worker`])
//! runs [`AppStoreOrchestrator::perform_deploy_stage`] per payload.

use std::sync::Arc;

use appstore_state::{AppstoreDeploymentStatus, ChartGroupLink, ReferenceValueKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::orchestrator::{
    AppStoreOrchestrator, InstallAppRequest, InstallAppVersionDto, InstallRequestType,
};
use crate::validation::DEFAULT_REPO_SENTINEL;

/// Topic bulk deploy payloads are published on.
pub const BULK_DEPLOY_TOPIC: &str = "ORCHESTRATOR.APP-STORE.BULK-DEPLOY";

/// Statuses from which a bulk installation may be (re-)enqueued.
const ENQUEUE_ALLOWED_FROM: [AppstoreDeploymentStatus; 3] = [
    AppstoreDeploymentStatus::DeployInit,
    AppstoreDeploymentStatus::QueError,
    AppstoreDeploymentStatus::Enqueued,
];

/// One installation to deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployPayload {
    /// Version to deploy.
    pub installed_app_version_id: i64,
    /// Attempt opened for it.
    pub installed_app_version_history_id: i64,
}

/// Errors publishing to the bulk deploy queue.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueueError {
    /// The consumer side is gone.
    #[error("bulk deploy queue closed")]
    Closed,

    /// The broker rejected the message.
    #[error("publish to {topic} failed: {message}")]
    Publish {
        /// Topic.
        topic: String,
        /// Broker message.
        message: String,
    },
}

/// Bulk deploy message bus.
#[async_trait]
pub trait BulkDeployQueue: Send + Sync {
    /// Publish one payload on `topic`.
    async fn publish(&self, topic: &str, payload: &DeployPayload) -> std::result::Result<(), QueueError>;
}

/// In-process queue backed by a tokio channel.
#[derive(Clone)]
pub struct ChannelBulkDeployQueue {
    sender: mpsc::Sender<DeployPayload>,
}

impl ChannelBulkDeployQueue {
    /// Create a queue holding up to `capacity` payloads, and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeployPayload>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl BulkDeployQueue for ChannelBulkDeployQueue {
    async fn publish(&self, topic: &str, payload: &DeployPayload) -> std::result::Result<(), QueueError> {
        self.sender
            .send(*payload)
            .await
            .map_err(|_| QueueError::Closed)?;
        debug!(
            topic = topic,
            installed_app_version_id = payload.installed_app_version_id,
            "Published bulk deploy payload"
        );
        Ok(())
    }
}

/// One chart of a bulk request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartGroupInstallChartRequest {
    /// App (and release) name.
    pub app_name: String,
    /// Target environment.
    pub environment_id: i64,
    /// Catalog chart version.
    pub app_store_version: i64,
    /// User values; reference values are used when empty.
    #[serde(default)]
    pub values_override_yaml: String,
    /// Reference values id.
    pub reference_value_id: Option<i64>,
    /// Reference values kind.
    #[serde(default)]
    pub reference_value_kind: ReferenceValueKind,
    /// Entry of the chart group.
    pub chart_group_entry_id: Option<i64>,
}

/// Bulk install request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartGroupInstallRequest {
    /// Project owning the apps.
    pub project_id: i64,
    /// Chart group the installs belong to.
    pub chart_group_id: Option<i64>,
    /// Acting user.
    pub user_id: i32,
    /// Charts to install.
    pub charts: Vec<ChartGroupInstallChartRequest>,
}

/// Records bulk installs and enqueues them for deployment.
pub struct ChartGroupService {
    orchestrator: Arc<AppStoreOrchestrator>,
    queue: Arc<dyn BulkDeployQueue>,
}

impl ChartGroupService {
    /// Create a service publishing on `queue`.
    pub fn new(orchestrator: Arc<AppStoreOrchestrator>, queue: Arc<dyn BulkDeployQueue>) -> Self {
        Self {
            orchestrator,
            queue,
        }
    }

    /// Install every chart of a chart group request.
    pub async fn deploy_bulk(
        &self,
        request: ChartGroupInstallRequest,
    ) -> Result<Vec<InstallAppVersionDto>> {
        let link = request.chart_group_id.map(|chart_group_id| ChartGroupLink {
            chart_group_id,
            chart_group_entry_id: None,
        });
        self.deploy(
            request.charts,
            request.project_id,
            request.user_id,
            InstallRequestType::Bulk,
            None,
            link,
        )
        .await
    }

    /// Install the default components of a new cluster.
    pub async fn deploy_default_chart_on_cluster(
        &self,
        cluster_id: i64,
        project_id: i64,
        charts: Vec<ChartGroupInstallChartRequest>,
        user_id: i32,
    ) -> Result<Vec<InstallAppVersionDto>> {
        self.deploy(
            charts,
            project_id,
            user_id,
            InstallRequestType::DefaultClusterComponent,
            Some(cluster_id),
            None,
        )
        .await
    }

    async fn values_for(&self, chart: &ChartGroupInstallChartRequest) -> Result<String> {
        if !chart.values_override_yaml.trim().is_empty() {
            return Ok(chart.values_override_yaml.clone());
        }
        let id = match chart.reference_value_kind {
            ReferenceValueKind::Default => chart.app_store_version,
            _ => chart.reference_value_id.unwrap_or(chart.app_store_version),
        };
        Ok(self
            .orchestrator
            .catalog()
            .reference_values(chart.reference_value_kind, id)
            .await?
            .unwrap_or_default())
    }

    async fn deploy(
        &self,
        charts: Vec<ChartGroupInstallChartRequest>,
        project_id: i64,
        user_id: i32,
        request_type: InstallRequestType,
        default_cluster_component: Option<i64>,
        chart_group: Option<ChartGroupLink>,
    ) -> Result<Vec<InstallAppVersionDto>> {
        if charts.is_empty() {
            return Err(Error::Validation(
                "Invalid request! no charts to install".to_string(),
            ));
        }

        let mut drafts = Vec::with_capacity(charts.len());
        let mut environments = Vec::with_capacity(charts.len());
        for chart in &charts {
            let request = InstallAppRequest {
                app_id: None,
                app_name: chart.app_name.clone(),
                team_id: project_id,
                environment_id: chart.environment_id,
                app_store_application_version_id: chart.app_store_version,
                values_override_yaml: self.values_for(chart).await?,
                reference_value_id: chart.reference_value_id,
                reference_value_kind: chart.reference_value_kind,
                deployment_app_type: None,
                git_ops_repo_url: Some(DEFAULT_REPO_SENTINEL.to_string()),
                user_id,
                request_type,
                default_cluster_component,
                skip_app_creation: false,
            };
            let (mut draft, _, environment) = self.orchestrator.prepare_draft(&request).await?;
            draft.chart_group = chart_group.map(|link| ChartGroupLink {
                chart_group_entry_id: chart.chart_group_entry_id,
                ..link
            });
            drafts.push(draft);
            environments.push(environment);
        }

        let created = self.orchestrator.store().create_installations(&drafts).await?;
        info!(
            count = created.len(),
            request_type = ?request_type,
            chart_group_id = chart_group.map(|l| l.chart_group_id),
            "Bulk installations recorded"
        );

        let mut dtos = Vec::with_capacity(created.len());
        for (installation, environment) in created.iter().zip(&environments) {
            let mut dto = InstallAppVersionDto::from_created(installation, environment);
            dto.user_id = user_id;
            dto.status = Some(self.enqueue(&dto).await);
            dtos.push(dto);
        }
        Ok(dtos)
    }

    /// Publish one installation and record the queue outcome on it.
    async fn enqueue(&self, dto: &InstallAppVersionDto) -> AppstoreDeploymentStatus {
        let payload = DeployPayload {
            installed_app_version_id: dto.installed_app_version_id,
            installed_app_version_history_id: dto.installed_app_version_history_id,
        };
        let status = match self.queue.publish(BULK_DEPLOY_TOPIC, &payload).await {
            Ok(()) => AppstoreDeploymentStatus::Enqueued,
            Err(e) => {
                warn!(
                    installed_app_id = dto.installed_app_id,
                    error = %e,
                    "Failed to publish bulk deploy payload"
                );
                AppstoreDeploymentStatus::QueError
            }
        };
        match self
            .orchestrator
            .store()
            .update_installed_app_status_if(dto.installed_app_id, status, &ENQUEUE_ALLOWED_FROM, dto.user_id)
            .await
        {
            Ok(true) => status,
            Ok(false) => {
                debug!(
                    installed_app_id = dto.installed_app_id,
                    "Installation moved on before enqueue status was recorded"
                );
                dto.status.unwrap_or(status)
            }
            Err(e) => {
                warn!(
                    installed_app_id = dto.installed_app_id,
                    error = %e,
                    "Failed to record enqueue status"
                );
                dto.status.unwrap_or(status)
            }
        }
    }
}
