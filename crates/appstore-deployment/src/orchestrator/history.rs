// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment history and timeline reads.

use std::collections::HashMap;

use appstore_state::{
    AppstoreDeploymentStatus, DeploymentAppType, HistoryStatus, InstalledAppVersionHistoryRecord,
    TimelineRecord, TimelineStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::AppStoreOrchestrator;
use crate::catalog::ChartVersion;
use crate::error::{Error, Result};
use crate::helm::{InstallReleaseRequest, ReleaseIdentifier};

/// One deployment attempt as shown in the history view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentHistory {
    /// History row id.
    pub id: i64,
    /// Version the attempt deployed.
    pub installed_app_version_id: i64,
    /// Catalog chart version.
    pub app_store_application_version_id: i64,
    /// Chart name.
    pub chart_name: String,
    /// Chart version.
    pub chart_version: String,
    /// Attempt status.
    pub status: HistoryStatus,
    /// GitOps commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_hash: Option<String>,
    /// Start of the attempt.
    pub deployed_on: DateTime<Utc>,
    /// End of the attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<DateTime<Utc>>,
    /// User that started the attempt.
    pub deployed_by: i32,
    /// Outcome message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Installation summary returned with its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledAppInfo {
    /// App id.
    pub app_id: i64,
    /// App name.
    pub app_name: String,
    /// Installation.
    pub installed_app_id: i64,
    /// Active version, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_app_version_id: Option<i64>,
    /// Chart of the active version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_store_chart_name: Option<String>,
    /// Environment id.
    pub environment_id: i64,
    /// Environment name.
    pub environment_name: String,
    /// Target namespace.
    pub namespace: String,
    /// Target cluster.
    pub cluster_id: i64,
    /// Project owning the app.
    pub team_id: i64,
    /// Backend.
    pub deployment_app_type: DeploymentAppType,
    /// Installation status.
    pub status: AppstoreDeploymentStatus,
}

/// History of an installation, newest attempt first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentHistoryResponse {
    /// Attempts.
    pub deployment_history: Vec<DeploymentHistory>,
    /// Installation summary.
    pub installed_app_info: InstalledAppInfo,
}

/// Values and rendered manifest of one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmAppDeploymentManifestDetail {
    /// Values exactly as deployed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values_yaml: Option<String>,
    /// Rendered manifest, when the helm service could render it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
}

/// One timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineView {
    /// Phase.
    pub status: TimelineStatus,
    /// Detail.
    pub status_detail: String,
    /// When the phase was reached.
    pub status_time: DateTime<Utc>,
}

impl From<TimelineRecord> for TimelineView {
    fn from(record: TimelineRecord) -> Self {
        Self {
            status: record.status,
            status_detail: record.status_detail,
            status_time: record.status_time,
        }
    }
}

/// Timeline of one attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinesResponse {
    /// History row.
    pub installed_app_version_history_id: i64,
    /// Attempt status.
    pub status: HistoryStatus,
    /// Start of the attempt.
    pub deployment_started_on: DateTime<Utc>,
    /// End of the attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_finished_on: Option<DateTime<Utc>>,
    /// Entries in the order they were reached.
    pub timelines: Vec<TimelineView>,
}

/// Message shown for an attempt.
fn history_message(history: &InstalledAppVersionHistoryRecord) -> Option<String> {
    match history.helm_config() {
        Some(config) if config.error_in_installation => {
            Some(format!("Deployment failed: {}", config.message))
        }
        Some(config) if !config.message.is_empty() => Some(config.message),
        _ => history.message.clone(),
    }
}

impl AppStoreOrchestrator {
    async fn chart_cached(
        &self,
        cache: &mut HashMap<i64, Option<ChartVersion>>,
        chart_version_id: i64,
    ) -> Result<Option<ChartVersion>> {
        if let Some(chart) = cache.get(&chart_version_id) {
            return Ok(chart.clone());
        }
        let chart = self.catalog.chart_version(chart_version_id).await?;
        cache.insert(chart_version_id, chart.clone());
        Ok(chart)
    }

    /// Every deployment attempt of an installation, newest first.
    pub async fn get_deployment_history(
        &self,
        installed_app_id: i64,
    ) -> Result<DeploymentHistoryResponse> {
        let installed_app = self
            .store
            .get_installed_app(installed_app_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("installed app {} not found", installed_app_id)))?;
        let app = self.load_app(installed_app.app_id).await?;
        let environment = self.load_environment(installed_app.environment_id).await?;
        let active = self
            .store
            .get_active_installed_app_version(installed_app.id)
            .await?;

        let mut charts = HashMap::new();
        let rows = self
            .store
            .list_history_for_installed_app(installed_app.id)
            .await?;
        let mut deployment_history = Vec::with_capacity(rows.len());
        for row in rows {
            let chart = self
                .chart_cached(&mut charts, row.app_store_application_version_id)
                .await?;
            let (chart_name, chart_version) = chart
                .map(|c| (c.chart_name, c.version))
                .unwrap_or_default();
            deployment_history.push(DeploymentHistory {
                id: row.history.id,
                installed_app_version_id: row.history.installed_app_version_id,
                app_store_application_version_id: row.app_store_application_version_id,
                chart_name,
                chart_version,
                status: row.history.status,
                message: history_message(&row.history),
                git_hash: row.history.git_hash,
                deployed_on: row.history.started_on,
                finished_on: row.history.finished_on,
                deployed_by: row.history.audit.created_by,
            });
        }

        let app_store_chart_name = match &active {
            Some(version) => self
                .chart_cached(&mut charts, version.app_store_application_version_id)
                .await?
                .map(|c| c.chart_name),
            None => None,
        };
        Ok(DeploymentHistoryResponse {
            deployment_history,
            installed_app_info: InstalledAppInfo {
                app_id: app.id,
                app_name: app.app_name,
                installed_app_id: installed_app.id,
                installed_app_version_id: active.as_ref().map(|v| v.id),
                app_store_chart_name,
                environment_id: environment.id,
                environment_name: environment.name,
                namespace: environment.namespace,
                cluster_id: environment.cluster_id,
                team_id: app.team_id,
                deployment_app_type: installed_app.deployment_app_type,
                status: installed_app.status,
            },
        })
    }

    /// Load a history row and check it belongs to the installation.
    async fn owned_history(
        &self,
        installed_app_id: i64,
        history_id: i64,
    ) -> Result<(InstalledAppVersionHistoryRecord, i64)> {
        let not_found = || {
            Error::NotFound(format!(
                "deployment history {} not found for installed app {}",
                history_id, installed_app_id
            ))
        };
        let history = self.store.get_history(history_id).await?.ok_or_else(not_found)?;
        let version = self
            .store
            .get_installed_app_version(history.installed_app_version_id)
            .await?
            .filter(|v| v.installed_app_id == installed_app_id)
            .ok_or_else(not_found)?;
        Ok((history, version.app_store_application_version_id))
    }

    /// Values and rendered manifest of one attempt.
    ///
    /// The values are returned exactly as they were deployed. The manifest is
    /// rendered on demand and left empty when rendering fails.
    pub async fn get_deployment_history_info(
        &self,
        installed_app_id: i64,
        history_id: i64,
    ) -> Result<HelmAppDeploymentManifestDetail> {
        let (history, chart_version_id) = self.owned_history(installed_app_id, history_id).await?;
        let installed_app = self
            .store
            .get_installed_app(installed_app_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("installed app {} not found", installed_app_id)))?;
        let app = self.load_app(installed_app.app_id).await?;
        let environment = self.load_environment(installed_app.environment_id).await?;

        let manifest = match self.catalog.chart_version(chart_version_id).await? {
            Some(chart) => {
                let release = ReleaseIdentifier {
                    cluster_id: environment.cluster_id,
                    release_name: app.app_name.clone(),
                    release_namespace: environment.namespace.clone(),
                };
                let rendered = match InstallReleaseRequest::for_chart(
                    release,
                    &chart,
                    &history.values_yaml_raw,
                    history.id,
                ) {
                    Ok(request) => self.helm.template_chart(&request).await,
                    Err(e) => Err(e),
                };
                match rendered {
                    Ok(manifest) => Some(manifest),
                    Err(e) => {
                        warn!(history_id = history.id, error = %e, "Failed to render manifest");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(HelmAppDeploymentManifestDetail {
            values_yaml: Some(history.values_yaml_raw),
            manifest,
        })
    }

    /// Timeline of an attempt; the latest attempt of the active version when unset.
    pub async fn fetch_timelines(
        &self,
        installed_app_id: i64,
        history_id: Option<i64>,
    ) -> Result<TimelinesResponse> {
        let history = match history_id {
            Some(history_id) => self.owned_history(installed_app_id, history_id).await?.0,
            None => {
                let active = self
                    .store
                    .get_active_installed_app_version(installed_app_id)
                    .await?
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "no active version for installed app {}",
                            installed_app_id
                        ))
                    })?;
                self.store
                    .latest_history_for_version(active.id)
                    .await?
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "no deployment history for installed app {}",
                            installed_app_id
                        ))
                    })?
            }
        };

        let timelines = self.timelines.fetch(history.id).await?;
        Ok(TimelinesResponse {
            installed_app_version_history_id: history.id,
            status: history.status,
            deployment_started_on: history.started_on,
            deployment_finished_on: history.finished_on,
            timelines: timelines.into_iter().map(TimelineView::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appstore_state::{AuditLog, HelmReleaseStatusConfig};

    fn history(config: Option<HelmReleaseStatusConfig>, message: Option<&str>) -> InstalledAppVersionHistoryRecord {
        InstalledAppVersionHistoryRecord {
            id: 1,
            installed_app_version_id: 2,
            values_yaml_raw: String::new(),
            git_hash: None,
            status: HistoryStatus::Failed,
            started_on: Utc::now(),
            finished_on: None,
            helm_release_status_config: config.map(|c| serde_json::to_string(&c).unwrap()),
            message: message.map(str::to_string),
            audit: AuditLog::new(1),
        }
    }

    #[test]
    fn test_history_message() {
        assert_eq!(
            history_message(&history(
                Some(HelmReleaseStatusConfig::installation_failed("chart not found")),
                None
            )),
            Some("Deployment failed: chart not found".to_string())
        );
        assert_eq!(
            history_message(&history(Some(HelmReleaseStatusConfig::release_installed()), None)),
            Some("Release Installed".to_string())
        );
        assert_eq!(
            history_message(&history(None, Some("Deployment failed: git down"))),
            Some("Deployment failed: git down".to_string())
        );
        assert_eq!(history_message(&history(None, None)), None);
    }
}
