// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Helm releases installed outside the chart store, and helm release callbacks.

use appstore_state::{
    AppRecord, AppstoreDeploymentStatus, DeploymentAppType, HelmReleaseStatusConfig,
    HistoryStatus, HistoryTransition, InstallationDraft, NewApp, ReferenceValueKind, StoreError,
    TimelineEntry, TimelineStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{AppStoreOrchestrator, InstallAppVersionDto};
use crate::catalog::ChartOrigin;
use crate::error::{Error, Result};
use crate::helm::{InstallReleaseRequest, ReleaseIdentifier};
use crate::timeline::{DEPLOYMENT_SUCCEEDED_DETAIL, deployment_failed_message};
use crate::validation::validate_values_yaml;

/// Message returned when linking a release that does not exist.
pub const RELEASE_NOT_INSTALLED_MESSAGE: &str = "release is not installed. so can not be updated";

/// Request to adopt an existing helm release into the chart store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkHelmAppRequest {
    /// Release (and app) name.
    pub app_name: String,
    /// Environment the release lives in.
    pub environment_id: i64,
    /// Chart version the release is bound to.
    pub app_store_application_version_id: i64,
    /// Values of the release.
    #[serde(default)]
    pub values_override_yaml: String,
    /// Reference values id.
    pub reference_value_id: Option<i64>,
    /// Reference values kind.
    #[serde(default)]
    pub reference_value_kind: ReferenceValueKind,
    /// Project the app is created in.
    pub team_id: i64,
    /// Acting user.
    pub user_id: i32,
}

/// Request to move a helm app to another project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectHelmAppRequest {
    /// `clusterId|namespace|releaseName` for external releases, or an app id.
    pub app_id: String,
    /// App name, used when `app_id` is not a release identifier.
    #[serde(default)]
    pub app_name: String,
    /// New project.
    pub team_id: i64,
    /// Acting user.
    pub user_id: i32,
}

/// Parse `clusterId|namespace|releaseName`.
pub fn decode_release_app_id(app_id: &str) -> Result<ReleaseIdentifier> {
    let parts: Vec<&str> = app_id.split('|').collect();
    let [cluster_id, namespace, release_name] = parts.as_slice() else {
        return Err(Error::Validation(format!(
            "Invalid request! app id '{}' is not of the form clusterId|namespace|releaseName",
            app_id
        )));
    };
    let cluster_id = cluster_id.parse::<i64>().map_err(|_| {
        Error::Validation(format!("Invalid request! invalid cluster id in app id '{}'", app_id))
    })?;
    if release_name.is_empty() {
        return Err(Error::Validation(format!(
            "Invalid request! release name missing in app id '{}'",
            app_id
        )));
    }
    Ok(ReleaseIdentifier {
        cluster_id,
        release_name: release_name.to_string(),
        release_namespace: namespace.to_string(),
    })
}

impl AppStoreOrchestrator {
    /// Whether the chart source of a chart version can currently be pulled.
    pub async fn is_chart_repo_active(&self, chart_version_id: i64) -> Result<bool> {
        let chart = self.load_chart(chart_version_id).await?;
        match &chart.origin {
            ChartOrigin::Repository { active, .. } => Ok(*active),
            ChartOrigin::Oci { registry_id, .. } => self.catalog.is_oci_pull_active(registry_id).await,
        }
    }

    /// Record an existing helm release as a chart store installation.
    pub async fn link_helm_application_to_chart_store(
        &self,
        request: LinkHelmAppRequest,
    ) -> Result<InstallAppVersionDto> {
        if !self
            .is_chart_repo_active(request.app_store_application_version_id)
            .await?
        {
            return Err(Error::Validation(format!(
                "Invalid request! chart repository of chart version {} is not active",
                request.app_store_application_version_id
            )));
        }
        validate_values_yaml(&request.values_override_yaml)?;
        let chart = self.load_chart(request.app_store_application_version_id).await?;
        let environment = self.load_environment(request.environment_id).await?;

        let release = ReleaseIdentifier {
            cluster_id: environment.cluster_id,
            release_name: request.app_name.clone(),
            release_namespace: environment.namespace.clone(),
        };
        if !self.helm.is_release_installed(&release).await? {
            return Err(Error::Validation(RELEASE_NOT_INSTALLED_MESSAGE.to_string()));
        }

        let created = self
            .store
            .create_installation(&InstallationDraft {
                app_id: None,
                app_name: request.app_name.clone(),
                team_id: request.team_id,
                skip_app_creation: true,
                environment_id: environment.id,
                deployment_app_type: DeploymentAppType::Helm,
                git_ops_repo_name: None,
                git_ops_repo_url: None,
                is_custom_repository: false,
                app_store_application_version_id: chart.id,
                values_yaml: request.values_override_yaml.clone(),
                reference_value_id: request.reference_value_id,
                reference_value_kind: request.reference_value_kind,
                default_cluster_component: None,
                chart_group: None,
                initial_timelines: Vec::new(),
                user_id: request.user_id,
            })
            .await?;
        let mut dto = InstallAppVersionDto::from_created(&created, &environment);
        dto.user_id = request.user_id;

        let linked = match InstallReleaseRequest::for_chart(
            release,
            &chart,
            &request.values_override_yaml,
            dto.installed_app_version_history_id,
        ) {
            Ok(link) => self.helm.link_release_to_chart(&link).await,
            Err(e) => Err(e),
        };
        match linked {
            Ok(()) => {
                self.close_helm_history(dto.installed_app_version_history_id, dto.installed_app_id, None, dto.user_id)
                    .await?;
                dto.status = Some(AppstoreDeploymentStatus::DeploySuccess);
                info!(
                    installed_app_id = dto.installed_app_id,
                    release = %dto.app_name,
                    "Linked helm release to chart store"
                );
                Ok(dto)
            }
            Err(e) => {
                let err = Error::from(e);
                self.close_helm_history(
                    dto.installed_app_version_history_id,
                    dto.installed_app_id,
                    Some(err.to_string()),
                    dto.user_id,
                )
                .await?;
                Err(err)
            }
        }
    }

    /// Create the app of an external helm release, or move it to another project.
    pub async fn update_project_helm_app(
        &self,
        request: UpdateProjectHelmAppRequest,
    ) -> Result<AppRecord> {
        let app_name = if request.app_id.contains('|') {
            decode_release_app_id(&request.app_id)?.release_name
        } else {
            request.app_name.clone()
        };
        if app_name.is_empty() {
            return Err(Error::Validation("Invalid request! app name is required".to_string()));
        }

        match self.store.find_active_app_by_name(&app_name).await? {
            Some(app) => {
                self.store
                    .update_app_team(app.id, request.team_id, request.user_id)
                    .await?;
                info!(app_id = app.id, team_id = request.team_id, "Moved helm app to project");
                Ok(AppRecord {
                    team_id: request.team_id,
                    ..app
                })
            }
            None => {
                let created = self
                    .store
                    .create_app(&NewApp {
                        app_name: app_name.clone(),
                        display_name: None,
                        team_id: request.team_id,
                        user_id: request.user_id,
                    })
                    .await
                    .map_err(|e| match e {
                        StoreError::AppAlreadyExists { .. } => {
                            Error::Conflict(format!("app already exists with name {}", app_name))
                        }
                        other => Error::Store(other),
                    })?;
                info!(app_id = created.id, app_name = %app_name, "Created app for helm release");
                Ok(created)
            }
        }
    }

    /// Close a history row left open by an asynchronous helm install or upgrade.
    ///
    /// Repeated events for an already closed row are ignored.
    pub async fn on_helm_release_event(
        &self,
        history_id: i64,
        succeeded: bool,
        message: Option<String>,
        user_id: i32,
    ) -> Result<()> {
        let history = self
            .store
            .get_history(history_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("deployment history {} not found", history_id)))?;
        if history.status.is_terminal() {
            debug!(history_id = history_id, status = %history.status, "History already closed");
            return Ok(());
        }
        let version = self
            .store
            .get_installed_app_version(history.installed_app_version_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "installed app version {} not found",
                    history.installed_app_version_id
                ))
            })?;

        let failure = if succeeded {
            None
        } else {
            Some(message.unwrap_or_else(|| "helm release failed".to_string()))
        };
        self.close_helm_history(history_id, version.installed_app_id, failure, user_id)
            .await
    }

    /// Close a helm history row and set the installation status to match.
    async fn close_helm_history(
        &self,
        history_id: i64,
        installed_app_id: i64,
        failure: Option<String>,
        user_id: i32,
    ) -> Result<()> {
        let (transition, status) = match failure {
            None => (
                HistoryTransition::to(history_id, HistoryStatus::Succeeded, user_id)
                    .with_helm_config(HelmReleaseStatusConfig::release_installed())
                    .with_timeline(TimelineEntry::new(
                        TimelineStatus::DeploymentSucceeded,
                        DEPLOYMENT_SUCCEEDED_DETAIL,
                    )),
                AppstoreDeploymentStatus::DeploySuccess,
            ),
            Some(message) => {
                warn!(history_id = history_id, error = %message, "Helm release failed");
                let failed = deployment_failed_message(&message);
                (
                    HistoryTransition::to(history_id, HistoryStatus::Failed, user_id)
                        .with_helm_config(HelmReleaseStatusConfig::installation_failed(message))
                        .with_message(failed.clone())
                        .with_timeline(TimelineEntry::new(TimelineStatus::DeploymentFailed, failed)),
                    AppstoreDeploymentStatus::HelmError,
                )
            }
        };
        self.store.transition_history(&transition).await?;
        self.store
            .update_installed_app_status(installed_app_id, status, user_id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_release_app_id() {
        let release = decode_release_app_id("1|prod|svc-a").unwrap();
        assert_eq!(release.cluster_id, 1);
        assert_eq!(release.release_namespace, "prod");
        assert_eq!(release.release_name, "svc-a");

        for invalid in ["svc-a", "x|prod|svc-a", "1|prod|", "1|prod|svc-a|extra"] {
            assert!(decode_release_app_id(invalid).is_err(), "{}", invalid);
        }
    }
}
