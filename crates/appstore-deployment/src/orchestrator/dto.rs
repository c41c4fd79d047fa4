// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Requests accepted by the orchestrator and the working state of one run.

use appstore_state::{
    AppstoreDeploymentStatus, CreatedInstallation, DeploymentAppType, InstalledAppRecord,
    InstalledAppVersionRecord, ReferenceValueKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::EnvironmentInfo;
use crate::gitops::ChartCommitTarget;
use crate::helm::ReleaseIdentifier;

/// Per-request context. The token is forwarded to the deployment engine.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Bearer token of the caller.
    pub auth_token: String,
}

impl RequestContext {
    /// Context carrying `auth_token`.
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
        }
    }
}

/// How an install request reached the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallRequestType {
    /// A single install from the chart store.
    #[default]
    Single,
    /// Part of a chart group batch.
    Bulk,
    /// A default component installed on cluster creation.
    DefaultClusterComponent,
}

/// Install request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallAppRequest {
    /// Existing app to install under.
    pub app_id: Option<i64>,
    /// App (and release) name.
    pub app_name: String,
    /// Project owning the app.
    pub team_id: i64,
    /// Target environment.
    pub environment_id: i64,
    /// Catalog chart version.
    pub app_store_application_version_id: i64,
    /// User values.
    pub values_override_yaml: String,
    /// Reference values id.
    pub reference_value_id: Option<i64>,
    /// Reference values kind.
    #[serde(default)]
    pub reference_value_kind: ReferenceValueKind,
    /// Requested backend; resolved by policy when unset.
    pub deployment_app_type: Option<DeploymentAppType>,
    /// User supplied repository URL, or `Default`.
    #[serde(rename = "gitRepoURL")]
    pub git_ops_repo_url: Option<String>,
    /// Acting user.
    pub user_id: i32,
    /// Origin of the request.
    #[serde(default)]
    pub request_type: InstallRequestType,
    /// Cluster the app is a default component of.
    pub default_cluster_component: Option<i64>,
    /// Reuse an existing app row with the same name.
    #[serde(default)]
    pub skip_app_creation: bool,
}

/// Upgrade request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInstalledAppRequest {
    /// Installation.
    pub installed_app_id: i64,
    /// Version being edited; `0` when the chart changes.
    #[serde(rename = "id")]
    pub installed_app_version_id: i64,
    /// Catalog chart version to bind.
    pub app_store_application_version_id: i64,
    /// New user values.
    pub values_override_yaml: String,
    /// Reference values id.
    pub reference_value_id: Option<i64>,
    /// Reference values kind.
    #[serde(default)]
    pub reference_value_kind: ReferenceValueKind,
    /// Acting user.
    pub user_id: i32,
}

/// Delete request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteInstalledAppRequest {
    /// Installation.
    pub installed_app_id: i64,
    /// Continue when the backend cannot delete.
    #[serde(default)]
    pub force_delete: bool,
    /// Delete the engine object without its resources.
    #[serde(default)]
    pub non_cascade_delete: bool,
    /// Only delete the engine object; the reconciler purges the rows later.
    #[serde(default)]
    pub acd_partial_delete: bool,
    /// Acting user.
    pub user_id: i32,
}

/// Outcome of a delete request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledAppDeleteResponse {
    /// Whether the delete went ahead.
    pub delete_initiated: bool,
    /// Whether the target cluster answered.
    pub cluster_reachable: bool,
    /// Cluster name, set when unreachable.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
}

/// Rollback request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    /// Installation.
    pub installed_app_id: i64,
    /// History row rolled back to.
    pub installed_app_version_history_id: i64,
    /// Helm revision rolled back to (helm installations).
    pub deployment_version: Option<i32>,
    /// Acting user.
    pub user_id: i32,
}

/// Working state of one orchestrator run, returned to the caller.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallAppVersionDto {
    /// Installation.
    pub installed_app_id: i64,
    /// Active version.
    pub installed_app_version_id: i64,
    /// Deployment attempt.
    pub installed_app_version_history_id: i64,
    /// App id.
    pub app_id: i64,
    /// App (and release) name.
    pub app_name: String,
    /// Project owning the app.
    pub team_id: i64,
    /// Environment id.
    pub environment_id: i64,
    /// Environment name.
    pub environment_name: String,
    /// Target namespace.
    pub namespace: String,
    /// Target cluster.
    pub cluster_id: i64,
    /// Target cluster API server.
    #[serde(skip)]
    pub cluster_server_url: String,
    /// Catalog chart version.
    pub app_store_application_version_id: i64,
    /// User values.
    pub values_override_yaml: String,
    /// Reference values id.
    pub reference_value_id: Option<i64>,
    /// Reference values kind.
    pub reference_value_kind: Option<ReferenceValueKind>,
    /// Backend.
    pub deployment_app_type: Option<DeploymentAppType>,
    /// GitOps repository name.
    pub git_ops_repo_name: Option<String>,
    /// GitOps repository URL.
    #[serde(rename = "gitRepoURL")]
    pub git_ops_repo_url: Option<String>,
    /// Whether the repository was supplied by the user.
    pub is_custom_repository: bool,
    /// Whether the repository was created during this run.
    pub is_new_git_ops_repo: bool,
    /// Hash of the last commit of this run.
    pub git_hash: Option<String>,
    /// Installation status.
    pub status: Option<AppstoreDeploymentStatus>,
    /// Engine objects had already been removed when the run started.
    #[serde(skip)]
    pub deployment_app_delete_request: bool,
    /// Acting user.
    pub user_id: i32,
    /// Delete outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_response: Option<InstalledAppDeleteResponse>,
    /// Manifest rendered for virtual environments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered_manifest: Option<String>,
    /// Packaged chart of manifest-download installations.
    #[serde(skip)]
    pub manifest_archive: Option<Vec<u8>>,
    /// When the deployment attempt was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_started_on: Option<DateTime<Utc>>,
}

impl InstallAppVersionDto {
    /// Fill the run state from freshly recorded rows.
    pub fn from_created(created: &CreatedInstallation, environment: &EnvironmentInfo) -> Self {
        let mut dto = Self::from_installation(
            &created.installed_app,
            &created.version,
            &created.app.app_name,
            environment,
        );
        dto.team_id = created.app.team_id;
        dto.installed_app_version_history_id = created.history.id;
        dto.deployment_started_on = Some(created.history.started_on);
        dto
    }

    /// Fill the run state from an installation and its active version.
    pub fn from_installation(
        installed_app: &InstalledAppRecord,
        version: &InstalledAppVersionRecord,
        app_name: &str,
        environment: &EnvironmentInfo,
    ) -> Self {
        Self {
            installed_app_id: installed_app.id,
            installed_app_version_id: version.id,
            app_id: installed_app.app_id,
            app_name: app_name.to_string(),
            environment_id: environment.id,
            environment_name: environment.name.clone(),
            namespace: environment.namespace.clone(),
            cluster_id: environment.cluster_id,
            cluster_server_url: environment.cluster_server_url.clone(),
            app_store_application_version_id: version.app_store_application_version_id,
            values_override_yaml: version.values_yaml_raw.clone(),
            reference_value_id: version.reference_value_id,
            reference_value_kind: Some(version.reference_value_kind),
            deployment_app_type: Some(installed_app.deployment_app_type),
            git_ops_repo_name: installed_app.git_ops_repo_name.clone(),
            git_ops_repo_url: installed_app.repo_url().map(str::to_string),
            is_custom_repository: installed_app.is_custom_repository,
            status: Some(installed_app.status),
            deployment_app_delete_request: installed_app.deployment_app_delete_request,
            ..Default::default()
        }
    }

    /// Engine app name and chart directory: `{appName}-{envName}`.
    pub fn acd_app_name(&self) -> String {
        format!("{}-{}", self.app_name, self.environment_name)
    }

    /// Helm release of the installation.
    pub fn release_identifier(&self) -> ReleaseIdentifier {
        ReleaseIdentifier {
            cluster_id: self.cluster_id,
            release_name: self.app_name.clone(),
            release_namespace: self.namespace.clone(),
        }
    }

    /// Chart commit target, once the repository URL is known.
    pub fn commit_target(&self) -> Option<ChartCommitTarget> {
        self.git_ops_repo_url
            .as_ref()
            .map(|repo_url| ChartCommitTarget {
                app_name: self.app_name.clone(),
                environment_name: self.environment_name.clone(),
                environment_id: self.environment_id,
                app_store_application_version_id: self.app_store_application_version_id,
                repo_url: repo_url.clone(),
            })
    }
}
