// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entity records and status taxonomies of the release state store.
//!
//! Records derive `sqlx::FromRow` and are shared by the PostgreSQL and SQLite
//! backends. Enumerated columns are stored as text (or as an integer ordinal for
//! [`AppstoreDeploymentStatus`]) and decoded through `TryFrom` so callers only
//! ever see typed values.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::StoreError;

// ============================================================================
// Status taxonomies
// ============================================================================

/// Backend that carries an installation to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentAppType {
    /// Chart tree committed to a GitOps repository and reconciled by the sync engine.
    GitOps,
    /// Chart installed directly through the helm execution service.
    Helm,
    /// Manifest generated for download only; nothing is deployed.
    ManifestDownload,
    /// Virtual environment: the chart is rendered, never applied to a cluster.
    Virtual,
}

/// Which side effects a deployment backend performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstalledAppDeploymentAction {
    /// Commit the chart tree to the GitOps repository.
    pub perform_git_ops: bool,
    /// Create and sync an app object on the deployment engine.
    pub perform_acd_deployment: bool,
    /// Call the helm execution service.
    pub perform_helm_deployment: bool,
}

impl DeploymentAppType {
    /// Stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitOps => "argo_cd",
            Self::Helm => "helm",
            Self::ManifestDownload => "manifest_download",
            Self::Virtual => "virtual",
        }
    }

    /// Side effects performed for this backend.
    pub fn deployment_action(&self) -> InstalledAppDeploymentAction {
        match self {
            Self::GitOps => InstalledAppDeploymentAction {
                perform_git_ops: true,
                perform_acd_deployment: true,
                perform_helm_deployment: false,
            },
            Self::Helm | Self::Virtual => InstalledAppDeploymentAction {
                perform_git_ops: false,
                perform_acd_deployment: false,
                perform_helm_deployment: true,
            },
            Self::ManifestDownload => InstalledAppDeploymentAction {
                perform_git_ops: false,
                perform_acd_deployment: false,
                perform_helm_deployment: false,
            },
        }
    }

    /// Whether this installation is tracked by the GitOps engine.
    pub fn is_gitops(&self) -> bool {
        matches!(self, Self::GitOps)
    }

    /// Whether timelines are recorded for deployments of this type.
    pub fn records_timelines(&self) -> bool {
        matches!(self, Self::GitOps | Self::ManifestDownload)
    }
}

impl fmt::Display for DeploymentAppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentAppType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "argo_cd" | "gitops" => Ok(Self::GitOps),
            "helm" => Ok(Self::Helm),
            "manifest_download" => Ok(Self::ManifestDownload),
            "virtual" => Ok(Self::Virtual),
            other => Err(StoreError::InvalidColumnValue {
                column: "deployment_app_type",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for DeploymentAppType {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Aggregate status of an installation, stored as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppstoreDeploymentStatus {
    /// Unknown workflow state.
    WfUnknown,
    /// Request accepted.
    RequestAccepted,
    /// Enqueued on the bulk-deploy topic.
    Enqueued,
    /// Publishing to the bulk-deploy topic failed.
    QueError,
    /// Consuming from the bulk-deploy topic failed.
    DequeError,
    /// Trigger failed.
    TriggerError,
    /// Initial rows recorded.
    DeployInit,
    /// GitOps commit succeeded.
    GitSuccess,
    /// GitOps commit failed.
    GitError,
    /// Engine app object created.
    AcdSuccess,
    /// Engine call failed.
    AcdError,
    /// Helm release installed.
    HelmSuccess,
    /// Helm call failed.
    HelmError,
    /// Deployment finished.
    DeploySuccess,
}

impl AppstoreDeploymentStatus {
    const ALL: [Self; 14] = [
        Self::WfUnknown,
        Self::RequestAccepted,
        Self::Enqueued,
        Self::QueError,
        Self::DequeError,
        Self::TriggerError,
        Self::DeployInit,
        Self::GitSuccess,
        Self::GitError,
        Self::AcdSuccess,
        Self::AcdError,
        Self::HelmSuccess,
        Self::HelmError,
        Self::DeploySuccess,
    ];

    /// Stored ordinal.
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Decode a stored ordinal.
    pub fn from_i32(value: i32) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    /// Upper-case name used in logs and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WfUnknown => "WF_UNKNOWN",
            Self::RequestAccepted => "REQUEST_ACCEPTED",
            Self::Enqueued => "ENQUEUED",
            Self::QueError => "QUE_ERROR",
            Self::DequeError => "DEQUE_ERROR",
            Self::TriggerError => "TRIGGER_ERROR",
            Self::DeployInit => "DEPLOY_INIT",
            Self::GitSuccess => "GIT_SUCCESS",
            Self::GitError => "GIT_ERROR",
            Self::AcdSuccess => "ACD_SUCCESS",
            Self::AcdError => "ACD_ERROR",
            Self::HelmSuccess => "HELM_SUCCESS",
            Self::HelmError => "HELM_ERROR",
            Self::DeploySuccess => "DEPLOY_SUCCESS",
        }
    }
}

impl fmt::Display for AppstoreDeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i32> for AppstoreDeploymentStatus {
    type Error = StoreError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_i32(value).ok_or_else(|| StoreError::InvalidColumnValue {
            column: "status",
            value: value.to_string(),
        })
    }
}

/// Status of a single deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryStatus {
    /// Attempt is running.
    InProgress,
    /// Attempt finished successfully.
    Succeeded,
    /// Attempt failed (or was superseded by a newer attempt).
    Failed,
    /// Attempt was aborted.
    Aborted,
    /// Attempt was superseded.
    Superseded,
    /// Deployed resources reported healthy.
    Healthy,
}

impl HistoryStatus {
    /// Stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Aborted => "Aborted",
            Self::Superseded => "Superseded",
            Self::Healthy => "Healthy",
        }
    }

    /// Terminal attempts are never superseded.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Healthy | Self::Succeeded | Self::Aborted | Self::Failed
        )
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InProgress" => Ok(Self::InProgress),
            "Succeeded" => Ok(Self::Succeeded),
            "Failed" => Ok(Self::Failed),
            "Aborted" => Ok(Self::Aborted),
            "Superseded" => Ok(Self::Superseded),
            "Healthy" => Ok(Self::Healthy),
            other => Err(StoreError::InvalidColumnValue {
                column: "installed_app_version_history.status",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for HistoryStatus {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Protocol phase recorded on a deployment timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineStatus {
    /// Deployment accepted and initial rows recorded.
    DeploymentInitiated,
    /// Manifest rendered for download.
    ManifestGenerated,
    /// Chart committed to the GitOps repository.
    GitCommit,
    /// Commit to the GitOps repository failed.
    GitCommitFailed,
    /// Manual sync requested on the engine.
    ArgocdSyncInitiated,
    /// Manual sync finished on the engine.
    ArgocdSyncCompleted,
    /// Deployment finished successfully.
    DeploymentSucceeded,
    /// Deployment failed.
    DeploymentFailed,
    /// Deployment was aborted.
    DeploymentAborted,
    /// Deployed resources reported healthy.
    Healthy,
    /// A newer attempt replaced this one.
    DeploymentSuperseded,
}

/// Detail recorded with [`TimelineStatus::DeploymentSuperseded`].
pub const DEPLOYMENT_SUPERSEDED_DETAIL: &str = "This deployment is superseded.";

impl TimelineStatus {
    /// Stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeploymentInitiated => "DEPLOYMENT_INITIATED",
            Self::ManifestGenerated => "MANIFEST_GENERATED",
            Self::GitCommit => "GIT_COMMIT",
            Self::GitCommitFailed => "GIT_COMMIT_FAILED",
            Self::ArgocdSyncInitiated => "ARGOCD_SYNC_INITIATED",
            Self::ArgocdSyncCompleted => "ARGOCD_SYNC_COMPLETED",
            Self::DeploymentSucceeded => "DEPLOYMENT_SUCCEEDED",
            Self::DeploymentFailed => "DEPLOYMENT_FAILED",
            Self::DeploymentAborted => "DEPLOYMENT_ABORTED",
            Self::Healthy => "HEALTHY",
            Self::DeploymentSuperseded => "DEPLOYMENT_SUPERSEDED",
        }
    }

    /// A terminal status closes the timeline of its history row.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DeploymentSucceeded
                | Self::DeploymentFailed
                | Self::DeploymentAborted
                | Self::Healthy
                | Self::DeploymentSuperseded
        )
    }
}

impl fmt::Display for TimelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimelineStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "DEPLOYMENT_INITIATED" => Self::DeploymentInitiated,
            "MANIFEST_GENERATED" => Self::ManifestGenerated,
            "GIT_COMMIT" => Self::GitCommit,
            "GIT_COMMIT_FAILED" => Self::GitCommitFailed,
            "ARGOCD_SYNC_INITIATED" => Self::ArgocdSyncInitiated,
            "ARGOCD_SYNC_COMPLETED" => Self::ArgocdSyncCompleted,
            "DEPLOYMENT_SUCCEEDED" => Self::DeploymentSucceeded,
            "DEPLOYMENT_FAILED" => Self::DeploymentFailed,
            "DEPLOYMENT_ABORTED" => Self::DeploymentAborted,
            "HEALTHY" => Self::Healthy,
            "DEPLOYMENT_SUPERSEDED" => Self::DeploymentSuperseded,
            other => {
                return Err(StoreError::InvalidColumnValue {
                    column: "pipeline_status_timeline.status",
                    value: other.to_string(),
                });
            }
        };
        Ok(status)
    }
}

impl TryFrom<String> for TimelineStatus {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Where the values of an installed version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceValueKind {
    /// Chart default values.
    #[default]
    Default,
    /// A saved values template.
    Template,
    /// Values of an existing deployment.
    Deployed,
    /// Values of the installation being updated.
    Existing,
}

impl ReferenceValueKind {
    /// Stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Template => "TEMPLATE",
            Self::Deployed => "DEPLOYED",
            Self::Existing => "EXISTING",
        }
    }
}

impl FromStr for ReferenceValueKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEFAULT" | "" => Ok(Self::Default),
            "TEMPLATE" => Ok(Self::Template),
            "DEPLOYED" => Ok(Self::Deployed),
            "EXISTING" => Ok(Self::Existing),
            _ => Err(StoreError::InvalidColumnValue {
                column: "reference_value_kind",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ReferenceValueKind {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// Records
// ============================================================================

/// Audit columns carried by every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    /// User that created the row.
    pub created_by: i32,
    /// Creation time (UTC).
    pub created_on: DateTime<Utc>,
    /// User that last updated the row.
    pub updated_by: i32,
    /// Last update time (UTC).
    pub updated_on: DateTime<Utc>,
}

impl AuditLog {
    /// Audit columns for a row created now by `user_id`.
    pub fn new(user_id: i32) -> Self {
        let now = Utc::now();
        Self {
            created_by: user_id,
            created_on: now,
            updated_by: user_id,
            updated_on: now,
        }
    }
}

/// Application row backing an installation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppRecord {
    /// Primary key.
    pub id: i64,
    /// Unique application name.
    pub app_name: String,
    /// Name shown in the dashboard, when it differs from `app_name`.
    pub display_name: Option<String>,
    /// Owning team/project.
    pub team_id: i64,
    /// Soft-delete flag.
    pub active: bool,
    /// Audit columns.
    #[sqlx(flatten)]
    pub audit: AuditLog,
}

/// A chart installed into one environment.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstalledAppRecord {
    /// Primary key.
    pub id: i64,
    /// Owning application.
    pub app_id: i64,
    /// Target environment.
    pub environment_id: i64,
    /// Soft-delete flag.
    pub active: bool,
    /// Legacy repository name, kept for installations created before URLs were stored.
    pub git_ops_repo_name: Option<String>,
    /// GitOps repository URL.
    pub git_ops_repo_url: Option<String>,
    /// Whether the repository URL was supplied by the user.
    pub is_custom_repository: bool,
    /// Deployment backend.
    #[sqlx(try_from = "String")]
    pub deployment_app_type: DeploymentAppType,
    /// Aggregate deployment status.
    #[sqlx(try_from = "i32")]
    pub status: AppstoreDeploymentStatus,
    /// Engine app removed, DB purge pending.
    pub deployment_app_delete_request: bool,
    /// Release notes.
    pub notes: Option<String>,
    /// Audit columns.
    #[sqlx(flatten)]
    pub audit: AuditLog,
}

impl InstalledAppRecord {
    /// Repository URL, treating an empty string as absent.
    pub fn repo_url(&self) -> Option<&str> {
        self.git_ops_repo_url.as_deref().filter(|url| !url.is_empty())
    }
}

/// Chart version and values bound to an installation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstalledAppVersionRecord {
    /// Primary key.
    pub id: i64,
    /// Owning installation.
    pub installed_app_id: i64,
    /// Catalog chart version.
    pub app_store_application_version_id: i64,
    /// User values as submitted.
    pub values_yaml_raw: String,
    /// Whether this is the current version of the installation.
    pub active: bool,
    /// Reference values the user started from.
    pub reference_value_id: Option<i64>,
    /// Kind of the reference values.
    #[sqlx(try_from = "String")]
    pub reference_value_kind: ReferenceValueKind,
    /// Audit columns.
    #[sqlx(flatten)]
    pub audit: AuditLog,
}

/// Release status details embedded in a history row as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseStatusConfig {
    /// Human readable outcome.
    pub message: String,
    /// Whether the helm release exists.
    pub is_release_installed: bool,
    /// Whether installing the release failed.
    pub error_in_installation: bool,
}

impl HelmReleaseStatusConfig {
    /// Config written when an installation is first recorded.
    pub fn install_initiated() -> Self {
        Self {
            message: "Install initiated".to_string(),
            is_release_installed: false,
            error_in_installation: false,
        }
    }

    /// Config written when the release was installed.
    pub fn release_installed() -> Self {
        Self {
            message: "Release Installed".to_string(),
            is_release_installed: true,
            error_in_installation: false,
        }
    }

    /// Config written when installing the release failed.
    pub fn installation_failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_release_installed: false,
            error_in_installation: true,
        }
    }
}

/// One deployment attempt of an installed version.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstalledAppVersionHistoryRecord {
    /// Primary key.
    pub id: i64,
    /// Version this attempt deploys.
    pub installed_app_version_id: i64,
    /// Values exactly as deployed.
    pub values_yaml_raw: String,
    /// GitOps commit hash.
    pub git_hash: Option<String>,
    /// Attempt status.
    #[sqlx(try_from = "String")]
    pub status: HistoryStatus,
    /// When the attempt started.
    pub started_on: DateTime<Utc>,
    /// When the attempt reached a terminal status.
    pub finished_on: Option<DateTime<Utc>>,
    /// Embedded [`HelmReleaseStatusConfig`] JSON.
    pub helm_release_status_config: Option<String>,
    /// Deployment message shown in history.
    pub message: Option<String>,
    /// Audit columns.
    #[sqlx(flatten)]
    pub audit: AuditLog,
}

impl InstalledAppVersionHistoryRecord {
    /// Decode the embedded helm release status, if present and well formed.
    pub fn helm_config(&self) -> Option<HelmReleaseStatusConfig> {
        self.helm_release_status_config
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Marker that an installation is a default component of a cluster.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClusterInstalledAppRecord {
    /// Primary key.
    pub id: i64,
    /// Cluster the component belongs to.
    pub cluster_id: i64,
    /// Installation.
    pub installed_app_id: i64,
    /// Audit columns.
    #[sqlx(flatten)]
    pub audit: AuditLog,
}

/// Link between a chart group batch and one of its installations.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChartGroupDeploymentRecord {
    /// Primary key.
    pub id: i64,
    /// Chart group.
    pub chart_group_id: i64,
    /// Entry of the chart group this installation came from.
    pub chart_group_entry_id: Option<i64>,
    /// Installation.
    pub installed_app_id: i64,
    /// Identifier shared by all installations of one batch.
    pub group_installation_id: String,
    /// Soft-delete flag.
    pub deleted: bool,
    /// Audit columns.
    #[sqlx(flatten)]
    pub audit: AuditLog,
}

/// One timeline entry of a deployment attempt.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TimelineRecord {
    /// Primary key.
    pub id: i64,
    /// Deployment attempt.
    pub installed_app_version_history_id: i64,
    /// Protocol phase.
    #[sqlx(try_from = "String")]
    pub status: TimelineStatus,
    /// Detail message.
    pub status_detail: String,
    /// When the phase was reached.
    pub status_time: DateTime<Utc>,
    /// Audit columns.
    #[sqlx(flatten)]
    pub audit: AuditLog,
}

// ============================================================================
// Write requests
// ============================================================================

/// Timeline entry to append together with other writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    /// Protocol phase.
    pub status: TimelineStatus,
    /// Detail message.
    pub detail: String,
}

impl TimelineEntry {
    /// Create an entry.
    pub fn new(status: TimelineStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

/// Timeline row to append for an existing history row.
#[derive(Debug, Clone)]
pub struct NewTimeline {
    /// Deployment attempt.
    pub history_id: i64,
    /// Protocol phase.
    pub status: TimelineStatus,
    /// Detail message.
    pub detail: String,
    /// When the phase was reached.
    pub status_time: DateTime<Utc>,
    /// Acting user.
    pub user_id: i32,
}

impl NewTimeline {
    /// Timeline reached now.
    pub fn now(history_id: i64, entry: TimelineEntry, user_id: i32) -> Self {
        Self {
            history_id,
            status: entry.status,
            detail: entry.detail,
            status_time: Utc::now(),
            user_id,
        }
    }
}

/// Application row to create.
#[derive(Debug, Clone)]
pub struct NewApp {
    /// Unique application name.
    pub app_name: String,
    /// Display name, if different.
    pub display_name: Option<String>,
    /// Owning team/project.
    pub team_id: i64,
    /// Acting user.
    pub user_id: i32,
}

/// Chart group the installation is recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartGroupLink {
    /// Chart group.
    pub chart_group_id: i64,
    /// Entry inside the chart group.
    pub chart_group_entry_id: Option<i64>,
}

/// Everything recorded when an installation is accepted.
#[derive(Debug, Clone)]
pub struct InstallationDraft {
    /// Existing application, or `None` to resolve by name.
    pub app_id: Option<i64>,
    /// Application name.
    pub app_name: String,
    /// Owning team/project when the app is created.
    pub team_id: i64,
    /// Reuse an existing app with the same name instead of failing.
    pub skip_app_creation: bool,
    /// Target environment.
    pub environment_id: i64,
    /// Resolved deployment backend.
    pub deployment_app_type: DeploymentAppType,
    /// GitOps repository name.
    pub git_ops_repo_name: Option<String>,
    /// GitOps repository URL, when known up-front (custom repositories).
    pub git_ops_repo_url: Option<String>,
    /// Whether the URL was supplied by the user.
    pub is_custom_repository: bool,
    /// Catalog chart version.
    pub app_store_application_version_id: i64,
    /// User values.
    pub values_yaml: String,
    /// Reference values id.
    pub reference_value_id: Option<i64>,
    /// Reference values kind.
    pub reference_value_kind: ReferenceValueKind,
    /// Cluster for which this is a default component.
    pub default_cluster_component: Option<i64>,
    /// Chart group batch link.
    pub chart_group: Option<ChartGroupLink>,
    /// Timelines written in the same transaction as the rows.
    pub initial_timelines: Vec<TimelineEntry>,
    /// Acting user.
    pub user_id: i32,
}

/// Rows created for one accepted installation.
#[derive(Debug, Clone)]
pub struct CreatedInstallation {
    /// Application.
    pub app: AppRecord,
    /// Installation.
    pub installed_app: InstalledAppRecord,
    /// Active version.
    pub version: InstalledAppVersionRecord,
    /// First deployment attempt.
    pub history: InstalledAppVersionHistoryRecord,
    /// Chart group link, when recorded under a chart group.
    pub chart_group_deployment: Option<ChartGroupDeploymentRecord>,
}

/// How an upgrade changes the version binding of an installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionChange {
    /// A different chart: every active version is retired and a new one is created.
    ChartChanged,
    /// Same chart, different chart version: the matched row is retired.
    VersionBumped {
        /// Version row being replaced.
        installed_app_version_id: i64,
    },
    /// Only values changed: the matched row is updated in place.
    ValuesOnly {
        /// Version row being updated.
        installed_app_version_id: i64,
    },
}

/// Upgrade request as recorded by the store.
#[derive(Debug, Clone)]
pub struct UpgradeDraft {
    /// Installation.
    pub installed_app_id: i64,
    /// Version binding change.
    pub change: VersionChange,
    /// Catalog chart version to bind.
    pub app_store_application_version_id: i64,
    /// New user values.
    pub values_yaml: String,
    /// Reference values id.
    pub reference_value_id: Option<i64>,
    /// Reference values kind.
    pub reference_value_kind: ReferenceValueKind,
    /// Timelines written with the new history row.
    pub initial_timelines: Vec<TimelineEntry>,
    /// Acting user.
    pub user_id: i32,
}

/// Rows produced by an upgrade.
#[derive(Debug, Clone)]
pub struct PreparedUpgrade {
    /// Active version after the upgrade.
    pub version: InstalledAppVersionRecord,
    /// New deployment attempt.
    pub history: InstalledAppVersionHistoryRecord,
}

/// Rollback request as recorded by the store.
#[derive(Debug, Clone)]
pub struct RollbackDraft {
    /// Installation.
    pub installed_app_id: i64,
    /// Version owning the history row rolled back to.
    pub target_version_id: i64,
    /// Values of the history row rolled back to.
    pub values_yaml: String,
    /// Timelines written with the new history row.
    pub initial_timelines: Vec<TimelineEntry>,
    /// Acting user.
    pub user_id: i32,
}

/// Rows produced by a rollback.
#[derive(Debug, Clone)]
pub struct PreparedRollback {
    /// Version that was active before the rollback.
    pub previous_version: InstalledAppVersionRecord,
    /// Active version after the rollback.
    pub version: InstalledAppVersionRecord,
    /// New deployment attempt.
    pub history: InstalledAppVersionHistoryRecord,
}

impl PreparedRollback {
    /// Whether the rollback re-activated a different version.
    pub fn version_changed(&self) -> bool {
        self.previous_version.id != self.version.id
    }
}

/// Version bindings put back after an attempt failed before reaching the
/// deployment target.
#[derive(Debug, Clone)]
pub struct VersionRestore {
    /// Installation.
    pub installed_app_id: i64,
    /// Version rows as they were before the attempt. Applied in order after
    /// every active version of the installation is retired.
    pub versions: Vec<InstalledAppVersionRecord>,
    /// Acting user.
    pub user_id: i32,
}

/// Status transition of a history row.
#[derive(Debug, Clone)]
pub struct HistoryTransition {
    /// History row.
    pub history_id: i64,
    /// New status.
    pub status: HistoryStatus,
    /// Replacement helm release status.
    pub helm_config: Option<HelmReleaseStatusConfig>,
    /// Replacement deployment message.
    pub message: Option<String>,
    /// Timeline appended in the same transaction.
    pub timeline: Option<TimelineEntry>,
    /// Acting user.
    pub user_id: i32,
}

impl HistoryTransition {
    /// Transition to `status` with nothing else attached.
    pub fn to(history_id: i64, status: HistoryStatus, user_id: i32) -> Self {
        Self {
            history_id,
            status,
            helm_config: None,
            message: None,
            timeline: None,
            user_id,
        }
    }

    /// Attach a timeline entry.
    pub fn with_timeline(mut self, entry: TimelineEntry) -> Self {
        self.timeline = Some(entry);
        self
    }

    /// Attach a helm release status.
    pub fn with_helm_config(mut self, config: HelmReleaseStatusConfig) -> Self {
        self.helm_config = Some(config);
        self
    }

    /// Attach a deployment message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// History row joined with the chart version it deployed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstallationHistoryRow {
    /// Deployment attempt.
    #[sqlx(flatten)]
    pub history: InstalledAppVersionHistoryRecord,
    /// Catalog chart version of the owning version row.
    pub app_store_application_version_id: i64,
}

/// Identifier shared by all installations of one chart group batch.
///
/// The identifier is the hex SHA-1 of the concatenated application ids; every
/// id must be known (non-zero) for it to be computed.
pub fn group_installation_id(app_ids: &[i64]) -> Result<String, StoreError> {
    let mut hasher = Sha1::new();
    for app_id in app_ids {
        if *app_id == 0 {
            return Err(StoreError::ValidationError {
                field: "app_id".to_string(),
                message: "app ID not present".to_string(),
            });
        }
        hasher.update(app_id.to_string().as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}
