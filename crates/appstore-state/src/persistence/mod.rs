// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for appstore-state.
//!
//! [`Persistence`] is the single seam between the deployment layer and the
//! relational store. Every method that writes more than one row runs inside one
//! database transaction, so a failed call leaves no partial group behind.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::models::{
    AppRecord, AppstoreDeploymentStatus, ChartGroupDeploymentRecord, ClusterInstalledAppRecord,
    CreatedInstallation, HistoryTransition, InstallationDraft, InstallationHistoryRow,
    InstalledAppRecord, InstalledAppVersionHistoryRecord, InstalledAppVersionRecord, NewApp,
    NewTimeline, PreparedRollback, PreparedUpgrade, RollbackDraft, TimelineRecord, UpgradeDraft,
    VersionRestore,
};

/// Persistence interface used by the deployment orchestrator.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // ------------------------------------------------------------------
    // Applications
    // ------------------------------------------------------------------

    /// Load an app regardless of its active flag.
    async fn get_app(&self, app_id: i64) -> Result<Option<AppRecord>>;

    /// Active app with the given name.
    async fn find_active_app_by_name(&self, app_name: &str) -> Result<Option<AppRecord>>;

    /// Create an application row. Fails with [`StoreError::AppAlreadyExists`]
    /// when an active app with the same name exists.
    async fn create_app(&self, app: &NewApp) -> Result<AppRecord>;

    /// Move an app to another team.
    async fn update_app_team(&self, app_id: i64, team_id: i64, user_id: i32) -> Result<()>;

    // ------------------------------------------------------------------
    // Installations
    // ------------------------------------------------------------------

    /// Record a batch of accepted installations in one transaction.
    ///
    /// For each draft: the app is resolved or created, then the installed app
    /// (status `DEPLOY_INIT`), its active version, the first history row
    /// (`InProgress`), the cluster component marker and the initial timelines
    /// are inserted. Drafts linked to a chart group additionally get a
    /// chart group deployment row sharing one group installation id.
    async fn create_installations(
        &self,
        drafts: &[InstallationDraft],
    ) -> Result<Vec<CreatedInstallation>>;

    /// Record a single accepted installation.
    async fn create_installation(&self, draft: &InstallationDraft) -> Result<CreatedInstallation> {
        self.create_installations(std::slice::from_ref(draft))
            .await?
            .pop()
            .ok_or_else(|| StoreError::DatabaseError {
                operation: "create_installation".to_string(),
                details: "no installation recorded".to_string(),
            })
    }

    /// Load an installed app regardless of its active flag.
    async fn get_installed_app(&self, installed_app_id: i64) -> Result<Option<InstalledAppRecord>>;

    /// Active installation of an app in an environment.
    async fn find_active_installed_app(
        &self,
        app_id: i64,
        environment_id: i64,
    ) -> Result<Option<InstalledAppRecord>>;

    /// Active GitOps installations whose engine app was removed but whose rows
    /// were not purged yet, oldest first.
    async fn list_installed_apps_pending_delete(&self, limit: i64)
    -> Result<Vec<InstalledAppRecord>>;

    /// Active GitOps installation marked for deletion.
    async fn find_gitops_installed_app_pending_delete(
        &self,
        installed_app_id: i64,
        environment_id: i64,
    ) -> Result<Option<InstalledAppRecord>>;

    /// Set the aggregate status of an installation.
    async fn update_installed_app_status(
        &self,
        installed_app_id: i64,
        status: AppstoreDeploymentStatus,
        user_id: i32,
    ) -> Result<()>;

    /// Update the status only when the current status is one of `allowed_from`.
    /// Returns whether the row changed.
    async fn update_installed_app_status_if(
        &self,
        installed_app_id: i64,
        status: AppstoreDeploymentStatus,
        allowed_from: &[AppstoreDeploymentStatus],
        user_id: i32,
    ) -> Result<bool>;

    /// Record the GitOps repository of an installation.
    async fn update_gitops_repository(
        &self,
        installed_app_id: i64,
        repo_name: Option<&str>,
        repo_url: Option<&str>,
        is_custom_repository: bool,
        user_id: i32,
    ) -> Result<()>;

    /// Mark an installation whose engine app was removed.
    async fn mark_deployment_app_delete_request(
        &self,
        installed_app_id: i64,
        user_id: i32,
    ) -> Result<()>;

    /// Soft delete an installation: the installed app, every version, the app
    /// (when no other active installation uses it) and chart group links are
    /// deactivated and the app status row is removed, in one transaction.
    /// Returns `false` when the installation was already inactive.
    async fn deactivate_installation(&self, installed_app_id: i64, user_id: i32) -> Result<bool>;

    // ------------------------------------------------------------------
    // Versions
    // ------------------------------------------------------------------

    /// Load a version regardless of its active flag.
    async fn get_installed_app_version(
        &self,
        installed_app_version_id: i64,
    ) -> Result<Option<InstalledAppVersionRecord>>;

    /// Active version of an installation.
    async fn get_active_installed_app_version(
        &self,
        installed_app_id: i64,
    ) -> Result<Option<InstalledAppVersionRecord>>;

    /// Every version of an installation, newest first.
    async fn list_installed_app_versions(
        &self,
        installed_app_id: i64,
    ) -> Result<Vec<InstalledAppVersionRecord>>;

    /// Apply an upgrade's version change and open a new history row.
    async fn prepare_upgrade(&self, draft: &UpgradeDraft) -> Result<PreparedUpgrade>;

    /// Re-activate the target version (if needed) and open a new history row on it.
    async fn prepare_rollback(&self, draft: &RollbackDraft) -> Result<PreparedRollback>;

    /// Put back the version rows of a failed upgrade or rollback, in one
    /// transaction. History rows are left as they are.
    async fn restore_versions(&self, restore: &VersionRestore) -> Result<()>;

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Load a history row.
    async fn get_history(&self, history_id: i64)
    -> Result<Option<InstalledAppVersionHistoryRecord>>;

    /// History of one version, newest first.
    async fn list_history_for_version(
        &self,
        installed_app_version_id: i64,
    ) -> Result<Vec<InstalledAppVersionHistoryRecord>>;

    /// History of every version of an installation, newest first.
    async fn list_history_for_installed_app(
        &self,
        installed_app_id: i64,
    ) -> Result<Vec<InstallationHistoryRow>>;

    /// Newest history row of a version.
    async fn latest_history_for_version(
        &self,
        installed_app_version_id: i64,
    ) -> Result<Option<InstalledAppVersionHistoryRecord>>;

    /// Store the commit hash of a deployment attempt.
    async fn update_history_git_hash(
        &self,
        history_id: i64,
        git_hash: &str,
        user_id: i32,
    ) -> Result<()>;

    /// Move a history row to a new status, together with its optional timeline.
    async fn transition_history(&self, transition: &HistoryTransition) -> Result<()>;

    /// Fail every older non-terminal history row of the version and append a
    /// superseded timeline to each, in one transaction. Returns the number of
    /// rows superseded.
    async fn supersede_previous_histories(
        &self,
        installed_app_version_id: i64,
        keep_history_id: i64,
        user_id: i32,
    ) -> Result<u64>;

    // ------------------------------------------------------------------
    // Timelines
    // ------------------------------------------------------------------

    /// Append a timeline row. Returns `false` when the row was dropped, either
    /// because the status was already recorded or the timeline is closed.
    async fn save_timeline(&self, timeline: &NewTimeline) -> Result<bool>;

    /// Append several timeline rows in one transaction; returns how many were stored.
    async fn save_timelines(&self, timelines: &[NewTimeline]) -> Result<usize>;

    /// Timeline of a history row in the order the phases were reached.
    async fn list_timelines(&self, history_id: i64) -> Result<Vec<TimelineRecord>>;

    // ------------------------------------------------------------------
    // Auxiliary rows
    // ------------------------------------------------------------------

    /// Create or replace the app status row of an app in an environment.
    async fn upsert_app_status(&self, app_id: i64, env_id: i64, status: &str) -> Result<()>;

    /// App status of an app in an environment.
    async fn get_app_status(&self, app_id: i64, env_id: i64) -> Result<Option<String>>;

    /// Chart group links of an installation.
    async fn list_chart_group_deployments(
        &self,
        installed_app_id: i64,
    ) -> Result<Vec<ChartGroupDeploymentRecord>>;

    /// Default component markers of a cluster.
    async fn list_cluster_installed_apps(
        &self,
        cluster_id: i64,
    ) -> Result<Vec<ClusterInstalledAppRecord>>;
}
