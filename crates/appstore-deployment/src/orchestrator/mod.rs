// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment orchestrator.
//!
//! Every top-level operation records its rows first and only then calls the
//! backend, so a failed run always leaves a recoverable record behind:
//!
//! ```text
//! validate ──> record rows (one tx) ──> backend (deadline) ──┬──> history Succeeded, DEPLOY_SUCCESS
//!                                                            └──> history Failed + failure timeline,
//!                                                                 GIT_ERROR / ACD_ERROR / HELM_ERROR
//! ```
//!
//! The operations live in submodules: [`install`], [`upgrade`], [`rollback`],
//! [`delete`], [`reconcile`], [`history`] and [`helm_apps`].

pub mod delete;
pub mod dto;
pub mod helm_apps;
pub mod history;
pub mod install;
pub mod reconcile;
pub mod rollback;
pub mod upgrade;

pub use dto::*;
pub use helm_apps::{LinkHelmAppRequest, UpdateProjectHelmAppRequest};
pub use history::{
    DeploymentHistory, DeploymentHistoryResponse, HelmAppDeploymentManifestDetail,
    InstalledAppInfo, TimelineView, TimelinesResponse,
};

use std::future::Future;
use std::sync::Arc;

use appstore_state::{
    AppRecord, AppstoreDeploymentStatus, DeploymentAppType, HelmReleaseStatusConfig,
    HistoryStatus, HistoryTransition, InstalledAppRecord, Persistence, TimelineEntry,
    TimelineStatus, VersionRestore,
};
use tracing::{debug, error, info, warn};

use crate::backend::{Backends, DeploymentBackend, GitOpsBackend, RollbackPlan, UpgradePlan};
use crate::catalog::{ChartCatalog, ChartVersion, EnvironmentInfo, EnvironmentReader};
use crate::config::DeploymentSettings;
use crate::error::{Error, Result};
use crate::helm::HelmClient;
use crate::timeline::{
    DEPLOYMENT_SUCCEEDED_DETAIL, TimelineService, deployment_failed_message,
    git_commit_failed_detail,
};

/// User recorded on writes made by background reconciliation.
pub const SYSTEM_USER_ID: i32 = 1;

/// Backend call made by one orchestrator run.
#[derive(Debug, Clone, Copy)]
enum Operation {
    Install,
    Upgrade(UpgradePlan),
    Rollback(RollbackPlan),
    /// Continue a bulk installation from its stored status.
    Resume,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade(_) => "upgrade",
            Self::Rollback(_) => "rollback",
            Self::Resume => "deploy",
        }
    }
}

/// Installation statuses from which the bulk pipeline still has to run the git phase.
const GIT_PHASE_PENDING: [AppstoreDeploymentStatus; 7] = [
    AppstoreDeploymentStatus::WfUnknown,
    AppstoreDeploymentStatus::RequestAccepted,
    AppstoreDeploymentStatus::Enqueued,
    AppstoreDeploymentStatus::QueError,
    AppstoreDeploymentStatus::DequeError,
    AppstoreDeploymentStatus::DeployInit,
    AppstoreDeploymentStatus::GitError,
];

/// Installs, upgrades, rolls back and deletes chart store installations.
pub struct AppStoreOrchestrator {
    store: Arc<dyn Persistence>,
    catalog: Arc<dyn ChartCatalog>,
    environments: Arc<dyn EnvironmentReader>,
    helm: Arc<dyn HelmClient>,
    backends: Backends,
    settings: DeploymentSettings,
    timelines: TimelineService,
}

impl AppStoreOrchestrator {
    /// Create an orchestrator with the helm based backends.
    pub fn new(
        store: Arc<dyn Persistence>,
        catalog: Arc<dyn ChartCatalog>,
        environments: Arc<dyn EnvironmentReader>,
        helm: Arc<dyn HelmClient>,
        settings: DeploymentSettings,
    ) -> Self {
        Self {
            timelines: TimelineService::new(store.clone()),
            backends: Backends::new(helm.clone()),
            store,
            catalog,
            environments,
            helm,
            settings,
        }
    }

    /// Enable GitOps installations.
    pub fn with_gitops(mut self, gitops: GitOpsBackend) -> Self {
        self.backends = self.backends.with_gitops(gitops);
        self
    }

    /// Release state store.
    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    /// Chart catalog.
    pub fn catalog(&self) -> &Arc<dyn ChartCatalog> {
        &self.catalog
    }

    /// Policy switches.
    pub fn settings(&self) -> &DeploymentSettings {
        &self.settings
    }

    /// Timeline writer.
    pub fn timelines(&self) -> &TimelineService {
        &self.timelines
    }

    pub(crate) async fn load_chart(&self, chart_version_id: i64) -> Result<ChartVersion> {
        self.catalog
            .chart_version(chart_version_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("chart version {} not found", chart_version_id))
            })
    }

    pub(crate) async fn load_environment(&self, environment_id: i64) -> Result<EnvironmentInfo> {
        self.environments
            .environment(environment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("environment {} not found", environment_id)))
    }

    /// Active installation and its app.
    pub(crate) async fn load_active_installation(
        &self,
        installed_app_id: i64,
    ) -> Result<(InstalledAppRecord, AppRecord)> {
        let installed_app = self
            .store
            .get_installed_app(installed_app_id)
            .await?
            .filter(|i| i.active)
            .ok_or_else(|| {
                Error::NotFound(format!("installed app {} not found", installed_app_id))
            })?;
        let app = self.load_app(installed_app.app_id).await?;
        Ok((installed_app, app))
    }

    pub(crate) async fn load_app(&self, app_id: i64) -> Result<AppRecord> {
        self.store
            .get_app(app_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("app {} not found", app_id)))
    }

    /// Fail older attempts of the version. Failures are logged only.
    pub(crate) async fn supersede_previous(&self, dto: &InstallAppVersionDto) {
        match self
            .store
            .supersede_previous_histories(
                dto.installed_app_version_id,
                dto.installed_app_version_history_id,
                dto.user_id,
            )
            .await
        {
            Ok(0) => {}
            Ok(superseded) => info!(
                installed_app_version_id = dto.installed_app_version_id,
                superseded = superseded,
                "Superseded previous deployments"
            ),
            Err(e) => warn!(
                installed_app_version_id = dto.installed_app_version_id,
                error = %e,
                "Failed to supersede previous deployments"
            ),
        }
    }

    /// Run the backend under the request deadline and close the history row.
    async fn run_backend(
        &self,
        ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        app_type: DeploymentAppType,
        operation: Operation,
    ) -> Result<()> {
        let backend = self.backends.for_type(app_type)?;
        let timeout = self.settings.orchestration_timeout;
        let call = async {
            match operation {
                Operation::Install => backend.install(ctx, dto, chart).await,
                Operation::Upgrade(plan) => backend.upgrade(ctx, dto, chart, &plan).await,
                Operation::Rollback(plan) => backend.rollback(ctx, dto, chart, &plan).await,
                Operation::Resume => self.resume(ctx, dto, chart, backend.as_ref()).await,
            }
        };
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded {
                operation: operation.name(),
                timeout,
            }),
        };

        match result {
            Ok(()) => {
                self.complete(dto, app_type).await?;
                info!(
                    installed_app_id = dto.installed_app_id,
                    history_id = dto.installed_app_version_history_id,
                    operation = operation.name(),
                    deployment_app_type = %app_type,
                    "Deployment finished"
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    installed_app_id = dto.installed_app_id,
                    history_id = dto.installed_app_version_history_id,
                    operation = operation.name(),
                    error = %err,
                    "Deployment failed"
                );
                self.fail(dto, app_type, &err).await;
                Err(err)
            }
        }
    }

    /// Run an upgrade or rollback attempt. When it fails before the new
    /// binding reached the deployment target, the version rows recorded in
    /// `restore` are put back; the failed history row stays.
    async fn run_attempt(
        &self,
        ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        app_type: DeploymentAppType,
        operation: Operation,
        restore: VersionRestore,
    ) -> Result<()> {
        let operation_name = operation.name();
        let result = self.run_backend(ctx, dto, chart, app_type, operation).await;
        if let Err(err) = &result {
            if binding_not_deployed(app_type, dto, err) {
                match self.store.restore_versions(&restore).await {
                    Ok(()) => info!(
                        installed_app_id = dto.installed_app_id,
                        history_id = dto.installed_app_version_history_id,
                        operation = operation_name,
                        "Restored previous version binding"
                    ),
                    Err(e) => warn!(
                        installed_app_id = dto.installed_app_id,
                        error = %e,
                        "Failed to restore previous version binding"
                    ),
                }
            }
        }
        result
    }

    async fn resume(
        &self,
        ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        backend: &dyn DeploymentBackend,
    ) -> Result<()> {
        if backend.app_type() != DeploymentAppType::GitOps {
            return backend.install(ctx, dto, chart).await;
        }
        let gitops = self.backends.gitops().ok_or(Error::GitOpsNotConfigured)?;

        let status = dto.status.unwrap_or(AppstoreDeploymentStatus::DeployInit);
        if GIT_PHASE_PENDING.contains(&status) {
            gitops.git_phase(dto, chart).await?;
        } else {
            debug!(
                installed_app_id = dto.installed_app_id,
                status = %status.as_str(),
                "Git phase already done"
            );
        }
        if matches!(
            dto.status,
            Some(AppstoreDeploymentStatus::GitSuccess) | Some(AppstoreDeploymentStatus::AcdError)
        ) {
            gitops.engine_phase(ctx, dto).await?;
        }
        Ok(())
    }

    /// Close the history row of a successful run and mark the installation deployed.
    async fn complete(&self, dto: &mut InstallAppVersionDto, app_type: DeploymentAppType) -> Result<()> {
        let history_id = dto.installed_app_version_history_id;
        let transition = match app_type {
            DeploymentAppType::Helm if self.settings.helm_install_async_mode => {
                debug!(history_id = history_id, "Waiting for helm release callback");
                None
            }
            DeploymentAppType::Helm | DeploymentAppType::Virtual => Some(
                HistoryTransition::to(history_id, HistoryStatus::Succeeded, dto.user_id)
                    .with_helm_config(HelmReleaseStatusConfig::release_installed())
                    .with_timeline(TimelineEntry::new(
                        TimelineStatus::DeploymentSucceeded,
                        DEPLOYMENT_SUCCEEDED_DETAIL,
                    )),
            ),
            DeploymentAppType::GitOps | DeploymentAppType::ManifestDownload => Some(
                HistoryTransition::to(history_id, HistoryStatus::Succeeded, dto.user_id),
            ),
        };
        if let Some(transition) = transition {
            self.store.transition_history(&transition).await?;
        }

        self.store
            .update_installed_app_status(
                dto.installed_app_id,
                AppstoreDeploymentStatus::DeploySuccess,
                dto.user_id,
            )
            .await?;
        dto.status = Some(AppstoreDeploymentStatus::DeploySuccess);
        Ok(())
    }

    /// Record a failed run. Failures while recording are logged only.
    async fn fail(&self, dto: &mut InstallAppVersionDto, app_type: DeploymentAppType, err: &Error) {
        let history_id = dto.installed_app_version_history_id;
        let message = deployment_failed_message(&err.to_string());
        let mut transition = HistoryTransition::to(history_id, HistoryStatus::Failed, dto.user_id)
            .with_message(message.clone());
        if matches!(app_type, DeploymentAppType::Helm | DeploymentAppType::Virtual) {
            transition = transition
                .with_helm_config(HelmReleaseStatusConfig::installation_failed(err.to_string()));
        }
        // A cancelled run writes no further timelines.
        let timeline = match err {
            Error::DeadlineExceeded { .. } => None,
            Error::Git(git_err) => Some(TimelineEntry::new(
                TimelineStatus::GitCommitFailed,
                git_commit_failed_detail(&git_err.to_string()),
            )),
            _ => Some(TimelineEntry::new(TimelineStatus::DeploymentFailed, message)),
        };
        if let Some(entry) = timeline {
            transition = transition.with_timeline(entry);
        }
        if let Err(e) = self.store.transition_history(&transition).await {
            warn!(history_id = history_id, error = %e, "Failed to mark deployment failed");
        }

        let Some(status) = failure_status(app_type, dto.status) else {
            return;
        };
        match self
            .store
            .update_installed_app_status(dto.installed_app_id, status, dto.user_id)
            .await
        {
            Ok(()) => dto.status = Some(status),
            Err(e) => warn!(
                installed_app_id = dto.installed_app_id,
                status = %status.as_str(),
                error = %e,
                "Failed to update installation status"
            ),
        }
    }

    /// Run `call` under the request deadline.
    pub(crate) async fn with_deadline<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.settings.orchestration_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded { operation, timeout }),
        }
    }

    /// Record an externally reported status of an installation.
    pub async fn app_store_deploy_operation_status_update(
        &self,
        installed_app_id: i64,
        status: AppstoreDeploymentStatus,
        user_id: i32,
    ) -> Result<()> {
        self.store
            .update_installed_app_status(installed_app_id, status, user_id)
            .await?;
        debug!(
            installed_app_id = installed_app_id,
            status = %status.as_str(),
            "Updated installation status"
        );
        Ok(())
    }
}

/// Whether a failed attempt left the deployment target on the previous binding.
///
/// An expired deadline may have cut a write short, so nothing is assumed then.
fn binding_not_deployed(
    app_type: DeploymentAppType,
    dto: &InstallAppVersionDto,
    err: &Error,
) -> bool {
    if matches!(err, Error::DeadlineExceeded { .. }) {
        return false;
    }
    match app_type {
        DeploymentAppType::GitOps => dto.git_hash.is_none(),
        DeploymentAppType::Helm
        | DeploymentAppType::Virtual
        | DeploymentAppType::ManifestDownload => true,
    }
}

/// Installation status recorded when a run of `app_type` fails after reaching `reached`.
fn failure_status(
    app_type: DeploymentAppType,
    reached: Option<AppstoreDeploymentStatus>,
) -> Option<AppstoreDeploymentStatus> {
    match app_type {
        DeploymentAppType::GitOps => match reached {
            Some(AppstoreDeploymentStatus::GitSuccess)
            | Some(AppstoreDeploymentStatus::AcdError)
            | Some(AppstoreDeploymentStatus::AcdSuccess) => Some(AppstoreDeploymentStatus::AcdError),
            _ => Some(AppstoreDeploymentStatus::GitError),
        },
        DeploymentAppType::Helm | DeploymentAppType::Virtual => {
            Some(AppstoreDeploymentStatus::HelmError)
        }
        DeploymentAppType::ManifestDownload => None,
    }
}
