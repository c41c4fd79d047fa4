// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fresh installations.

use appstore_state::{AppstoreDeploymentStatus, DeploymentAppType, InstallationDraft};
use tracing::{debug, info};

use super::{AppStoreOrchestrator, InstallAppRequest, InstallAppVersionDto, Operation, RequestContext};
use crate::catalog::{ChartVersion, EnvironmentInfo};
use crate::chart_group::DeployPayload;
use crate::error::{Error, Result};
use crate::gitops::repo_name_from_url;
use crate::timeline::initial_timelines;
use crate::validation::{
    RepoSelection, resolve_deployment_app_type, resolve_repo_selection, validate_values_yaml,
};

impl AppStoreOrchestrator {
    /// Validate an install request and turn it into the rows to record.
    ///
    /// Nothing is written. Custom repository URLs are checked against the Git
    /// provider here, so a rejected URL never leaves rows behind.
    pub async fn prepare_draft(
        &self,
        request: &InstallAppRequest,
    ) -> Result<(InstallationDraft, ChartVersion, EnvironmentInfo)> {
        let chart = self.load_chart(request.app_store_application_version_id).await?;
        let environment = self.load_environment(request.environment_id).await?;
        validate_values_yaml(&request.values_override_yaml)?;

        let app_type = resolve_deployment_app_type(
            &self.settings,
            request.deployment_app_type,
            &chart,
            &environment,
        )?;

        let mut draft = InstallationDraft {
            app_id: request.app_id,
            app_name: request.app_name.clone(),
            team_id: request.team_id,
            skip_app_creation: request.skip_app_creation,
            environment_id: environment.id,
            deployment_app_type: app_type,
            git_ops_repo_name: None,
            git_ops_repo_url: None,
            is_custom_repository: false,
            app_store_application_version_id: chart.id,
            values_yaml: request.values_override_yaml.clone(),
            reference_value_id: request.reference_value_id,
            reference_value_kind: request.reference_value_kind,
            default_cluster_component: request.default_cluster_component,
            chart_group: None,
            initial_timelines: initial_timelines(app_type),
            user_id: request.user_id,
        };

        if app_type == DeploymentAppType::GitOps {
            let gitops = self.backends.gitops().ok_or(Error::GitOpsNotConfigured)?;
            match resolve_repo_selection(
                &self.settings,
                &request.app_name,
                request.git_ops_repo_url.as_deref(),
            )? {
                RepoSelection::AutoCreate => {
                    draft.git_ops_repo_name = Some(gitops.repos().gitops_repo_name(&request.app_name));
                }
                RepoSelection::Custom(url) => {
                    let (url, _) = gitops.repos().validate_custom_repo_url(&url).await?;
                    draft.git_ops_repo_name = Some(repo_name_from_url(&url));
                    draft.git_ops_repo_url = Some(url);
                    draft.is_custom_repository = true;
                }
            }
        }

        Ok((draft, chart, environment))
    }

    /// Install a chart into an environment.
    ///
    /// The installation rows are recorded first; the backend runs afterwards
    /// under the request deadline. A backend failure leaves the rows in place
    /// with the history row failed.
    pub async fn install_app(
        &self,
        ctx: &RequestContext,
        request: InstallAppRequest,
    ) -> Result<InstallAppVersionDto> {
        let (draft, chart, environment) = self.prepare_draft(&request).await?;
        let app_type = draft.deployment_app_type;

        let created = self.store.create_installation(&draft).await?;
        let mut dto = InstallAppVersionDto::from_created(&created, &environment);
        dto.user_id = request.user_id;
        info!(
            installed_app_id = dto.installed_app_id,
            app_name = %dto.app_name,
            environment = %dto.environment_name,
            deployment_app_type = %app_type,
            "Installation recorded"
        );

        self.supersede_previous(&dto).await;
        self.run_backend(ctx, &mut dto, &chart, app_type, Operation::Install)
            .await?;
        Ok(dto)
    }

    /// Deploy one installation recorded by a bulk request.
    ///
    /// The pipeline resumes from the stored installation status, so a payload
    /// delivered twice does not redo finished phases.
    pub async fn perform_deploy_stage(
        &self,
        ctx: &RequestContext,
        payload: &DeployPayload,
    ) -> Result<InstallAppVersionDto> {
        let version = self
            .store
            .get_installed_app_version(payload.installed_app_version_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "installed app version {} not found",
                    payload.installed_app_version_id
                ))
            })?;
        let (installed_app, app) = self.load_active_installation(version.installed_app_id).await?;
        let environment = self.load_environment(installed_app.environment_id).await?;
        let chart = self.load_chart(version.app_store_application_version_id).await?;

        let mut dto =
            InstallAppVersionDto::from_installation(&installed_app, &version, &app.app_name, &environment);
        dto.team_id = app.team_id;
        dto.installed_app_version_history_id = payload.installed_app_version_history_id;
        dto.user_id = version.audit.updated_by;

        if installed_app.status == AppstoreDeploymentStatus::DeploySuccess {
            debug!(installed_app_id = installed_app.id, "Installation already deployed");
            return Ok(dto);
        }
        self.run_backend(
            ctx,
            &mut dto,
            &chart,
            installed_app.deployment_app_type,
            Operation::Resume,
        )
        .await?;
        Ok(dto)
    }
}
