// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rollback to a previous deployment.

use appstore_state::{DeploymentAppType, RollbackDraft, VersionRestore};
use tracing::info;

use super::{AppStoreOrchestrator, InstallAppVersionDto, Operation, RequestContext, RollbackRequest};
use crate::backend::RollbackPlan;
use crate::error::{Error, Result};
use crate::timeline::attempt_timelines;

impl AppStoreOrchestrator {
    /// Redeploy the values and chart version of an earlier history row.
    ///
    /// The rollback is recorded as a new history row; the target row is left
    /// untouched.
    pub async fn rollback_application(
        &self,
        ctx: &RequestContext,
        request: RollbackRequest,
    ) -> Result<bool> {
        let (installed_app, app) = self.load_active_installation(request.installed_app_id).await?;
        let target = self
            .store
            .get_history(request.installed_app_version_history_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "deployment history {} not found",
                    request.installed_app_version_history_id
                ))
            })?;
        let target_version = self
            .store
            .get_installed_app_version(target.installed_app_version_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "installed app version {} not found",
                    target.installed_app_version_id
                ))
            })?;
        if target_version.installed_app_id != installed_app.id {
            return Err(Error::Validation(format!(
                "Invalid request! deployment history {} does not belong to installed app {}",
                target.id, installed_app.id
            )));
        }

        let app_type = installed_app.deployment_app_type;
        if matches!(app_type, DeploymentAppType::Helm | DeploymentAppType::Virtual)
            && request.deployment_version.is_none()
        {
            return Err(Error::Validation(
                "Invalid request! deployment version is required".to_string(),
            ));
        }

        let environment = self.load_environment(installed_app.environment_id).await?;
        let chart = self
            .load_chart(target_version.app_store_application_version_id)
            .await?;

        let prepared = self
            .store
            .prepare_rollback(&RollbackDraft {
                installed_app_id: installed_app.id,
                target_version_id: target_version.id,
                values_yaml: target.values_yaml_raw.clone(),
                initial_timelines: attempt_timelines(app_type),
                user_id: request.user_id,
            })
            .await?;
        let plan = RollbackPlan {
            version_changed: prepared.version_changed(),
            deployment_version: request.deployment_version,
        };

        let mut dto = InstallAppVersionDto::from_installation(
            &installed_app,
            &prepared.version,
            &app.app_name,
            &environment,
        );
        dto.team_id = app.team_id;
        dto.values_override_yaml = target.values_yaml_raw.clone();
        dto.installed_app_version_history_id = prepared.history.id;
        dto.deployment_started_on = Some(prepared.history.started_on);
        dto.user_id = request.user_id;
        info!(
            installed_app_id = installed_app.id,
            target_history_id = target.id,
            history_id = prepared.history.id,
            version_changed = plan.version_changed,
            "Rollback recorded"
        );

        let restore = VersionRestore {
            installed_app_id: installed_app.id,
            versions: vec![target_version, prepared.previous_version],
            user_id: request.user_id,
        };
        self.run_attempt(
            ctx,
            &mut dto,
            &chart,
            app_type,
            Operation::Rollback(plan),
            restore,
        )
        .await?;
        self.supersede_previous(&dto).await;
        Ok(true)
    }
}
