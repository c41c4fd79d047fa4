// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deletion of installations.

use appstore_state::DeploymentAppType;
use tracing::{info, warn};

use super::{
    AppStoreOrchestrator, DeleteInstalledAppRequest, InstallAppVersionDto,
    InstalledAppDeleteResponse, RequestContext,
};
use crate::backend::DeleteOptions;
use crate::error::{Error, Result};

impl AppStoreOrchestrator {
    /// Delete an installation.
    ///
    /// | Case | Effect |
    /// |------|--------|
    /// | already inactive | nothing, `deleteInitiated=true` |
    /// | cluster unreachable, cascade | nothing, `deleteInitiated=false` |
    /// | `acdPartialDelete` on GitOps | engine app removed, rows marked for the reconciler |
    /// | otherwise | backend delete, then every row deactivated |
    pub async fn delete_installed_app(
        &self,
        ctx: &RequestContext,
        request: DeleteInstalledAppRequest,
    ) -> Result<InstallAppVersionDto> {
        let installed_app = self
            .store
            .get_installed_app(request.installed_app_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("installed app {} not found", request.installed_app_id))
            })?;

        if !installed_app.active {
            info!(installed_app_id = installed_app.id, "Installation already deleted");
            return Ok(InstallAppVersionDto {
                installed_app_id: installed_app.id,
                app_id: installed_app.app_id,
                environment_id: installed_app.environment_id,
                deployment_app_type: Some(installed_app.deployment_app_type),
                user_id: request.user_id,
                delete_response: Some(InstalledAppDeleteResponse {
                    delete_initiated: true,
                    cluster_reachable: true,
                    cluster_name: String::new(),
                }),
                ..Default::default()
            });
        }

        let app = self.load_app(installed_app.app_id).await?;
        let environment = self.load_environment(installed_app.environment_id).await?;
        let version = self
            .store
            .get_active_installed_app_version(installed_app.id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no active version for installed app {}",
                    installed_app.id
                ))
            })?;
        let mut dto =
            InstallAppVersionDto::from_installation(&installed_app, &version, &app.app_name, &environment);
        dto.team_id = app.team_id;
        dto.user_id = request.user_id;

        let cluster_reachable = environment.is_virtual
            || self
                .environments
                .is_cluster_reachable(environment.cluster_id)
                .await?;
        if !cluster_reachable && !request.non_cascade_delete {
            warn!(
                installed_app_id = installed_app.id,
                cluster = %environment.cluster_name,
                "Cluster unreachable, delete not initiated"
            );
            dto.delete_response = Some(InstalledAppDeleteResponse {
                delete_initiated: false,
                cluster_reachable: false,
                cluster_name: environment.cluster_name.clone(),
            });
            return Ok(dto);
        }

        let app_type = installed_app.deployment_app_type;
        let backend = self.backends.for_type(app_type)?;
        let options = DeleteOptions {
            force_delete: request.force_delete,
            non_cascade_delete: request.non_cascade_delete,
        };

        if request.acd_partial_delete && app_type == DeploymentAppType::GitOps {
            self.with_deadline("delete", backend.delete(ctx, &dto, &options))
                .await?;
            self.store
                .mark_deployment_app_delete_request(installed_app.id, request.user_id)
                .await?;
            dto.deployment_app_delete_request = true;
            info!(
                installed_app_id = installed_app.id,
                app = %dto.acd_app_name(),
                "Engine application deleted, rows left for reconciliation"
            );
            dto.delete_response = Some(InstalledAppDeleteResponse {
                delete_initiated: true,
                cluster_reachable: true,
                cluster_name: String::new(),
            });
            return Ok(dto);
        }

        self.with_deadline("delete", backend.delete(ctx, &dto, &options))
            .await?;
        self.store
            .deactivate_installation(installed_app.id, request.user_id)
            .await?;
        info!(
            installed_app_id = installed_app.id,
            app_name = %dto.app_name,
            environment = %dto.environment_name,
            deployment_app_type = %app_type,
            "Installation deleted"
        );
        dto.delete_response = Some(InstalledAppDeleteResponse {
            delete_initiated: true,
            cluster_reachable,
            cluster_name: if cluster_reachable {
                String::new()
            } else {
                environment.cluster_name.clone()
            },
        });
        Ok(dto)
    }
}
