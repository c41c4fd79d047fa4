// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Purge of installations whose engine app was removed by a partial delete.

use tracing::{debug, info, warn};

use super::{AppStoreOrchestrator, DeleteInstalledAppRequest, RequestContext, SYSTEM_USER_ID};
use crate::error::{Error, Result};

/// Message returned once an orphaned installation has been purged.
pub const ENGINE_APP_NOT_FOUND_MESSAGE: &str = "application not found in argocd";

impl AppStoreOrchestrator {
    /// Purge an installation marked for deletion once its engine app is gone.
    ///
    /// Returns [`Error::NotFound`] after the purge, matching what callers
    /// polling the engine app expect. [`Error::EngineAppStillExists`] means the
    /// engine has not removed the app yet.
    pub async fn mark_gitops_installed_apps_deleted_if_engine_app_is_deleted(
        &self,
        ctx: &RequestContext,
        installed_app_id: i64,
        environment_id: i64,
    ) -> Result<()> {
        let installed_app = self
            .store
            .find_gitops_installed_app_pending_delete(installed_app_id, environment_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no pending GitOps delete for installed app {} in environment {}",
                    installed_app_id, environment_id
                ))
            })?;
        let gitops = self.backends.gitops().ok_or(Error::GitOpsNotConfigured)?;
        let app = self.load_app(installed_app.app_id).await?;
        let environment = self.load_environment(environment_id).await?;

        let name = format!("{}-{}", app.app_name, environment.name);
        if gitops
            .engine()
            .app_exists(&ctx.auth_token, &name)
            .await?
        {
            return Err(Error::EngineAppStillExists { name });
        }

        let dto = self
            .delete_installed_app(
                ctx,
                DeleteInstalledAppRequest {
                    installed_app_id: installed_app.id,
                    force_delete: false,
                    non_cascade_delete: false,
                    acd_partial_delete: false,
                    user_id: SYSTEM_USER_ID,
                },
            )
            .await?;

        let initiated = dto
            .delete_response
            .as_ref()
            .is_some_and(|r| r.delete_initiated);
        if !initiated {
            warn!(
                installed_app_id = installed_app.id,
                cluster = %environment.cluster_name,
                "Cluster unreachable, orphaned installation kept"
            );
            return Ok(());
        }
        info!(
            installed_app_id = installed_app.id,
            app = %name,
            "Purged installation of deleted engine app"
        );
        Err(Error::NotFound(ENGINE_APP_NOT_FOUND_MESSAGE.to_string()))
    }

    /// Run the orphan purge over up to `limit` marked installations.
    /// Returns how many were purged.
    pub async fn reconcile_pending_deletes(&self, ctx: &RequestContext, limit: i64) -> Result<usize> {
        let pending = self.store.list_installed_apps_pending_delete(limit).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        debug!(count = pending.len(), "Checking installations pending delete");

        let mut purged = 0;
        for installed_app in pending {
            match self
                .mark_gitops_installed_apps_deleted_if_engine_app_is_deleted(
                    ctx,
                    installed_app.id,
                    installed_app.environment_id,
                )
                .await
            {
                Err(Error::NotFound(_)) => purged += 1,
                Ok(()) => {}
                Err(Error::EngineAppStillExists { name }) => {
                    debug!(installed_app_id = installed_app.id, app = %name, "Engine app still exists");
                }
                Err(e) => warn!(
                    installed_app_id = installed_app.id,
                    error = %e,
                    "Failed to reconcile installation pending delete"
                ),
            }
        }
        Ok(purged)
    }
}
