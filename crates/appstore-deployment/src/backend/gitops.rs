// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitOps backend: the chart tree is committed to a Git repository and an
//! engine app object reconciles the cluster to it.
//!
//! A run has two phases. The git phase builds the umbrella chart, makes sure
//! the repository exists and commits to it; the installation moves to
//! `GIT_SUCCESS`. The engine phase registers the repository, creates or
//! re-points the app object and syncs it; the installation moves to
//! `ACD_SUCCESS`. The bulk pipeline resumes at the engine phase when the git
//! phase already succeeded.

use std::sync::Arc;

use appstore_state::{AppstoreDeploymentStatus, DeploymentAppType, Persistence};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{DeleteOptions, DeploymentBackend, RollbackPlan, UpgradePlan};
use crate::catalog::ChartVersion;
use crate::engine::{AppTemplate, EngineAdapter};
use crate::error::{Error, Result};
use crate::gitops::{
    ChartCommitTarget, DEFAULT_BRANCH, GitError, GitOpsRepoService, PushChartRequest,
    repo_name_from_url,
};
use crate::manifest::{
    ChartManifest, ManifestBuilder, REQUIREMENTS_YAML_FILE, VALUES_YAML_FILE,
    requirements_string, values_string,
};
use crate::orchestrator::{InstallAppVersionDto, RequestContext};
use crate::timeline::TimelineService;

/// Deploys installations through a GitOps repository and the deployment engine.
pub struct GitOpsBackend {
    store: Arc<dyn Persistence>,
    repos: Arc<GitOpsRepoService>,
    engine: Arc<EngineAdapter>,
    manifests: ManifestBuilder,
    timelines: TimelineService,
}

impl GitOpsBackend {
    /// Create a backend.
    pub fn new(
        store: Arc<dyn Persistence>,
        repos: Arc<GitOpsRepoService>,
        engine: Arc<EngineAdapter>,
        manifests: ManifestBuilder,
    ) -> Self {
        Self {
            timelines: TimelineService::new(store.clone()),
            store,
            repos,
            engine,
            manifests,
        }
    }

    /// Repository service.
    pub fn repos(&self) -> &Arc<GitOpsRepoService> {
        &self.repos
    }

    /// Engine adapter.
    pub fn engine(&self) -> &Arc<EngineAdapter> {
        &self.engine
    }

    /// Build the chart and commit it. Moves the installation to `GIT_SUCCESS`.
    pub async fn git_phase(
        &self,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
    ) -> Result<()> {
        let manifest = self.manifests.generate_manifest(
            &dto.app_name,
            chart,
            &dto.values_override_yaml,
        )?;
        if dto.git_ops_repo_url.is_none() {
            self.ensure_repository(dto).await?;
        }
        let hash = self.push_full(dto, &manifest).await?;
        self.record_commit(dto, &hash).await
    }

    /// Register the repository, create or re-point the app object and sync it.
    /// Moves the installation to `ACD_SUCCESS`.
    pub async fn engine_phase(
        &self,
        ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
    ) -> Result<()> {
        let token = ctx.auth_token.as_str();
        let repo_url = Self::repo_url(dto)?;
        self.repos
            .register_repo_with_engine(&self.engine, token, &repo_url)
            .await?;

        let name = dto.acd_app_name();
        if self.engine.app_exists(token, &name).await? {
            debug!(app = %name, "Engine application exists, aligning its source and sync mode");
            self.engine
                .patch_source(token, &name, &repo_url, &name)
                .await?;
        } else {
            self.engine
                .create_app(
                    token,
                    &AppTemplate {
                        name: name.clone(),
                        repo_url,
                        chart_location: name.clone(),
                        target_revision: DEFAULT_BRANCH.to_string(),
                        target_server: dto.cluster_server_url.clone(),
                        target_namespace: dto.namespace.clone(),
                        value_file: VALUES_YAML_FILE.to_string(),
                        auto_sync: self.engine.auto_sync_enabled(),
                    },
                )
                .await?;
        }
        self.sync_and_refresh(ctx, dto).await
    }

    fn repo_url(dto: &InstallAppVersionDto) -> Result<String> {
        dto.git_ops_repo_url.clone().ok_or_else(|| {
            Error::Internal(format!(
                "GitOps repository url missing for installed app {}",
                dto.installed_app_id
            ))
        })
    }

    fn commit_target(dto: &InstallAppVersionDto) -> Result<ChartCommitTarget> {
        dto.commit_target().ok_or_else(|| {
            Error::Internal(format!(
                "GitOps repository url missing for installed app {}",
                dto.installed_app_id
            ))
        })
    }

    /// Repository name to recreate when the stored one has gone missing.
    fn repo_name_for(&self, dto: &InstallAppVersionDto) -> String {
        if dto.is_custom_repository {
            if let Some(name) = dto.git_ops_repo_name.as_ref().filter(|n| !n.is_empty()) {
                return name.clone();
            }
            if let Some(url) = &dto.git_ops_repo_url {
                return repo_name_from_url(url);
            }
        }
        self.repos.gitops_repo_name(&dto.app_name)
    }

    /// Create (or find) the repository named on the installation and persist its URL.
    async fn ensure_repository(&self, dto: &mut InstallAppVersionDto) -> Result<()> {
        let name = dto
            .git_ops_repo_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.repos.gitops_repo_name(&dto.app_name));
        let description = format!("helm chart for {}", dto.app_name);
        let (url, is_new) = self.repos.create_repository(&name, &description).await?;

        self.store
            .update_gitops_repository(
                dto.installed_app_id,
                Some(&name),
                Some(&url),
                dto.is_custom_repository,
                dto.user_id,
            )
            .await?;
        info!(
            installed_app_id = dto.installed_app_id,
            repo = %name,
            url = %url,
            is_new = is_new,
            "Resolved GitOps repository"
        );
        dto.git_ops_repo_name = Some(name);
        dto.git_ops_repo_url = Some(url);
        dto.is_new_git_ops_repo = is_new;
        Ok(())
    }

    /// Push the chart tree. Existing repositories get values and requirements
    /// as separate commits after the tree.
    async fn push_full(
        &self,
        dto: &InstallAppVersionDto,
        manifest: &ChartManifest,
    ) -> Result<String> {
        let target = Self::commit_target(dto)?;
        let (_, hash) = self
            .repos
            .push_chart(
                &PushChartRequest {
                    target: target.clone(),
                    include_values: dto.is_new_git_ops_repo,
                },
                manifest,
            )
            .await?;
        if dto.is_new_git_ops_repo {
            return Ok(hash);
        }

        self.commit_file(&target, REQUIREMENTS_YAML_FILE, &manifest.requirements_config)
            .await?;
        Ok(self
            .commit_file(&target, VALUES_YAML_FILE, &manifest.values_config)
            .await?)
    }

    async fn commit_file(
        &self,
        target: &ChartCommitTarget,
        file_name: &str,
        content: &str,
    ) -> std::result::Result<String, GitError> {
        let config = self.repos.chart_config(target, file_name, content);
        let hash = self.repos.commit_values(&config).await?;
        debug!(
            repo = %config.chart_repo_name,
            path = %format!("{}/{}", config.chart_location, file_name),
            hash = %hash,
            "Committed chart file"
        );
        Ok(hash)
    }

    /// Commit requirements (when they changed) and values of an existing chart directory.
    async fn commit_update(
        &self,
        target: &ChartCommitTarget,
        requirements: Option<&str>,
        values: &str,
    ) -> std::result::Result<String, GitError> {
        if let Some(requirements) = requirements {
            self.commit_file(target, REQUIREMENTS_YAML_FILE, requirements)
                .await?;
        }
        self.commit_file(target, VALUES_YAML_FILE, values).await
    }

    async fn record_commit(&self, dto: &mut InstallAppVersionDto, hash: &str) -> Result<()> {
        self.store
            .update_history_git_hash(dto.installed_app_version_history_id, hash, dto.user_id)
            .await?;
        dto.git_hash = Some(hash.to_string());
        self.timelines
            .record_git_commit(
                dto.installed_app_version_history_id,
                self.engine.auto_sync_enabled(),
                dto.user_id,
            )
            .await;
        self.set_status(dto, AppstoreDeploymentStatus::GitSuccess)
            .await
    }

    async fn sync_and_refresh(
        &self,
        ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
    ) -> Result<()> {
        let name = dto.acd_app_name();
        self.engine
            .sync_if_needed_and_refresh(&ctx.auth_token, &name)
            .await?;
        if !self.engine.auto_sync_enabled() {
            self.timelines
                .record_sync_completed(dto.installed_app_version_history_id, dto.user_id)
                .await;
        }
        self.set_status(dto, AppstoreDeploymentStatus::AcdSuccess)
            .await
    }

    async fn set_status(
        &self,
        dto: &mut InstallAppVersionDto,
        status: AppstoreDeploymentStatus,
    ) -> Result<()> {
        self.store
            .update_installed_app_status(dto.installed_app_id, status, dto.user_id)
            .await?;
        dto.status = Some(status);
        Ok(())
    }
}

#[async_trait]
impl DeploymentBackend for GitOpsBackend {
    fn app_type(&self) -> DeploymentAppType {
        DeploymentAppType::GitOps
    }

    async fn install(
        &self,
        ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
    ) -> Result<()> {
        self.git_phase(dto, chart).await?;
        self.engine_phase(ctx, dto).await
    }

    async fn upgrade(
        &self,
        ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        plan: &UpgradePlan,
    ) -> Result<()> {
        let manifest = self.manifests.generate_manifest(
            &dto.app_name,
            chart,
            &dto.values_override_yaml,
        )?;

        let mut migrated = false;
        if !dto.is_custom_repository {
            let desired = self.repos.gitops_repo_name(&dto.app_name);
            if dto.git_ops_repo_name.as_deref() != Some(desired.as_str()) {
                info!(
                    installed_app_id = dto.installed_app_id,
                    from = ?dto.git_ops_repo_name,
                    to = %desired,
                    "GitOps repository naming changed, migrating"
                );
                dto.git_ops_repo_name = Some(desired);
                dto.git_ops_repo_url = None;
                migrated = true;
            }
        }
        if dto.git_ops_repo_url.is_none() {
            self.ensure_repository(dto).await?;
        }

        let hash = if migrated || dto.is_new_git_ops_repo {
            self.push_full(dto, &manifest).await?
        } else {
            let target = Self::commit_target(dto)?;
            let requirements = plan
                .requirements_changed()
                .then_some(manifest.requirements_config.as_str());
            match self
                .commit_update(&target, requirements, &manifest.values_config)
                .await
            {
                Ok(hash) => hash,
                Err(err) if self.repos.is_repo_missing(&err) => {
                    warn!(
                        installed_app_id = dto.installed_app_id,
                        error = %err,
                        "GitOps repository missing, recreating"
                    );
                    dto.git_ops_repo_name = Some(self.repo_name_for(dto));
                    dto.git_ops_repo_url = None;
                    self.ensure_repository(dto).await?;
                    migrated = true;
                    self.push_full(dto, &manifest).await?
                }
                Err(err) => return Err(err.into()),
            }
        };
        self.record_commit(dto, &hash).await?;

        let token = ctx.auth_token.as_str();
        let name = dto.acd_app_name();
        if migrated {
            let repo_url = Self::repo_url(dto)?;
            self.repos
                .register_repo_with_engine(&self.engine, token, &repo_url)
                .await?;
            self.engine
                .patch_source(token, &name, &repo_url, &name)
                .await?;
        } else {
            self.engine.update_sync_mode_if_needed(token, &name).await?;
        }
        self.sync_and_refresh(ctx, dto).await
    }

    async fn rollback(
        &self,
        ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        plan: &RollbackPlan,
    ) -> Result<()> {
        if dto.git_ops_repo_url.is_none() {
            self.ensure_repository(dto).await?;
        }
        let target = Self::commit_target(dto)?;
        let values = values_string(&chart.chart_name, &dto.values_override_yaml)?;
        let requirements = if plan.version_changed {
            Some(requirements_string(chart)?)
        } else {
            None
        };

        let hash = self
            .commit_update(&target, requirements.as_deref(), &values)
            .await?;
        self.record_commit(dto, &hash).await?;
        self.sync_and_refresh(ctx, dto).await
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        dto: &InstallAppVersionDto,
        options: &DeleteOptions,
    ) -> Result<()> {
        let name = dto.acd_app_name();
        if dto.deployment_app_delete_request {
            debug!(app = %name, "Engine application already deleted");
            return Ok(());
        }

        let cascade = !options.non_cascade_delete;
        match self.engine.delete(&ctx.auth_token, &name, cascade).await {
            Ok(()) => {
                info!(app = %name, cascade = cascade, "Deleted engine application");
                Ok(())
            }
            Err(e) if options.force_delete => {
                warn!(
                    app = %name,
                    error = %e,
                    "Failed to delete engine application, continuing with forced delete"
                );
                Ok(())
            }
            Err(e) if e.is_not_found() && cascade => {
                Err(Error::NotFound("application not found in argocd".to_string()))
            }
            Err(e) if e.is_not_found() => {
                debug!(app = %name, "Engine application already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh(&self, ctx: &RequestContext, dto: &InstallAppVersionDto) -> Result<()> {
        self.engine
            .refresh(&ctx.auth_token, &dto.acd_app_name())
            .await?;
        Ok(())
    }
}
