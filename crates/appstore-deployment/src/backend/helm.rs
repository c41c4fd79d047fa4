// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Helm backend: releases managed through the helm execution service.

use std::sync::Arc;

use appstore_state::DeploymentAppType;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{DeleteOptions, DeploymentBackend, RollbackPlan, UpgradePlan};
use crate::catalog::ChartVersion;
use crate::error::{Error, Result};
use crate::helm::{HelmClient, HelmError, InstallReleaseRequest};
use crate::orchestrator::{InstallAppVersionDto, RequestContext};

/// Installs charts as helm releases named after the app.
pub struct HelmBackend {
    helm: Arc<dyn HelmClient>,
}

impl HelmBackend {
    /// Create a backend calling `helm`.
    pub fn new(helm: Arc<dyn HelmClient>) -> Self {
        Self { helm }
    }

    fn release_request(
        dto: &InstallAppVersionDto,
        chart: &ChartVersion,
    ) -> Result<InstallReleaseRequest> {
        Ok(InstallReleaseRequest::for_chart(
            dto.release_identifier(),
            chart,
            &dto.values_override_yaml,
            dto.installed_app_version_history_id,
        )?)
    }
}

#[async_trait]
impl DeploymentBackend for HelmBackend {
    fn app_type(&self) -> DeploymentAppType {
        DeploymentAppType::Helm
    }

    async fn install(
        &self,
        _ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
    ) -> Result<()> {
        let request = Self::release_request(dto, chart)?;
        self.helm.install_release(&request).await?;
        info!(
            release = %request.release_identifier.release_name,
            namespace = %request.release_identifier.release_namespace,
            chart = %request.chart_name,
            version = %request.chart_version,
            "Installed helm release"
        );
        Ok(())
    }

    async fn upgrade(
        &self,
        _ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        _plan: &UpgradePlan,
    ) -> Result<()> {
        let request = Self::release_request(dto, chart)?;
        self.helm.upgrade_release(&request).await?;
        info!(
            release = %request.release_identifier.release_name,
            chart = %request.chart_name,
            version = %request.chart_version,
            "Upgraded helm release"
        );
        Ok(())
    }

    async fn rollback(
        &self,
        _ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        _chart: &ChartVersion,
        plan: &RollbackPlan,
    ) -> Result<()> {
        let revision = plan.deployment_version.ok_or_else(|| {
            Error::Validation("Invalid request! deployment version is required".to_string())
        })?;
        let release = dto.release_identifier();
        self.helm.rollback_release(&release, revision).await?;
        info!(release = %release.release_name, revision = revision, "Rolled back helm release");
        Ok(())
    }

    async fn delete(
        &self,
        _ctx: &RequestContext,
        dto: &InstallAppVersionDto,
        options: &DeleteOptions,
    ) -> Result<()> {
        let release = dto.release_identifier();
        match self.helm.uninstall_release(&release).await {
            Ok(()) => {
                info!(release = %release.release_name, "Uninstalled helm release");
                Ok(())
            }
            Err(HelmError::NotFound(_)) => {
                debug!(release = %release.release_name, "Helm release already gone");
                Ok(())
            }
            Err(e) if options.force_delete => {
                warn!(
                    release = %release.release_name,
                    error = %e,
                    "Failed to uninstall helm release, continuing with forced delete"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh(&self, _ctx: &RequestContext, _dto: &InstallAppVersionDto) -> Result<()> {
        Ok(())
    }
}
