// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Virtual environment backend: charts are rendered, never applied.

use std::sync::Arc;

use appstore_state::DeploymentAppType;
use async_trait::async_trait;
use tracing::debug;

use super::{DeleteOptions, DeploymentBackend, RollbackPlan, UpgradePlan};
use crate::catalog::ChartVersion;
use crate::error::Result;
use crate::helm::{HelmClient, InstallReleaseRequest};
use crate::orchestrator::{InstallAppVersionDto, RequestContext};

/// Renders the chart through the helm service's template call.
pub struct VirtualClusterBackend {
    helm: Arc<dyn HelmClient>,
}

impl VirtualClusterBackend {
    /// Create a backend rendering through `helm`.
    pub fn new(helm: Arc<dyn HelmClient>) -> Self {
        Self { helm }
    }

    async fn render(&self, dto: &mut InstallAppVersionDto, chart: &ChartVersion) -> Result<()> {
        let request = InstallReleaseRequest::for_chart(
            dto.release_identifier(),
            chart,
            &dto.values_override_yaml,
            dto.installed_app_version_history_id,
        )?;
        let manifest = self.helm.template_chart(&request).await?;
        debug!(
            app_name = %dto.app_name,
            environment = %dto.environment_name,
            bytes = manifest.len(),
            "Rendered manifest for virtual environment"
        );
        dto.rendered_manifest = Some(manifest);
        Ok(())
    }
}

#[async_trait]
impl DeploymentBackend for VirtualClusterBackend {
    fn app_type(&self) -> DeploymentAppType {
        DeploymentAppType::Virtual
    }

    async fn install(
        &self,
        _ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
    ) -> Result<()> {
        self.render(dto, chart).await
    }

    async fn upgrade(
        &self,
        _ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        _plan: &UpgradePlan,
    ) -> Result<()> {
        self.render(dto, chart).await
    }

    async fn rollback(
        &self,
        _ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        _plan: &RollbackPlan,
    ) -> Result<()> {
        self.render(dto, chart).await
    }

    async fn delete(
        &self,
        _ctx: &RequestContext,
        _dto: &InstallAppVersionDto,
        _options: &DeleteOptions,
    ) -> Result<()> {
        Ok(())
    }

    async fn refresh(&self, _ctx: &RequestContext, _dto: &InstallAppVersionDto) -> Result<()> {
        Ok(())
    }
}
