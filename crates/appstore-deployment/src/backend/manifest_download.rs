// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Manifest download backend: the chart is packaged for the user, nothing is deployed.

use appstore_state::DeploymentAppType;
use async_trait::async_trait;
use tracing::debug;

use super::{DeleteOptions, DeploymentBackend, RollbackPlan, UpgradePlan};
use crate::catalog::ChartVersion;
use crate::error::Result;
use crate::manifest::{build_chart_archive, requirements_string, values_string};
use crate::orchestrator::{InstallAppVersionDto, RequestContext};

/// Packages the umbrella chart into [`InstallAppVersionDto::manifest_archive`].
#[derive(Debug, Default)]
pub struct ManifestDownloadBackend;

impl ManifestDownloadBackend {
    /// Create the backend.
    pub fn new() -> Self {
        Self
    }

    fn package(dto: &mut InstallAppVersionDto, chart: &ChartVersion) -> Result<()> {
        let values = values_string(&chart.chart_name, &dto.values_override_yaml)?;
        let requirements = requirements_string(chart)?;
        let archive = build_chart_archive(
            &dto.app_name,
            &values,
            &requirements,
            &dto.app_name,
            &chart.version,
        )?;
        debug!(app_name = %dto.app_name, bytes = archive.len(), "Packaged chart for download");
        dto.manifest_archive = Some(archive);
        Ok(())
    }
}

#[async_trait]
impl DeploymentBackend for ManifestDownloadBackend {
    fn app_type(&self) -> DeploymentAppType {
        DeploymentAppType::ManifestDownload
    }

    async fn install(
        &self,
        _ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
    ) -> Result<()> {
        Self::package(dto, chart)
    }

    async fn upgrade(
        &self,
        _ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        _plan: &UpgradePlan,
    ) -> Result<()> {
        Self::package(dto, chart)
    }

    async fn rollback(
        &self,
        _ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        _plan: &RollbackPlan,
    ) -> Result<()> {
        Self::package(dto, chart)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ChartOrigin;
    use flate2::read::GzDecoder;

    #[tokio::test]
    async fn test_install_packages_archive() {
        let chart = ChartVersion {
            id: 55,
            app_store_id: 1,
            chart_name: "nginx".to_string(),
            version: "1.2.3".to_string(),
            default_values_yaml: String::new(),
            values_schema_json: None,
            origin: ChartOrigin::Repository {
                name: "bitnami".to_string(),
                url: "https://charts.bitnami.com/bitnami".to_string(),
                username: None,
                password: None,
                active: true,
            },
        };
        let mut dto = InstallAppVersionDto {
            app_name: "svc-a".to_string(),
            values_override_yaml: "replicas: 2\n".to_string(),
            ..Default::default()
        };

        ManifestDownloadBackend::new()
            .install(&RequestContext::default(), &mut dto, &chart)
            .await
            .unwrap();

        let archive = dto.manifest_archive.unwrap();
        let mut entries = tar::Archive::new(GzDecoder::new(archive.as_slice()));
        let paths: Vec<String> = entries
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(paths.contains(&"svc-a/values.yaml".to_string()));
        assert!(paths.contains(&"svc-a/requirements.yaml".to_string()));
    }
}
