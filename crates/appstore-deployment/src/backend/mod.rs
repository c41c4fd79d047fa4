// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment backends.
//!
//! Every installation is carried to its target by exactly one backend, chosen
//! from its [`DeploymentAppType`]:
//!
//! | Type | Backend | Side effects |
//! |------|---------|--------------|
//! | `argo_cd` | [`GitOpsBackend`] | Git commits, engine app object |
//! | `helm` | [`HelmBackend`] | helm release |
//! | `virtual` | [`VirtualClusterBackend`] | rendered manifest only |
//! | `manifest_download` | [`ManifestDownloadBackend`] | chart archive only |
//!
//! Backends own the external calls. History rows, terminal timelines and the
//! final installation status are written by the orchestrator.

pub mod gitops;
pub mod helm;
pub mod manifest_download;
pub mod virtual_cluster;

pub use gitops::GitOpsBackend;
pub use helm::HelmBackend;
pub use manifest_download::ManifestDownloadBackend;
pub use virtual_cluster::VirtualClusterBackend;

use std::sync::Arc;

use appstore_state::DeploymentAppType;
use async_trait::async_trait;

use crate::catalog::ChartVersion;
use crate::error::{Error, Result};
use crate::helm::HelmClient;
use crate::orchestrator::{InstallAppVersionDto, RequestContext};

/// What an upgrade changes besides the values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradePlan {
    /// A different chart is bound.
    pub chart_changed: bool,
    /// The same chart at a different version is bound.
    pub version_changed: bool,
}

impl UpgradePlan {
    /// Whether `requirements.yaml` must be rewritten.
    pub fn requirements_changed(&self) -> bool {
        self.chart_changed || self.version_changed
    }
}

/// What a rollback changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackPlan {
    /// The rollback re-activated a different version.
    pub version_changed: bool,
    /// Helm revision rolled back to.
    pub deployment_version: Option<i32>,
}

/// Delete flags handed to a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Swallow backend failures.
    pub force_delete: bool,
    /// Keep the deployed resources, only drop the backend object.
    pub non_cascade_delete: bool,
}

/// One way of carrying an installation to its target.
#[async_trait]
pub trait DeploymentBackend: Send + Sync {
    /// Installation type served by this backend.
    fn app_type(&self) -> DeploymentAppType;

    /// Deploy a freshly recorded installation.
    async fn install(
        &self,
        ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
    ) -> Result<()>;

    /// Deploy new values (and possibly a new chart) of an installation.
    async fn upgrade(
        &self,
        ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        plan: &UpgradePlan,
    ) -> Result<()>;

    /// Deploy the values of an earlier attempt.
    async fn rollback(
        &self,
        ctx: &RequestContext,
        dto: &mut InstallAppVersionDto,
        chart: &ChartVersion,
        plan: &RollbackPlan,
    ) -> Result<()>;

    /// Remove what the backend deployed.
    async fn delete(
        &self,
        ctx: &RequestContext,
        dto: &InstallAppVersionDto,
        options: &DeleteOptions,
    ) -> Result<()>;

    /// Ask the target to re-read the deployed state.
    async fn refresh(&self, ctx: &RequestContext, dto: &InstallAppVersionDto) -> Result<()>;
}

/// The backends available to an orchestrator.
#[derive(Clone)]
pub struct Backends {
    gitops: Option<Arc<GitOpsBackend>>,
    helm: Arc<HelmBackend>,
    virtual_cluster: Arc<VirtualClusterBackend>,
    manifest_download: Arc<ManifestDownloadBackend>,
}

impl Backends {
    /// Helm based backends only; GitOps is added with [`Backends::with_gitops`].
    pub fn new(helm: Arc<dyn HelmClient>) -> Self {
        Self {
            gitops: None,
            helm: Arc::new(HelmBackend::new(helm.clone())),
            virtual_cluster: Arc::new(VirtualClusterBackend::new(helm)),
            manifest_download: Arc::new(ManifestDownloadBackend::new()),
        }
    }

    /// Enable GitOps installations.
    pub fn with_gitops(mut self, gitops: GitOpsBackend) -> Self {
        self.gitops = Some(Arc::new(gitops));
        self
    }

    /// GitOps backend, when configured.
    pub fn gitops(&self) -> Option<&Arc<GitOpsBackend>> {
        self.gitops.as_ref()
    }

    /// Backend serving `app_type`.
    pub fn for_type(&self, app_type: DeploymentAppType) -> Result<Arc<dyn DeploymentBackend>> {
        let backend: Arc<dyn DeploymentBackend> = match app_type {
            DeploymentAppType::GitOps => self
                .gitops
                .clone()
                .ok_or(Error::GitOpsNotConfigured)?,
            DeploymentAppType::Helm => self.helm.clone(),
            DeploymentAppType::Virtual => self.virtual_cluster.clone(),
            DeploymentAppType::ManifestDownload => self.manifest_download.clone(),
        };
        Ok(backend)
    }
}
