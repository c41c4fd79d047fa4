// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Helm execution service integration.
//!
//! Helm and virtual installations are handed to an external helm execution
//! service; [`HelmClient`] is its contract. [`HttpHelmClient`] talks JSON over
//! HTTP and [`MockHelmClient`] keeps releases in memory.

pub mod http;
pub mod mock;

pub use http::HttpHelmClient;
pub use mock::MockHelmClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{ChartOrigin, ChartVersion};
use crate::manifest::normalize_oci_dependency;

/// Helm service errors.
#[derive(Debug, Error)]
pub enum HelmError {
    /// Release (or revision) does not exist.
    #[error("release '{0}' not found")]
    NotFound(String),

    /// The service answered but the operation did not succeed.
    #[error("helm {operation} unsuccessful: {message}")]
    Unsuccessful {
        /// Operation name.
        operation: &'static str,
        /// Reported reason.
        message: String,
    },

    /// Non-success response.
    #[error("helm service returned {status}: {message}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// Chart reference could not be built.
    #[error("invalid chart reference: {0}")]
    InvalidChart(String),
}

impl From<reqwest::Error> for HelmError {
    fn from(err: reqwest::Error) -> Self {
        HelmError::Transport(err.to_string())
    }
}

/// Release coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseIdentifier {
    /// Cluster the release lives on.
    pub cluster_id: i64,
    /// Release name (the app name).
    pub release_name: String,
    /// Release namespace.
    pub release_namespace: String,
}

/// Chart source handed to the helm service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRepository {
    /// Repository name (registry id for OCI charts).
    pub name: String,
    /// Repository URL; `oci://host/path` for OCI charts.
    pub url: String,
    /// Username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Install or upgrade request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReleaseRequest {
    /// Release coordinates.
    pub release_identifier: ReleaseIdentifier,
    /// Chart name (last path segment for OCI charts).
    pub chart_name: String,
    /// Chart version.
    pub chart_version: String,
    /// User values.
    pub values_yaml: String,
    /// Chart source.
    pub chart_repository: ChartRepository,
    /// Whether the chart is pulled from an OCI registry.
    pub is_oci_repo: bool,
    /// History row the service reports back on in async mode.
    pub install_app_version_history_id: i64,
}

impl InstallReleaseRequest {
    /// Build the request for `chart`.
    pub fn for_chart(
        release_identifier: ReleaseIdentifier,
        chart: &ChartVersion,
        values_yaml: &str,
        history_id: i64,
    ) -> Result<Self, HelmError> {
        let (chart_name, chart_repository, is_oci_repo) = chart_source(chart)?;
        Ok(Self {
            release_identifier,
            chart_name,
            chart_version: chart.version.clone(),
            values_yaml: values_yaml.to_string(),
            chart_repository,
            is_oci_repo,
            install_app_version_history_id: history_id,
        })
    }
}

/// Chart name, repository and OCI flag of a catalog chart.
pub fn chart_source(chart: &ChartVersion) -> Result<(String, ChartRepository, bool), HelmError> {
    match &chart.origin {
        ChartOrigin::Repository {
            name,
            url,
            username,
            password,
            ..
        } => Ok((
            chart.chart_name.clone(),
            ChartRepository {
                name: name.clone(),
                url: url.clone(),
                username: username.clone(),
                password: password.clone(),
            },
            false,
        )),
        ChartOrigin::Oci {
            registry_id,
            registry_url,
            username,
            password,
        } => {
            let (name, repository) = normalize_oci_dependency(registry_url, &chart.chart_name)
                .map_err(|e| HelmError::InvalidChart(e.to_string()))?;
            Ok((
                name,
                ChartRepository {
                    name: registry_id.clone(),
                    url: repository,
                    username: username.clone(),
                    password: password.clone(),
                },
                true,
            ))
        }
    }
}

/// One revision of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRevision {
    /// Helm revision number.
    pub revision: i32,
    /// Chart name.
    pub chart_name: String,
    /// Chart version.
    pub chart_version: String,
    /// Release status, e.g. `deployed`.
    pub status: String,
    /// When the revision was deployed.
    pub deployed_at: DateTime<Utc>,
}

/// Rendered manifest and values of one revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseManifest {
    /// Rendered manifest.
    pub manifest: String,
    /// Values of the revision.
    pub values_yaml: String,
}

/// Helm execution service contract.
#[async_trait]
pub trait HelmClient: Send + Sync {
    /// Install a release.
    async fn install_release(&self, request: &InstallReleaseRequest) -> Result<(), HelmError>;

    /// Upgrade a release to a chart and values.
    async fn upgrade_release(&self, request: &InstallReleaseRequest) -> Result<(), HelmError>;

    /// Roll a release back to `revision`.
    async fn rollback_release(
        &self,
        release: &ReleaseIdentifier,
        revision: i32,
    ) -> Result<(), HelmError>;

    /// Render a chart without applying it.
    async fn template_chart(&self, request: &InstallReleaseRequest) -> Result<String, HelmError>;

    /// Uninstall a release.
    async fn uninstall_release(&self, release: &ReleaseIdentifier) -> Result<(), HelmError>;

    /// Whether the release exists.
    async fn is_release_installed(&self, release: &ReleaseIdentifier) -> Result<bool, HelmError>;

    /// Revisions of a release, newest first.
    async fn release_history(
        &self,
        release: &ReleaseIdentifier,
    ) -> Result<Vec<ReleaseRevision>, HelmError>;

    /// Manifest and values of one revision.
    async fn release_manifest(
        &self,
        release: &ReleaseIdentifier,
        revision: i32,
    ) -> Result<ReleaseManifest, HelmError>;

    /// Record that an existing release is managed from the chart store.
    async fn link_release_to_chart(&self, request: &InstallReleaseRequest) -> Result<(), HelmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oci_chart_source() {
        let chart = ChartVersion {
            id: 9,
            app_store_id: 1,
            chart_name: "team/redis".to_string(),
            version: "17.0.0".to_string(),
            default_values_yaml: String::new(),
            values_schema_json: None,
            origin: ChartOrigin::Oci {
                registry_id: "ecr".to_string(),
                registry_url: "https://registry.example.com/charts".to_string(),
                username: Some("u".to_string()),
                password: None,
            },
        };
        let (name, repository, is_oci) = chart_source(&chart).unwrap();
        assert_eq!(name, "redis");
        assert_eq!(repository.url, "oci://registry.example.com/charts/team");
        assert_eq!(repository.name, "ecr");
        assert!(is_oci);
    }

    #[test]
    fn test_request_wire_shape() {
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
        let request = InstallReleaseRequest::for_chart(
            ReleaseIdentifier {
                cluster_id: 1,
                release_name: "svc-a".to_string(),
                release_namespace: "prod".to_string(),
            },
            &chart,
            "replicas: 2\n",
            17,
        )
        .unwrap();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["releaseIdentifier"]["releaseName"], "svc-a");
        assert_eq!(json["chartRepository"]["url"], "https://charts.bitnami.com/bitnami");
        assert_eq!(json["isOciRepo"], false);
        assert_eq!(json["installAppVersionHistoryId"], 17);
        assert!(json["chartRepository"].get("username").is_none());
    }
}
