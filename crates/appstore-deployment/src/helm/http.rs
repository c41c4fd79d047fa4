// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON-over-HTTP client for the helm execution service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{
    HelmClient, HelmError, InstallReleaseRequest, ReleaseIdentifier, ReleaseManifest,
    ReleaseRevision,
};

#[derive(Debug, Deserialize)]
struct OperationResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct InstalledResponse {
    installed: bool,
}

#[derive(Debug, Deserialize)]
struct TemplateResponse {
    manifest: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    revisions: Vec<ReleaseRevision>,
}

/// HTTP client for the helm execution service.
pub struct HttpHelmClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHelmClient {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, HelmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client reusing `client`.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<B, T>(&self, path: &str, release_name: &str, body: &B) -> Result<T, HelmError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}/api/v1{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(HelmError::NotFound(release_name.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(HelmError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn operation<B>(
        &self,
        operation: &'static str,
        path: &str,
        release_name: &str,
        body: &B,
    ) -> Result<(), HelmError>
    where
        B: Serialize + ?Sized,
    {
        let response: OperationResponse = self.post(path, release_name, body).await?;
        if !response.success {
            return Err(HelmError::Unsuccessful {
                operation,
                message: response.message,
            });
        }
        debug!(operation = operation, release = release_name, "Helm operation succeeded");
        Ok(())
    }
}

#[async_trait]
impl HelmClient for HttpHelmClient {
    async fn install_release(&self, request: &InstallReleaseRequest) -> Result<(), HelmError> {
        self.operation(
            "install",
            "/releases/install",
            &request.release_identifier.release_name,
            request,
        )
        .await
    }

    async fn upgrade_release(&self, request: &InstallReleaseRequest) -> Result<(), HelmError> {
        self.operation(
            "upgrade",
            "/releases/upgrade",
            &request.release_identifier.release_name,
            request,
        )
        .await
    }

    async fn rollback_release(
        &self,
        release: &ReleaseIdentifier,
        revision: i32,
    ) -> Result<(), HelmError> {
        self.operation(
            "rollback",
            "/releases/rollback",
            &release.release_name,
            &json!({ "releaseIdentifier": release, "version": revision }),
        )
        .await
    }

    async fn template_chart(&self, request: &InstallReleaseRequest) -> Result<String, HelmError> {
        let response: TemplateResponse = self
            .post(
                "/charts/template",
                &request.release_identifier.release_name,
                request,
            )
            .await?;
        Ok(response.manifest)
    }

    async fn uninstall_release(&self, release: &ReleaseIdentifier) -> Result<(), HelmError> {
        self.operation(
            "uninstall",
            "/releases/uninstall",
            &release.release_name,
            &json!({ "releaseIdentifier": release }),
        )
        .await
    }

    async fn is_release_installed(&self, release: &ReleaseIdentifier) -> Result<bool, HelmError> {
        let response: InstalledResponse = self
            .post(
                "/releases/status",
                &release.release_name,
                &json!({ "releaseIdentifier": release }),
            )
            .await?;
        Ok(response.installed)
    }

    async fn release_history(
        &self,
        release: &ReleaseIdentifier,
    ) -> Result<Vec<ReleaseRevision>, HelmError> {
        let response: HistoryResponse = self
            .post(
                "/releases/history",
                &release.release_name,
                &json!({ "releaseIdentifier": release }),
            )
            .await?;
        Ok(response.revisions)
    }

    async fn release_manifest(
        &self,
        release: &ReleaseIdentifier,
        revision: i32,
    ) -> Result<ReleaseManifest, HelmError> {
        self.post(
            "/releases/manifest",
            &release.release_name,
            &json!({ "releaseIdentifier": release, "version": revision }),
        )
        .await
    }

    async fn link_release_to_chart(&self, request: &InstallReleaseRequest) -> Result<(), HelmError> {
        self.operation(
            "link",
            "/releases/link",
            &request.release_identifier.release_name,
            request,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helm::ChartRepository;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn release() -> ReleaseIdentifier {
        ReleaseIdentifier {
            cluster_id: 1,
            release_name: "svc-a".to_string(),
            release_namespace: "prod".to_string(),
        }
    }

    fn request() -> InstallReleaseRequest {
        InstallReleaseRequest {
            release_identifier: release(),
            chart_name: "nginx".to_string(),
            chart_version: "1.2.3".to_string(),
            values_yaml: "replicas: 2\n".to_string(),
            chart_repository: ChartRepository {
                name: "bitnami".to_string(),
                url: "https://charts.bitnami.com/bitnami".to_string(),
                username: None,
                password: None,
            },
            is_oci_repo: false,
            install_app_version_history_id: 3,
        }
    }

    #[tokio::test]
    async fn test_install_release() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/releases/install"))
            .and(body_partial_json(json!({
                "chartName": "nginx",
                "releaseIdentifier": {"releaseName": "svc-a", "releaseNamespace": "prod"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = HttpHelmClient::with_client(reqwest::Client::new(), &mock_server.uri());
        client.install_release(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsuccessful_operation_is_an_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/releases/upgrade"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "message": "another operation is in progress"
            })))
            .mount(&mock_server)
            .await;

        let client = HttpHelmClient::with_client(reqwest::Client::new(), &mock_server.uri());
        let err = client.upgrade_release(&request()).await.unwrap_err();
        assert!(err.to_string().contains("another operation is in progress"));
    }

    #[tokio::test]
    async fn test_missing_release_maps_to_not_found() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/releases/manifest"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/releases/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"installed": false})))
            .mount(&mock_server)
            .await;

        let client = HttpHelmClient::with_client(reqwest::Client::new(), &mock_server.uri());
        assert!(matches!(
            client.release_manifest(&release(), 2).await,
            Err(HelmError::NotFound(name)) if name == "svc-a"
        ));
        assert!(!client.is_release_installed(&release()).await.unwrap());
    }

    #[tokio::test]
    async fn test_template_chart_returns_manifest() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/charts/template"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "manifest": "---\nkind: Deployment\n"
            })))
            .mount(&mock_server)
            .await;

        let client = HttpHelmClient::with_client(reqwest::Client::new(), &mock_server.uri());
        let manifest = client.template_chart(&request()).await.unwrap();
        assert!(manifest.contains("kind: Deployment"));
    }
}
