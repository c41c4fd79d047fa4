// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Argo-CD style REST client.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use super::{Application, EngineApi, EngineError};

/// gRPC status code `NotFound` as relayed in REST error bodies.
const GRPC_NOT_FOUND: i64 = 5;

/// REST client for `/api/v1/applications` and `/api/v1/repositories`.
pub struct ArgoEngineClient {
    client: reqwest::Client,
    base_url: String,
}

impl ArgoEngineClient {
    /// Create a client for the engine at `base_url`.
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str, token: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/api/v1{}", self.base_url, path));
        if token.is_empty() {
            builder
        } else {
            builder.bearer_auth(token)
        }
    }

    /// Map a non-success response. Missing app objects come back either as
    /// 404 or with gRPC code 5 in the body.
    async fn api_error(response: reqwest::Response, name: &str) -> EngineError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: Option<serde_json::Value> = serde_json::from_str(&text).ok();
        let code = body.as_ref().and_then(|b| b["code"].as_i64());
        if status == StatusCode::NOT_FOUND || code == Some(GRPC_NOT_FOUND) {
            return EngineError::NotFound {
                name: name.to_string(),
            };
        }
        let message = body
            .as_ref()
            .and_then(|b| b["message"].as_str().or_else(|| b["error"].as_str()))
            .map(|m| m.to_string())
            .unwrap_or(text);
        EngineError::Status {
            status: status.as_u16(),
            message,
        }
    }

    async fn application(response: reqwest::Response, name: &str) -> Result<Application, EngineError> {
        if !response.status().is_success() {
            return Err(Self::api_error(response, name).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl EngineApi for ArgoEngineClient {
    async fn get(&self, token: &str, name: &str) -> Result<Application, EngineError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/applications/{}", name), token)
            .send()
            .await?;
        Self::application(response, name).await
    }

    async fn create(
        &self,
        token: &str,
        application: &Application,
    ) -> Result<Application, EngineError> {
        let response = self
            .request(reqwest::Method::POST, "/applications", token)
            .query(&[("upsert", "true")])
            .json(application)
            .send()
            .await?;
        debug!(app = %application.metadata.name, "Created engine application");
        Self::application(response, &application.metadata.name).await
    }

    async fn update(
        &self,
        token: &str,
        application: &Application,
    ) -> Result<Application, EngineError> {
        let name = &application.metadata.name;
        let response = self
            .request(reqwest::Method::PUT, &format!("/applications/{}", name), token)
            .json(application)
            .send()
            .await?;
        Self::application(response, name).await
    }

    async fn patch(
        &self,
        token: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Application, EngineError> {
        let response = self
            .request(reqwest::Method::PATCH, &format!("/applications/{}", name), token)
            .json(&json!({
                "name": name,
                "patch": patch.to_string(),
                "patchType": "merge",
            }))
            .send()
            .await?;
        Self::application(response, name).await
    }

    async fn delete(&self, token: &str, name: &str, cascade: bool) -> Result<(), EngineError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/applications/{}", name), token)
            .query(&[("cascade", cascade.to_string())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, name).await);
        }
        debug!(app = name, cascade = cascade, "Deleted engine application");
        Ok(())
    }

    async fn sync(&self, token: &str, name: &str, revision: &str) -> Result<(), EngineError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/applications/{}/sync", name),
                token,
            )
            .json(&json!({ "name": name, "revision": revision, "prune": true }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, name).await);
        }
        Ok(())
    }

    async fn refresh(&self, token: &str, name: &str) -> Result<Application, EngineError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/applications/{}", name), token)
            .query(&[("refresh", "normal")])
            .send()
            .await?;
        Self::application(response, name).await
    }

    async fn register_repo(&self, token: &str, repo_url: &str) -> Result<(), EngineError> {
        let response = self
            .request(reqwest::Method::POST, "/repositories", token)
            .query(&[("upsert", "true")])
            .json(&json!({ "repo": repo_url, "type": "git" }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, repo_url).await);
        }
        debug!(repo = repo_url, "Registered repository with engine");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app_json() -> serde_json::Value {
        json!({
            "metadata": {"name": "svc-a-prod", "namespace": "argocd"},
            "spec": {
                "source": {"repoURL": "https://github.com/acme/svc-a.git", "path": "svc-a-prod", "targetRevision": "master"},
                "destination": {"server": "https://k", "namespace": "prod"},
                "project": "default"
            }
        })
    }

    #[tokio::test]
    async fn test_get_sends_bearer_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/applications/svc-a-prod"))
            .and(header("Authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(app_json()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ArgoEngineClient::new(reqwest::Client::new(), &mock_server.uri());
        let app = client.get("user-token", "svc-a-prod").await.unwrap();
        assert_eq!(app.spec.source.path, "svc-a-prod");
    }

    #[tokio::test]
    async fn test_not_found_shapes() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/applications/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/applications/hidden"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "code": 5,
                "message": "applications.argoproj.io \"hidden\" not found"
            })))
            .mount(&mock_server)
            .await;

        let client = ArgoEngineClient::new(reqwest::Client::new(), &mock_server.uri());
        assert!(client.get("t", "gone").await.unwrap_err().is_not_found());
        assert!(client.delete("t", "hidden", true).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_passes_cascade_flag() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/v1/applications/svc-a-prod"))
            .and(query_param("cascade", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ArgoEngineClient::new(reqwest::Client::new(), &mock_server.uri());
        client.delete("t", "svc-a-prod", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_patch_uses_merge_patch() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/api/v1/applications/svc-a-prod"))
            .and(body_partial_json(json!({"name": "svc-a-prod", "patchType": "merge"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(app_json()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = ArgoEngineClient::new(reqwest::Client::new(), &mock_server.uri());
        client
            .patch(
                "t",
                "svc-a-prod",
                &json!({"spec": {"source": {"path": "svc-a-prod"}}}),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_reported_with_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/repositories"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"code": 2, "message": "rpc error"})),
            )
            .mount(&mock_server)
            .await;

        let client = ArgoEngineClient::new(reqwest::Client::new(), &mock_server.uri());
        let err = client
            .register_repo("t", "https://github.com/acme/svc-a.git")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Status { status: 500, ref message } if message == "rpc error"));
    }
}
