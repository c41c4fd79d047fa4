// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitHub provider (organisation repositories, contents API).

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use super::{CommitRequest, CreateRepoRequest, GitError, GitProvider, error_message, host_of};
use crate::config::{GitOpsConfig, GitProviderKind};

/// GitHub REST API client.
pub struct GitHubProvider {
    client: reqwest::Client,
    api_url: String,
    organization: String,
    token: String,
}

impl GitHubProvider {
    /// Create a client for the configured organisation.
    pub fn new(client: reqwest::Client, config: &GitOpsConfig) -> Self {
        Self {
            client,
            api_url: config.host.trim_end_matches('/').to_string(),
            organization: config.organization.clone(),
            token: config.token.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "appstore-deployment")
    }

    async fn api_error(response: reqwest::Response) -> GitError {
        let status = response.status().as_u16();
        GitError::GitHub {
            status,
            message: error_message(response).await,
        }
    }

    async fn file_sha(
        &self,
        repo_name: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<String>, GitError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{}/{}/contents/{}", self.organization, repo_name, path),
            )
            .query(&[("ref", branch)])
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value = response.json().await?;
                Ok(body["sha"].as_str().map(|s| s.to_string()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::api_error(response).await),
        }
    }
}

#[async_trait]
impl GitProvider for GitHubProvider {
    fn kind(&self) -> GitProviderKind {
        GitProviderKind::GitHub
    }

    fn clone_host(&self) -> String {
        match host_of(&self.api_url) {
            Some(host) if host == "api.github.com" => "github.com".to_string(),
            Some(host) => host,
            None => "github.com".to_string(),
        }
    }

    async fn repository_url(&self, name: &str) -> Result<Option<String>, GitError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{}/{}", self.organization, name),
            )
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value = response.json().await?;
                Ok(body["clone_url"].as_str().map(|s| s.to_string()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn create_repository(&self, request: &CreateRepoRequest) -> Result<String, GitError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/orgs/{}/repos", self.organization),
            )
            .json(&json!({
                "name": request.name,
                "description": request.description,
                "private": true,
                "auto_init": false,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let body: serde_json::Value = response.json().await?;
        body["clone_url"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| GitError::GitHub {
                status: 500,
                message: "repository response carries no clone_url".to_string(),
            })
    }

    async fn commit_files(
        &self,
        repo_name: &str,
        commit: &CommitRequest,
    ) -> Result<String, GitError> {
        let mut last_hash = String::new();
        for file in &commit.files {
            let sha = self.file_sha(repo_name, &file.path, &commit.branch).await?;
            let mut body = json!({
                "message": commit.message,
                "content": general_purpose::STANDARD.encode(file.content.as_bytes()),
                "branch": commit.branch,
                "committer": {
                    "name": commit.author_name,
                    "email": commit.author_email,
                },
            });
            if let Some(sha) = sha {
                body["sha"] = json!(sha);
            }

            let response = self
                .request(
                    reqwest::Method::PUT,
                    &format!(
                        "/repos/{}/{}/contents/{}",
                        self.organization, repo_name, file.path
                    ),
                )
                .json(&body)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(Self::api_error(response).await);
            }
            let body: serde_json::Value = response.json().await?;
            last_hash = body["commit"]["sha"].as_str().unwrap_or_default().to_string();
            debug!(repo = repo_name, path = %file.path, hash = %last_hash, "Committed file to GitHub");
        }
        Ok(last_hash)
    }
}
