// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitLab provider (group projects, commits API).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use super::{CommitRequest, CreateRepoRequest, GitError, GitProvider, error_message, host_of};
use crate::config::{GitOpsConfig, GitProviderKind};

/// GitLab REST API client.
pub struct GitLabProvider {
    client: reqwest::Client,
    base_url: String,
    group: String,
    token: String,
}

fn encode(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

impl GitLabProvider {
    /// Create a client for the configured group.
    pub fn new(client: reqwest::Client, config: &GitOpsConfig) -> Self {
        Self {
            client,
            base_url: config.host.trim_end_matches('/').to_string(),
            group: config.organization.clone(),
            token: config.token.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/api/v4{}", self.base_url, path))
            .header("PRIVATE-TOKEN", &self.token)
    }

    fn project_path(&self, name: &str) -> String {
        encode(&format!("{}/{}", self.group, name))
    }

    async fn api_error(response: reqwest::Response) -> GitError {
        let status = response.status().as_u16();
        GitError::GitLab {
            status,
            message: error_message(response).await,
        }
    }

    async fn group_id(&self) -> Result<i64, GitError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/groups/{}", encode(&self.group)))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let body: serde_json::Value = response.json().await?;
        body["id"].as_i64().ok_or_else(|| GitError::GitLab {
            status: 500,
            message: format!("group '{}' has no id", self.group),
        })
    }

    async fn file_exists(&self, project: &str, path: &str, branch: &str) -> Result<bool, GitError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/projects/{}/repository/files/{}", project, encode(path)),
            )
            .query(&[("ref", branch)])
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::api_error(response).await),
        }
    }
}

#[async_trait]
impl GitProvider for GitLabProvider {
    fn kind(&self) -> GitProviderKind {
        GitProviderKind::GitLab
    }

    fn clone_host(&self) -> String {
        host_of(&self.base_url).unwrap_or_else(|| "gitlab.com".to_string())
    }

    async fn repository_url(&self, name: &str) -> Result<Option<String>, GitError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/projects/{}", self.project_path(name)),
            )
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value = response.json().await?;
                Ok(body["http_url_to_repo"].as_str().map(|s| s.to_string()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn create_repository(&self, request: &CreateRepoRequest) -> Result<String, GitError> {
        let namespace_id = self.group_id().await?;
        let response = self
            .request(reqwest::Method::POST, "/projects")
            .json(&json!({
                "name": request.name,
                "path": request.name,
                "namespace_id": namespace_id,
                "description": request.description,
                "visibility": "private",
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let body: serde_json::Value = response.json().await?;
        body["http_url_to_repo"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| GitError::GitLab {
                status: 500,
                message: "project response carries no http_url_to_repo".to_string(),
            })
    }

    async fn commit_files(
        &self,
        repo_name: &str,
        commit: &CommitRequest,
    ) -> Result<String, GitError> {
        let project = self.project_path(repo_name);
        let mut actions = Vec::with_capacity(commit.files.len());
        for file in &commit.files {
            let action = if self.file_exists(&project, &file.path, &commit.branch).await? {
                "update"
            } else {
                "create"
            };
            actions.push(json!({
                "action": action,
                "file_path": file.path,
                "content": file.content,
            }));
        }

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/projects/{}/repository/commits", project),
            )
            .json(&json!({
                "branch": commit.branch,
                "commit_message": commit.message,
                "author_name": commit.author_name,
                "author_email": commit.author_email,
                "actions": actions,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let body: serde_json::Value = response.json().await?;
        let hash = body["id"].as_str().unwrap_or_default().to_string();
        debug!(repo = repo_name, hash = %hash, files = commit.files.len(), "Committed files to GitLab");
        Ok(hash)
    }
}
