// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Azure DevOps provider (project repositories, pushes API).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use super::{CommitRequest, CreateRepoRequest, GitError, GitProvider, error_message, host_of};
use crate::config::{GitOpsConfig, GitProviderKind};

const API_VERSION: &str = "7.0";
const EMPTY_OBJECT_ID: &str = "0000000000000000000000000000000000000000";

/// Azure DevOps Git REST API client.
pub struct AzureDevOpsProvider {
    client: reqwest::Client,
    base_url: String,
    organization: String,
    project: String,
    token: String,
}

impl AzureDevOpsProvider {
    /// Create a client for the configured organisation and project.
    pub fn new(client: reqwest::Client, config: &GitOpsConfig) -> Self {
        Self {
            client,
            base_url: config.host.trim_end_matches('/').to_string(),
            organization: config.organization.clone(),
            project: config.project.clone(),
            token: config.token.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(
                method,
                format!(
                    "{}/{}/{}/_apis/git/repositories{}",
                    self.base_url, self.organization, self.project, path
                ),
            )
            .query(&[("api-version", API_VERSION)])
            .basic_auth("", Some(&self.token))
    }

    async fn api_error(response: reqwest::Response) -> GitError {
        let status = response.status().as_u16();
        GitError::Azure {
            status_code: Some(status),
            message: error_message(response).await,
        }
    }

    async fn branch_head(&self, repo_name: &str, branch: &str) -> Result<String, GitError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/{}/refs", repo_name))
            .query(&[("filter", format!("heads/{}", branch))])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let body: serde_json::Value = response.json().await?;
        Ok(body["value"][0]["objectId"]
            .as_str()
            .unwrap_or(EMPTY_OBJECT_ID)
            .to_string())
    }

    async fn item_exists(&self, repo_name: &str, path: &str, branch: &str) -> Result<bool, GitError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/{}/items", repo_name))
            .query(&[("path", path), ("versionDescriptor.version", branch)])
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
impl GitProvider for AzureDevOpsProvider {
    fn kind(&self) -> GitProviderKind {
        GitProviderKind::Azure
    }

    fn clone_host(&self) -> String {
        host_of(&self.base_url).unwrap_or_else(|| "dev.azure.com".to_string())
    }

    async fn repository_url(&self, name: &str) -> Result<Option<String>, GitError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/{}", name))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value = response.json().await?;
                Ok(body["remoteUrl"].as_str().map(|s| s.to_string()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn create_repository(&self, request: &CreateRepoRequest) -> Result<String, GitError> {
        let response = self
            .request(reqwest::Method::POST, "")
            .json(&json!({
                "name": request.name,
                "project": { "name": self.project },
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let body: serde_json::Value = response.json().await?;
        body["remoteUrl"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| GitError::Azure {
                status_code: None,
                message: "repository response carries no remoteUrl".to_string(),
            })
    }

    async fn commit_files(
        &self,
        repo_name: &str,
        commit: &CommitRequest,
    ) -> Result<String, GitError> {
        let old_object_id = self.branch_head(repo_name, &commit.branch).await?;
        let mut changes = Vec::with_capacity(commit.files.len());
        for file in &commit.files {
            let item_path = format!("/{}", file.path);
            let change_type = if old_object_id != EMPTY_OBJECT_ID
                && self.item_exists(repo_name, &item_path, &commit.branch).await?
            {
                "edit"
            } else {
                "add"
            };
            changes.push(json!({
                "changeType": change_type,
                "item": { "path": item_path },
                "newContent": { "content": file.content, "contentType": "rawtext" },
            }));
        }

        let response = self
            .request(reqwest::Method::POST, &format!("/{}/pushes", repo_name))
            .json(&json!({
                "refUpdates": [{
                    "name": format!("refs/heads/{}", commit.branch),
                    "oldObjectId": old_object_id,
                }],
                "commits": [{
                    "comment": commit.message,
                    "author": { "name": commit.author_name, "email": commit.author_email },
                    "changes": changes,
                }],
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let body: serde_json::Value = response.json().await?;
        let hash = body["commits"][0]["commitId"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        debug!(repo = repo_name, hash = %hash, files = commit.files.len(), "Pushed files to Azure DevOps");
        Ok(hash)
    }
}
