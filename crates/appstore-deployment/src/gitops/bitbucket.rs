// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bitbucket Cloud provider (workspace repositories, src API).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use super::{CommitRequest, CreateRepoRequest, GitError, GitProvider, error_message, host_of};
use crate::config::{GitOpsConfig, GitProviderKind};

/// Bitbucket Cloud REST API client.
pub struct BitbucketProvider {
    client: reqwest::Client,
    api_url: String,
    workspace: String,
    project_key: String,
    username: String,
    token: String,
}

impl BitbucketProvider {
    /// Create a client for the configured workspace.
    pub fn new(client: reqwest::Client, config: &GitOpsConfig) -> Self {
        Self {
            client,
            api_url: config.host.trim_end_matches('/').to_string(),
            workspace: config.organization.clone(),
            project_key: config.project.clone(),
            username: config.username.clone(),
            token: config.token.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, repo_path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(
                method,
                format!(
                    "{}/2.0/repositories/{}/{}",
                    self.api_url, self.workspace, repo_path
                ),
            )
            .basic_auth(&self.username, Some(&self.token))
    }

    /// Bitbucket errors carry the status line only; a missing repository
    /// therefore reads exactly `404 Not Found`.
    async fn api_error(response: reqwest::Response) -> GitError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return GitError::Bitbucket(status.to_string());
        }
        GitError::Bitbucket(format!("{}: {}", status, error_message(response).await))
    }

    fn https_clone_url(body: &serde_json::Value) -> Option<String> {
        body["links"]["clone"].as_array().and_then(|links| {
            links
                .iter()
                .find(|link| link["name"] == "https")
                .and_then(|link| link["href"].as_str())
                .map(|href| href.to_string())
        })
    }
}

#[async_trait]
impl GitProvider for BitbucketProvider {
    fn kind(&self) -> GitProviderKind {
        GitProviderKind::Bitbucket
    }

    fn clone_host(&self) -> String {
        match host_of(&self.api_url) {
            Some(host) if host == "api.bitbucket.org" => "bitbucket.org".to_string(),
            Some(host) => host,
            None => "bitbucket.org".to_string(),
        }
    }

    async fn repository_url(&self, name: &str) -> Result<Option<String>, GitError> {
        let response = self.request(reqwest::Method::GET, name).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value = response.json().await?;
                Ok(Self::https_clone_url(&body))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn create_repository(&self, request: &CreateRepoRequest) -> Result<String, GitError> {
        let mut body = json!({
            "scm": "git",
            "is_private": true,
            "description": request.description,
        });
        if !self.project_key.is_empty() {
            body["project"] = json!({ "key": self.project_key });
        }
        let response = self
            .request(reqwest::Method::POST, &request.name)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let body: serde_json::Value = response.json().await?;
        Self::https_clone_url(&body).ok_or_else(|| {
            GitError::Bitbucket("repository response carries no https clone link".to_string())
        })
    }

    async fn commit_files(
        &self,
        repo_name: &str,
        commit: &CommitRequest,
    ) -> Result<String, GitError> {
        let mut form: Vec<(String, String)> = vec![
            ("message".to_string(), commit.message.clone()),
            ("branch".to_string(), commit.branch.clone()),
            (
                "author".to_string(),
                format!("{} <{}>", commit.author_name, commit.author_email),
            ),
        ];
        for file in &commit.files {
            form.push((format!("/{}", file.path), file.content.clone()));
        }

        let response = self
            .request(reqwest::Method::POST, &format!("{}/src", repo_name))
            .form(&form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let hash = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| location.rsplit('/').next())
            .unwrap_or_default()
            .to_string();
        debug!(repo = repo_name, hash = %hash, files = commit.files.len(), "Committed files to Bitbucket");
        Ok(hash)
    }
}
