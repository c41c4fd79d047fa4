// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitOps repository service: naming, creation, chart pushes and values commits.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{CommitFile, CommitRequest, CreateRepoRequest, DEFAULT_BRANCH, GitError, GitProvider};
use crate::config::GitOpsConfig;
use crate::engine::EngineAdapter;
use crate::error::{Error, Result};
use crate::manifest::{ChartManifest, REQUIREMENTS_YAML_FILE, VALUES_YAML_FILE};

/// Repository name encoded in a clone URL: the last path segment without `.git`.
pub fn repo_name_from_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

/// A single-file commit into an installation's chart directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    /// File name inside the chart directory.
    pub file_name: String,
    /// File content.
    pub file_content: String,
    /// Umbrella chart name (the app name).
    pub chart_name: String,
    /// Chart directory inside the repository (`{appName}-{envName}`).
    pub chart_location: String,
    /// Repository name.
    pub chart_repo_name: String,
    /// Branch committed to.
    pub target_revision: String,
    /// Commit message.
    pub release_message: String,
    /// Commit author email.
    pub user_email_id: String,
    /// Commit author name.
    pub user_name: String,
}

/// Where an installation's chart lives in its GitOps repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartCommitTarget {
    /// App name.
    pub app_name: String,
    /// Environment name.
    pub environment_name: String,
    /// Environment id.
    pub environment_id: i64,
    /// Catalog chart version id.
    pub app_store_application_version_id: i64,
    /// Repository clone URL.
    pub repo_url: String,
}

impl ChartCommitTarget {
    /// Chart directory inside the repository.
    pub fn chart_location(&self) -> String {
        format!("{}-{}", self.app_name, self.environment_name)
    }

    /// Commit message of releases of this target.
    pub fn release_message(&self) -> String {
        format!(
            "release-{}-env-{} ",
            self.app_store_application_version_id, self.environment_id
        )
    }
}

/// Chart push request.
#[derive(Debug, Clone)]
pub struct PushChartRequest {
    /// Chart location.
    pub target: ChartCommitTarget,
    /// Include `requirements.yaml` and `values.yaml` in the push (new repositories).
    pub include_values: bool,
}

/// Where a pushed chart landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartGitAttribute {
    /// Repository clone URL.
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// Chart directory inside the repository.
    pub chart_location: String,
}

/// GitOps repository service.
pub struct GitOpsRepoService {
    provider: Arc<dyn GitProvider>,
    repo_prefix: String,
    author_name: String,
    author_email: String,
}

impl GitOpsRepoService {
    /// Create a service over `provider` with the configured naming and author.
    pub fn new(provider: Arc<dyn GitProvider>, config: &GitOpsConfig) -> Self {
        Self::with_author(
            provider,
            &config.repo_prefix,
            &config.username,
            &config.email,
        )
    }

    /// Create a service with explicit naming and author settings.
    pub fn with_author(
        provider: Arc<dyn GitProvider>,
        repo_prefix: &str,
        author_name: &str,
        author_email: &str,
    ) -> Self {
        Self {
            provider,
            repo_prefix: repo_prefix.to_string(),
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
        }
    }

    /// Underlying provider.
    pub fn provider(&self) -> &Arc<dyn GitProvider> {
        &self.provider
    }

    /// Repository name generated for an app under the current naming scheme.
    pub fn gitops_repo_name(&self, app_name: &str) -> String {
        if self.repo_prefix.is_empty() {
            app_name.to_string()
        } else {
            format!("{}-{}", self.repo_prefix, app_name)
        }
    }

    /// Whether `err` means the repository is missing on the provider.
    pub fn is_repo_missing(&self, err: &GitError) -> bool {
        self.provider.is_repo_missing(err)
    }

    /// Create the repository if needed. Returns `(url, is_new)`.
    ///
    /// An existing repository is reused. A new repository gets a README commit
    /// so later pushes have a branch to land on.
    pub async fn create_repository(
        &self,
        name: &str,
        description: &str,
    ) -> std::result::Result<(String, bool), GitError> {
        if let Some(url) = self.provider.repository_url(name).await? {
            debug!(repo = name, url = %url, "GitOps repository already exists");
            return Ok((url, false));
        }

        let url = self
            .provider
            .create_repository(&CreateRepoRequest {
                name: name.to_string(),
                description: description.to_string(),
            })
            .await?;
        self.provider
            .commit_files(
                name,
                &self.commit_request(
                    "Initial commit",
                    vec![CommitFile {
                        path: "README.md".to_string(),
                        content: format!("# {}\n\n{}\n", name, description),
                    }],
                ),
            )
            .await?;
        info!(repo = name, url = %url, "Created GitOps repository");
        Ok((url, true))
    }

    /// Single-file commit config for a chart target.
    pub fn chart_config(
        &self,
        target: &ChartCommitTarget,
        file_name: &str,
        file_content: &str,
    ) -> ChartConfig {
        ChartConfig {
            file_name: file_name.to_string(),
            file_content: file_content.to_string(),
            chart_name: target.app_name.clone(),
            chart_location: target.chart_location(),
            chart_repo_name: repo_name_from_url(&target.repo_url),
            target_revision: DEFAULT_BRANCH.to_string(),
            release_message: target.release_message(),
            user_email_id: self.author_email.clone(),
            user_name: self.author_name.clone(),
        }
    }

    /// Commit one file into a chart directory and return the commit hash.
    ///
    /// Provider errors are returned unwrapped so callers can recognise a
    /// missing repository.
    pub async fn commit_values(&self, config: &ChartConfig) -> std::result::Result<String, GitError> {
        let commit = CommitRequest {
            branch: config.target_revision.clone(),
            message: config.release_message.clone(),
            files: vec![CommitFile {
                path: format!("{}/{}", config.chart_location, config.file_name),
                content: config.file_content.clone(),
            }],
            author_name: config.user_name.clone(),
            author_email: config.user_email_id.clone(),
        };
        self.provider
            .commit_files(&config.chart_repo_name, &commit)
            .await
    }

    /// Push the built chart tree into the chart directory.
    pub async fn push_chart(
        &self,
        request: &PushChartRequest,
        manifest: &ChartManifest,
    ) -> Result<(ChartGitAttribute, String)> {
        let chart_location = request.target.chart_location();
        let mut files: Vec<CommitFile> = manifest
            .chart_files()?
            .into_iter()
            .map(|file| CommitFile {
                path: format!("{}/{}", chart_location, file.path),
                content: file.content,
            })
            .collect();
        if request.include_values {
            files.push(CommitFile {
                path: format!("{}/{}", chart_location, REQUIREMENTS_YAML_FILE),
                content: manifest.requirements_config.clone(),
            });
            files.push(CommitFile {
                path: format!("{}/{}", chart_location, VALUES_YAML_FILE),
                content: manifest.values_config.clone(),
            });
        }

        let repo_name = repo_name_from_url(&request.target.repo_url);
        let hash = self
            .provider
            .commit_files(
                &repo_name,
                &self.commit_request(&request.target.release_message(), files),
            )
            .await?;
        debug!(repo = %repo_name, chart_location = %chart_location, hash = %hash, "Pushed chart");
        Ok((
            ChartGitAttribute {
                repo_url: request.target.repo_url.clone(),
                chart_location,
            },
            hash,
        ))
    }

    /// Register a repository with the deployment engine.
    pub async fn register_repo_with_engine(
        &self,
        engine: &EngineAdapter,
        token: &str,
        repo_url: &str,
    ) -> Result<()> {
        engine.register_repo_with_retry(token, repo_url).await?;
        Ok(())
    }

    /// Check a user-supplied repository URL. Returns `(sanitized_url, is_new)`.
    pub async fn validate_custom_repo_url(&self, url: &str) -> Result<(String, bool)> {
        let sanitized = url.trim().trim_end_matches('/').to_string();
        let parsed = url::Url::parse(&sanitized).map_err(|_| {
            Error::Validation(format!("Invalid request! invalid git repository url '{}'", url))
        })?;

        let expected_host = self.provider.clone_host();
        if parsed.host_str() != Some(expected_host.as_str()) {
            return Err(Error::Validation(format!(
                "Invalid request! git repository url '{}' does not belong to the configured {} provider ({})",
                sanitized,
                self.provider.kind(),
                expected_host
            )));
        }

        let name = repo_name_from_url(&sanitized);
        match self.provider.repository_url(&name).await {
            Ok(Some(_)) => Ok((sanitized, false)),
            Ok(None) => Err(Error::Validation(format!(
                "Invalid request! git repository '{}' is not reachable",
                sanitized
            ))),
            Err(err) => {
                warn!(url = %sanitized, error = %err, "Failed to validate custom repository");
                Err(Error::Validation(format!(
                    "Invalid request! git repository '{}' could not be validated: {}",
                    sanitized, err
                )))
            }
        }
    }

    fn commit_request(&self, message: &str, files: Vec<CommitFile>) -> CommitRequest {
        CommitRequest {
            branch: DEFAULT_BRANCH.to_string(),
            message: message.to_string(),
            files,
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
        }
    }
}
