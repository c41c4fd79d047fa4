// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GitOps repositories.
//!
//! [`GitProvider`] abstracts the hosted Git APIs (GitHub, GitLab, Bitbucket
//! Cloud, Azure DevOps); [`GitOpsRepoService`] implements repository naming,
//! creation, chart pushes and values commits on top of it.
//!
//! Providers report a missing repository with structurally different errors.
//! They are kept apart in [`GitError`] and recognised by
//! [`GitError::is_repo_missing`] so the upgrade path can recreate the repository.

pub mod azure;
pub mod bitbucket;
pub mod github;
pub mod gitlab;
pub mod mock;
pub mod service;

pub use azure::AzureDevOpsProvider;
pub use bitbucket::BitbucketProvider;
pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;
pub use mock::MockGitProvider;
pub use service::{
    ChartCommitTarget, ChartConfig, ChartGitAttribute, GitOpsRepoService, PushChartRequest,
    repo_name_from_url,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{GitOpsConfig, GitProviderKind};

/// Error message Bitbucket returns when a repository does not exist.
pub const BITBUCKET_REPO_NOT_FOUND_ERROR: &str = "404 Not Found";

/// Default branch of GitOps repositories.
pub const DEFAULT_BRANCH: &str = "master";

/// Git provider errors.
#[derive(Debug, Error)]
pub enum GitError {
    /// GitHub API error response.
    #[error("GitHub API error ({status}): {message}")]
    GitHub {
        /// HTTP status.
        status: u16,
        /// Error message.
        message: String,
    },

    /// GitLab API error response.
    #[error("GitLab API error ({status}): {message}")]
    GitLab {
        /// HTTP status.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Azure DevOps wrapped error.
    #[error("Azure DevOps error: {message}")]
    Azure {
        /// HTTP status, when the error carried one.
        status_code: Option<u16>,
        /// Error message.
        message: String,
    },

    /// Bitbucket error, reported as its message only.
    #[error("{0}")]
    Bitbucket(String),

    /// Request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// Repository URL could not be interpreted.
    #[error("invalid repository url '{0}'")]
    InvalidUrl(String),
}

impl GitError {
    /// Whether the provider reports the target repository as missing.
    pub fn is_repo_missing(&self) -> bool {
        match self {
            Self::GitHub { status, .. } | Self::GitLab { status, .. } => *status == 404,
            Self::Azure { status_code, .. } => *status_code == Some(404),
            Self::Bitbucket(message) => message == BITBUCKET_REPO_NOT_FOUND_ERROR,
            Self::Transport(_) | Self::InvalidUrl(_) => false,
        }
    }
}

impl From<reqwest::Error> for GitError {
    fn from(err: reqwest::Error) -> Self {
        GitError::Transport(err.to_string())
    }
}

/// Repository to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRepoRequest {
    /// Repository name.
    pub name: String,
    /// Repository description.
    pub description: String,
}

/// A file written by a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFile {
    /// Path inside the repository.
    pub path: String,
    /// File content.
    pub content: String,
}

/// One commit of one or more files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    /// Target branch.
    pub branch: String,
    /// Commit message.
    pub message: String,
    /// Files to create or replace.
    pub files: Vec<CommitFile>,
    /// Author name.
    pub author_name: String,
    /// Author email.
    pub author_email: String,
}

/// Hosted Git provider API.
#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Provider kind.
    fn kind(&self) -> GitProviderKind;

    /// Host clone URLs of this provider's repositories live on.
    fn clone_host(&self) -> String;

    /// Clone URL of an existing repository, or `None` when it does not exist.
    async fn repository_url(&self, name: &str) -> Result<Option<String>, GitError>;

    /// Create an empty repository and return its clone URL.
    async fn create_repository(&self, request: &CreateRepoRequest) -> Result<String, GitError>;

    /// Create or replace files in one commit and return the commit hash.
    async fn commit_files(&self, repo_name: &str, commit: &CommitRequest)
    -> Result<String, GitError>;

    /// Whether `err` means the repository is missing.
    fn is_repo_missing(&self, err: &GitError) -> bool {
        err.is_repo_missing()
    }
}

/// Build the HTTP provider selected by `config`.
pub fn provider_from_config(config: &GitOpsConfig) -> Result<Arc<dyn GitProvider>, GitError> {
    let client = http_client()?;
    let provider: Arc<dyn GitProvider> = match config.provider {
        GitProviderKind::GitHub => Arc::new(GitHubProvider::new(client, config)),
        GitProviderKind::GitLab => Arc::new(GitLabProvider::new(client, config)),
        GitProviderKind::Bitbucket => Arc::new(BitbucketProvider::new(client, config)),
        GitProviderKind::Azure => Arc::new(AzureDevOpsProvider::new(client, config)),
    };
    Ok(provider)
}

pub(crate) fn http_client() -> Result<reqwest::Client, GitError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?)
}

pub(crate) fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// Read an error body, preferring a JSON `message` (or `error.message`) field.
pub(crate) async fn error_message(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => json
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| {
                json.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
            })
            .map(|m| m.to_string())
            .unwrap_or(text),
        Err(_) => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_missing_per_provider_shape() {
        let missing = vec![
            GitError::GitHub {
                status: 404,
                message: "Not Found".to_string(),
            },
            GitError::GitLab {
                status: 404,
                message: "404 Project Not Found".to_string(),
            },
            GitError::Azure {
                status_code: Some(404),
                message: "TF401019".to_string(),
            },
            GitError::Bitbucket("404 Not Found".to_string()),
        ];
        for err in missing {
            assert!(err.is_repo_missing(), "{:?}", err);
        }

        let present = vec![
            GitError::GitHub {
                status: 409,
                message: "conflict".to_string(),
            },
            GitError::Azure {
                status_code: None,
                message: "boom".to_string(),
            },
            GitError::Bitbucket("404 Not Found: branch".to_string()),
            GitError::Transport("timeout".to_string()),
        ];
        for err in present {
            assert!(!err.is_repo_missing(), "{:?}", err);
        }
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://github.com/org/repo.git").as_deref(),
            Some("github.com")
        );
        assert_eq!(host_of("not a url"), None);
    }
}
