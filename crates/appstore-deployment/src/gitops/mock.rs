// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory Git provider for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha1::{Digest, Sha1};

use super::{BITBUCKET_REPO_NOT_FOUND_ERROR, CommitRequest, CreateRepoRequest, GitError, GitProvider};
use crate::config::GitProviderKind;

/// A commit recorded by [`MockGitProvider`].
#[derive(Debug, Clone)]
pub struct MockCommit {
    /// Commit hash.
    pub hash: String,
    /// Commit message.
    pub message: String,
    /// Paths written, in request order.
    pub paths: Vec<String>,
}

#[derive(Debug, Default)]
struct MockRepository {
    url: String,
    files: BTreeMap<String, String>,
    commits: Vec<MockCommit>,
}

#[derive(Debug, Default)]
struct MockState {
    repositories: HashMap<String, MockRepository>,
    created: Vec<String>,
    commit_failure: Option<String>,
    commit_calls: usize,
}

/// Mock Git provider keeping repositories in memory.
#[derive(Clone)]
pub struct MockGitProvider {
    kind: GitProviderKind,
    organization: String,
    state: Arc<Mutex<MockState>>,
}

impl MockGitProvider {
    /// Create a GitHub-flavoured mock for the `acme` organisation.
    pub fn new() -> Self {
        Self::with_kind(GitProviderKind::GitHub)
    }

    /// Create a mock reporting errors the way `kind` does.
    pub fn with_kind(kind: GitProviderKind) -> Self {
        Self {
            kind,
            organization: "acme".to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, GitError> {
        self.state
            .lock()
            .map_err(|e| GitError::Transport(format!("mock state poisoned: {}", e)))
    }

    fn url_for(&self, name: &str) -> String {
        format!("https://{}/{}/{}.git", self.clone_host(), self.organization, name)
    }

    fn missing_repo_error(&self) -> GitError {
        match self.kind {
            GitProviderKind::GitHub => GitError::GitHub {
                status: 404,
                message: "Not Found".to_string(),
            },
            GitProviderKind::GitLab => GitError::GitLab {
                status: 404,
                message: "404 Project Not Found".to_string(),
            },
            GitProviderKind::Azure => GitError::Azure {
                status_code: Some(404),
                message: "TF401019: The Git repository does not exist".to_string(),
            },
            GitProviderKind::Bitbucket => {
                GitError::Bitbucket(BITBUCKET_REPO_NOT_FOUND_ERROR.to_string())
            }
        }
    }

    /// Add an existing repository.
    pub fn add_repository(&self, name: &str) -> String {
        let url = self.url_for(name);
        if let Ok(mut state) = self.lock() {
            state.repositories.insert(
                name.to_string(),
                MockRepository {
                    url: url.clone(),
                    ..Default::default()
                },
            );
        }
        url
    }

    /// Remove a repository, as if it was deleted on the provider.
    pub fn delete_repository(&self, name: &str) {
        if let Ok(mut state) = self.lock() {
            state.repositories.remove(name);
        }
    }

    /// Make every subsequent commit fail with a transport error.
    pub fn fail_commits(&self, message: &str) {
        if let Ok(mut state) = self.lock() {
            state.commit_failure = Some(message.to_string());
        }
    }

    /// Whether the repository exists.
    pub fn has_repository(&self, name: &str) -> bool {
        self.lock()
            .map(|s| s.repositories.contains_key(name))
            .unwrap_or(false)
    }

    /// Names passed to `create_repository`, in call order.
    pub fn created_repositories(&self) -> Vec<String> {
        self.lock().map(|s| s.created.clone()).unwrap_or_default()
    }

    /// Commits of a repository, oldest first.
    pub fn commits(&self, name: &str) -> Vec<MockCommit> {
        self.lock()
            .ok()
            .and_then(|s| s.repositories.get(name).map(|r| r.commits.clone()))
            .unwrap_or_default()
    }

    /// Current content of a file.
    pub fn file(&self, name: &str, path: &str) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|s| s.repositories.get(name).and_then(|r| r.files.get(path).cloned()))
    }

    /// Number of `commit_files` calls, including failed ones.
    pub fn commit_calls(&self) -> usize {
        self.lock().map(|s| s.commit_calls).unwrap_or(0)
    }
}

impl Default for MockGitProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitProvider for MockGitProvider {
    fn kind(&self) -> GitProviderKind {
        self.kind
    }

    fn clone_host(&self) -> String {
        match self.kind {
            GitProviderKind::GitHub => "github.com",
            GitProviderKind::GitLab => "gitlab.com",
            GitProviderKind::Bitbucket => "bitbucket.org",
            GitProviderKind::Azure => "dev.azure.com",
        }
        .to_string()
    }

    async fn repository_url(&self, name: &str) -> Result<Option<String>, GitError> {
        Ok(self.lock()?.repositories.get(name).map(|r| r.url.clone()))
    }

    async fn create_repository(&self, request: &CreateRepoRequest) -> Result<String, GitError> {
        let url = self.url_for(&request.name);
        let mut state = self.lock()?;
        state.created.push(request.name.clone());
        state
            .repositories
            .entry(request.name.clone())
            .or_insert_with(|| MockRepository {
                url: url.clone(),
                ..Default::default()
            });
        Ok(url)
    }

    async fn commit_files(
        &self,
        repo_name: &str,
        commit: &CommitRequest,
    ) -> Result<String, GitError> {
        let missing = self.missing_repo_error();
        let mut state = self.lock()?;
        state.commit_calls += 1;
        if let Some(message) = &state.commit_failure {
            return Err(GitError::Transport(message.clone()));
        }
        let calls = state.commit_calls;
        let repository = match state.repositories.get_mut(repo_name) {
            Some(repository) => repository,
            None => return Err(missing),
        };

        let mut hasher = Sha1::new();
        hasher.update(repo_name.as_bytes());
        hasher.update(commit.message.as_bytes());
        hasher.update(calls.to_string().as_bytes());
        let hash = hex::encode(hasher.finalize());

        for file in &commit.files {
            repository
                .files
                .insert(file.path.clone(), file.content.clone());
        }
        repository.commits.push(MockCommit {
            hash: hash.clone(),
            message: commit.message.clone(),
            paths: commit.files.iter().map(|f| f.path.clone()).collect(),
        });
        Ok(hash)
    }
}
