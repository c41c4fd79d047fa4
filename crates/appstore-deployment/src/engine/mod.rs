// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment engine (declarative sync engine) integration.
//!
//! The engine holds one app object per GitOps installation. The object points
//! at the installation's chart directory in its GitOps repository and at the
//! target cluster and namespace; the engine reconciles the cluster to it.
//!
//! - [`EngineApi`] is the raw CRUD surface; [`ArgoEngineClient`] speaks the
//!   Argo-CD style REST API and [`MockEngine`] keeps objects in memory.
//! - [`EngineAdapter`] adds per-call deadlines, sync-mode reconciliation and
//!   the sync/refresh policy the orchestrator relies on.
//!
//! Every call takes the caller's auth token explicitly.

pub mod adapter;
pub mod argo;
pub mod mock;

pub use adapter::EngineAdapter;
pub use argo::ArgoEngineClient;
pub use mock::MockEngine;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace app objects are created in.
pub const ENGINE_APP_NAMESPACE: &str = "argocd";

/// Project app objects are created in.
pub const DEFAULT_PROJECT: &str = "default";

/// Deployment engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The app object does not exist.
    #[error("application '{name}' not found")]
    NotFound {
        /// App object name.
        name: String,
    },

    /// Non-success response.
    #[error("engine returned {status}: {message}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The per-call deadline elapsed.
    #[error("engine {operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// Deadline.
        timeout: Duration,
    },
}

impl EngineError {
    /// Whether the error is a missing app object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the call may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

/// App object metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    /// App object name.
    pub name: String,
    /// Namespace of the app object.
    #[serde(default)]
    pub namespace: String,
}

/// Helm parameters of a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSourceHelm {
    /// Values files, relative to the source path.
    #[serde(default)]
    pub value_files: Vec<String>,
}

/// Where the engine reads the desired state from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    /// Repository clone URL.
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    /// Chart directory inside the repository.
    pub path: String,
    /// Branch, tag or commit.
    pub target_revision: String,
    /// Helm parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<ApplicationSourceHelm>,
}

/// Target cluster and namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDestination {
    /// Cluster API server URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    /// Cluster name, used when the server URL is unknown.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Target namespace.
    #[serde(default)]
    pub namespace: String,
}

/// Automated sync options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicyAutomated {
    /// Delete resources no longer in the desired state.
    #[serde(default)]
    pub prune: bool,
    /// Revert drift made on the cluster.
    #[serde(default)]
    pub self_heal: bool,
}

/// Sync policy; `automated: None` means manual sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Automated sync options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated: Option<SyncPolicyAutomated>,
}

/// Desired state of an app object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Source.
    pub source: ApplicationSource,
    /// Destination.
    pub destination: ApplicationDestination,
    /// Project.
    #[serde(default)]
    pub project: String,
    /// Sync policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<SyncPolicy>,
}

/// Status reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    /// Sync status.
    #[serde(default)]
    pub sync: StatusField,
    /// Health status.
    #[serde(default)]
    pub health: StatusField,
}

/// A `{ "status": "..." }` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusField {
    /// Status string, e.g. `Synced` or `Healthy`.
    #[serde(default)]
    pub status: String,
}

/// App object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Metadata.
    pub metadata: ApplicationMetadata,
    /// Desired state.
    pub spec: ApplicationSpec,
    /// Reported status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ApplicationStatus>,
}

impl Application {
    /// Whether automated sync is enabled on the object.
    pub fn is_auto_sync(&self) -> bool {
        self.spec
            .sync_policy
            .as_ref()
            .is_some_and(|policy| policy.automated.is_some())
    }

    /// Switch between automated and manual sync.
    pub fn set_auto_sync(&mut self, enabled: bool) {
        self.spec.sync_policy = Some(SyncPolicy {
            automated: enabled.then_some(SyncPolicyAutomated {
                prune: true,
                self_heal: true,
            }),
        });
    }
}

/// Inputs of a new app object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTemplate {
    /// App object name (`{appName}-{envName}`).
    pub name: String,
    /// Repository clone URL.
    pub repo_url: String,
    /// Chart directory inside the repository.
    pub chart_location: String,
    /// Branch to track.
    pub target_revision: String,
    /// Target cluster API server URL.
    pub target_server: String,
    /// Target namespace.
    pub target_namespace: String,
    /// Values file of the chart directory.
    pub value_file: String,
    /// Enable automated sync.
    pub auto_sync: bool,
}

impl AppTemplate {
    /// Build the app object.
    pub fn to_application(&self) -> Application {
        let mut application = Application {
            metadata: ApplicationMetadata {
                name: self.name.clone(),
                namespace: ENGINE_APP_NAMESPACE.to_string(),
            },
            spec: ApplicationSpec {
                source: ApplicationSource {
                    repo_url: self.repo_url.clone(),
                    path: self.chart_location.clone(),
                    target_revision: self.target_revision.clone(),
                    helm: Some(ApplicationSourceHelm {
                        value_files: vec![self.value_file.clone()],
                    }),
                },
                destination: ApplicationDestination {
                    server: self.target_server.clone(),
                    name: String::new(),
                    namespace: self.target_namespace.clone(),
                },
                project: DEFAULT_PROJECT.to_string(),
                sync_policy: None,
            },
            status: None,
        };
        application.set_auto_sync(self.auto_sync);
        application
    }
}

/// Raw deployment engine API.
#[async_trait]
pub trait EngineApi: Send + Sync {
    /// Fetch an app object.
    async fn get(&self, token: &str, name: &str) -> Result<Application, EngineError>;

    /// Create (or upsert) an app object.
    async fn create(&self, token: &str, application: &Application)
    -> Result<Application, EngineError>;

    /// Replace the spec of an app object.
    async fn update(&self, token: &str, application: &Application)
    -> Result<Application, EngineError>;

    /// Apply a JSON merge patch to an app object.
    async fn patch(
        &self,
        token: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Application, EngineError>;

    /// Delete an app object, with or without its cluster resources.
    async fn delete(&self, token: &str, name: &str, cascade: bool) -> Result<(), EngineError>;

    /// Trigger a sync to `revision`.
    async fn sync(&self, token: &str, name: &str, revision: &str) -> Result<(), EngineError>;

    /// Ask the engine to re-read the source and return the refreshed object.
    async fn refresh(&self, token: &str, name: &str) -> Result<Application, EngineError>;

    /// Register a repository (idempotent).
    async fn register_repo(&self, token: &str, repo_url: &str) -> Result<(), EngineError>;
}
