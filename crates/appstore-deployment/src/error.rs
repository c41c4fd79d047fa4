// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the deployment engine.

use std::time::Duration;

use appstore_state::StoreError;
use thiserror::Error;

use crate::chart_group::QueueError;
use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::gitops::GitError;
use crate::helm::HelmError;
use crate::manifest::ManifestError;

/// Result type for deployment operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the deployment engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Release state store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Catalog database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Git provider error.
    #[error("Git provider error: {0}")]
    Git(#[from] GitError),

    /// Deployment engine error.
    #[error("Deployment engine error: {0}")]
    Engine(#[from] EngineError),

    /// Helm service error.
    #[error("Helm error: {0}")]
    Helm(#[from] HelmError),

    /// Manifest generation error.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Bulk deploy queue error.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Request violates deployment policy.
    #[error("{0}")]
    Validation(String),

    /// GitOps deployment requested but no provider is configured.
    #[error("GitOps not configured")]
    GitOpsNotConfigured,

    /// Request conflicts with existing state.
    #[error("{0}")]
    Conflict(String),

    /// Entity not found.
    #[error("{0}")]
    NotFound(String),

    /// The engine app of an orphaned installation still exists.
    #[error("App Exist in argo, error in fetching resource tree")]
    EngineAppStillExists {
        /// Engine app name.
        name: String,
    },

    /// The request-level deadline elapsed.
    #[error("{operation} did not finish within {timeout:?}")]
    DeadlineExceeded {
        /// Operation name.
        operation: &'static str,
        /// Deadline.
        timeout: Duration,
    },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status the outer layer renders this error with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::GitOpsNotConfigured | Self::Yaml(_) => 400,
            Self::Manifest(ManifestError::InvalidValues(_)) => 400,
            Self::Conflict(_) => 409,
            Self::NotFound(_) => 404,
            Self::Store(err) if err.is_not_found() => 404,
            Self::Store(err) if err.is_conflict() => 409,
            Self::Store(StoreError::ValidationError { .. }) => 400,
            Self::Engine(EngineError::NotFound { .. }) => 404,
            Self::Engine(EngineError::Timeout { .. }) => 504,
            Self::Helm(HelmError::NotFound(_)) => 404,
            Self::DeadlineExceeded { .. } => 504,
            _ => 500,
        }
    }

    /// Stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::Store(err) => err.error_code(),
            Self::Database(_) => "DATABASE_ERROR",
            Self::Git(_) => "GIT_PROVIDER_ERROR",
            Self::Engine(EngineError::NotFound { .. }) => "ENGINE_APP_NOT_FOUND",
            Self::Engine(_) => "ENGINE_ERROR",
            Self::Helm(_) => "HELM_ERROR",
            Self::Manifest(_) => "MANIFEST_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "SERIALIZATION_ERROR",
            Self::Yaml(_) => "INVALID_YAML",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::GitOpsNotConfigured => "GITOPS_NOT_CONFIGURED",
            Self::Conflict(_) => "CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::EngineAppStillExists { .. } => "ENGINE_APP_EXISTS",
            Self::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message shown to the user. Internal failures are not echoed verbatim.
    pub fn user_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            Self::Store(StoreError::DatabaseError { .. }) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the error means the Git provider reports the repository as missing.
    pub fn is_git_repo_missing(&self) -> bool {
        matches!(self, Self::Git(err) if err.is_repo_missing())
    }
}
