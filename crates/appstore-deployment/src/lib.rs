// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application Store Deployment Engine
//!
//! Installs catalog charts into target environments and manages their
//! lifecycle: upgrade, rollback and delete. Every installation is deployed
//! through one of four backends and tracked as versioned release state in
//! [`appstore_state`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       AppStoreOrchestrator                        │
//! │  install · upgrade · rollback · delete · history · reconcile      │
//! └──────┬──────────────┬───────────────────┬────────────────┬───────┘
//!        │              │                   │                │
//!        ▼              ▼                   ▼                ▼
//!  ┌──────────┐  ┌─────────────┐  ┌──────────────────┐  ┌──────────┐
//!  │  GitOps  │  │    Helm     │  │ ManifestDownload │  │ Virtual  │
//!  │ backend  │  │  backend    │  │     backend      │  │ backend  │
//!  └──┬────┬──┘  └──────┬──────┘  └────────┬─────────┘  └────┬─────┘
//!     │    │            │                  │                 │
//!     ▼    ▼            ▼                  ▼                 ▼
//!  ┌─────┐ ┌────────┐ ┌──────────────────────────────────────────┐
//!  │ Git │ │ Engine │ │            Helm execution service         │
//!  └─────┘ └────────┘ └──────────────────────────────────────────┘
//!
//!            all paths record into the release state store
//!          (apps, installed apps, versions, history, timelines)
//! ```
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `install_app` | Validate, record rows in one transaction, run the backend |
//! | `update_installed_app` | Chart change or values-only upgrade of the active version |
//! | `rollback_application` | Redeploy the values and chart of an earlier history row |
//! | `delete_installed_app` | Full, partial (engine only) or non-cascade delete |
//! | `perform_deploy_stage` | Deploy one installation recorded by a bulk request |
//! | `get_deployment_history` | Successful deploys with their chart version |
//! | `mark_gitops_installed_apps_deleted_if_engine_app_is_deleted` | Orphan purge |
//!
//! # Installation Status
//!
//! ```text
//!   DEPLOY_INIT ──► ENQUEUED ──► GIT_SUCCESS ──► ACD_SUCCESS ──► DEPLOY_SUCCESS
//!        │             │              │               │
//!        └─────────────┴──────────────┴───────────────┴──► *_ERROR
//! ```
//!
//! A failed installation is resumed from the last phase that succeeded.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `APPSTORE_DATABASE_URL` | Yes | - | PostgreSQL connection string |
//! | `APPSTORE_INTEGRATION_MODE` | No | `full` | `full` or `helm` |
//! | `GITOPS_PROVIDER` | No | - | `github`, `gitlab`, `bitbucket` or `azure` |
//! | `ENGINE_URL` | No | - | Deployment engine API |
//! | `HELM_SERVICE_URL` | No | `http://127.0.0.1:50051` | Helm execution service |
//! | `ORCHESTRATION_TIMEOUT_SECS` | No | `60` | Request deadline |
//! | `APPSTORE_RECONCILER_POLL_INTERVAL_SECS` | No | `300` | Orphan purge interval |
//!
//! See [`Config::from_env`] for the full list.
//!
//! # Modules
//!
//! - [`backend`]: The four deployment backends
//! - [`catalog`]: Chart catalog and environment lookups
//! - [`chart_group`]: Bulk installs and their queue
//! - [`config`]: Configuration from environment variables
//! - [`engine`]: Deployment engine client and adapter
//! - [`gitops`]: Git providers and the GitOps repository service
//! - [`helm`]: Helm execution service client
//! - [`manifest`]: Chart tree and archive building
//! - [`orchestrator`]: Install, upgrade, rollback and delete flows
//! - [`timeline`]: Deployment timeline writer
//! - [`validation`]: Request validation and backend selection

#![deny(missing_docs)]

/// The four deployment backends (GitOps, Helm, ManifestDownload, Virtual).
pub mod backend;

/// Background worker deploying bulk installations.
pub mod bulk_deploy_worker;

/// Chart catalog and environment lookups.
pub mod catalog;

/// Chart group and default cluster component installs.
pub mod chart_group;

/// Configuration loaded from environment variables.
pub mod config;

/// Deployment engine (Argo CD) client and adapter.
pub mod engine;

/// Error types for deployment operations.
pub mod error;

/// Git providers and the GitOps repository service.
pub mod gitops;

/// Helm execution service client.
pub mod helm;

/// Chart tree, values and archive building.
pub mod manifest;

/// Install, upgrade, rollback and delete orchestration.
pub mod orchestrator;

/// Background worker purging installations whose engine app is gone.
pub mod reconciler_worker;

/// Embeddable runtime for the deployment engine.
pub mod runtime;

/// Deployment timeline writer.
pub mod timeline;

/// Request validation and backend selection.
pub mod validation;

pub use config::Config;
pub use error::{Error, Result};
