// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Appstore State - Release State Store
//!
//! Relational persistence for chart installations managed by the application
//! store deployment engine. The deployment layer talks to the store only through
//! the [`Persistence`] trait; two backends are provided.
//!
//! # Entities
//!
//! ```text
//! app ──< installed_apps ──< installed_app_versions ──< installed_app_version_history
//!              │    │                                              │
//!              │    └──< chart_group_deployment                     └──< pipeline_status_timeline
//!              └──< cluster_installed_apps
//! ```
//!
//! | Table | Invariant |
//! |-------|-----------|
//! | `installed_apps` | one active row per `(app_id, environment_id)` |
//! | `installed_app_versions` | one active row per `installed_app_id` |
//! | `installed_app_version_history` | append-only; at most one non-terminal row per version after a supersede pass |
//! | `pipeline_status_timeline` | unique `(history_id, status)`; nothing is appended after a terminal status |
//!
//! # Backends
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`PostgresPersistence`] | production |
//! | [`SqlitePersistence`] | embedded deployments and tests |
//!
//! Migrations are embedded; see [`migrations`].

#![deny(missing_docs)]

/// Error types.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Entity records, status taxonomies and write requests.
pub mod models;

/// Persistence trait and backends.
pub mod persistence;

pub use error::{Result, StoreError};
pub use models::*;
pub use persistence::{Persistence, PostgresPersistence, SqlitePersistence};
