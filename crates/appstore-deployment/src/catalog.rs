// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only views of the chart catalog and the environment inventory.
//!
//! The deployment engine never writes these tables. [`PgCatalog`] reads them
//! from the shared database; [`InMemoryCatalog`] backs tests and embedders that
//! keep the inventory elsewhere.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use appstore_state::ReferenceValueKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{Error, Result};

/// Where a chart is hosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChartOrigin {
    /// Classic HTTP chart repository.
    Repository {
        /// Repository name.
        name: String,
        /// Repository URL.
        url: String,
        /// Basic auth username.
        username: Option<String>,
        /// Basic auth password.
        password: Option<String>,
        /// Whether the repository is enabled.
        active: bool,
    },
    /// OCI registry.
    Oci {
        /// Registry (artifact store) id.
        registry_id: String,
        /// Registry URL, with or without scheme.
        registry_url: String,
        /// Registry username.
        username: Option<String>,
        /// Registry password.
        password: Option<String>,
    },
}

/// A chart version from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartVersion {
    /// Catalog chart version id.
    pub id: i64,
    /// Catalog chart id.
    pub app_store_id: i64,
    /// Chart name.
    pub chart_name: String,
    /// Chart version.
    pub version: String,
    /// Chart default values.
    pub default_values_yaml: String,
    /// JSON schema of the values, when published.
    pub values_schema_json: Option<String>,
    /// Where the chart is hosted.
    pub origin: ChartOrigin,
}

impl ChartVersion {
    /// Whether the chart is served from an OCI registry.
    pub fn is_oci(&self) -> bool {
        matches!(self.origin, ChartOrigin::Oci { .. })
    }
}

/// A deployment target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Environment id.
    pub id: i64,
    /// Environment name.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Cluster id.
    pub cluster_id: i64,
    /// Cluster name.
    pub cluster_name: String,
    /// Cluster API server URL.
    pub cluster_server_url: String,
    /// Virtual environments are never applied to a cluster.
    pub is_virtual: bool,
}

/// Chart catalog reader.
#[async_trait]
pub trait ChartCatalog: Send + Sync {
    /// Look up a chart version.
    async fn chart_version(&self, id: i64) -> Result<Option<ChartVersion>>;

    /// Values a user started from.
    async fn reference_values(&self, kind: ReferenceValueKind, id: i64) -> Result<Option<String>>;

    /// Whether charts can be pulled from the OCI registry.
    async fn is_oci_pull_active(&self, registry_id: &str) -> Result<bool>;
}

/// Environment inventory reader.
#[async_trait]
pub trait EnvironmentReader: Send + Sync {
    /// Look up an environment.
    async fn environment(&self, id: i64) -> Result<Option<EnvironmentInfo>>;

    /// Whether the cluster's API server is reachable.
    async fn is_cluster_reachable(&self, cluster_id: i64) -> Result<bool>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

/// Catalog and environment reader over the shared PostgreSQL database.
pub struct PgCatalog {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ChartVersionRow {
    id: i64,
    app_store_id: i64,
    chart_name: String,
    version: String,
    values_yaml: String,
    values_schema_json: Option<String>,
    repo_name: Option<String>,
    repo_url: Option<String>,
    repo_username: Option<String>,
    repo_password: Option<String>,
    repo_active: Option<bool>,
    registry_id: Option<String>,
    registry_url: Option<String>,
    registry_username: Option<String>,
    registry_password: Option<String>,
}

impl ChartVersionRow {
    fn into_chart_version(self) -> Result<ChartVersion> {
        let origin = match (self.repo_url, self.registry_id, self.registry_url) {
            (Some(url), _, _) => ChartOrigin::Repository {
                name: self.repo_name.unwrap_or_default(),
                url,
                username: self.repo_username,
                password: self.repo_password,
                active: self.repo_active.unwrap_or(false),
            },
            (None, Some(registry_id), Some(registry_url)) => ChartOrigin::Oci {
                registry_id,
                registry_url,
                username: self.registry_username,
                password: self.registry_password,
            },
            _ => {
                return Err(Error::Internal(format!(
                    "chart version {} has neither a chart repository nor a registry",
                    self.id
                )));
            }
        };
        Ok(ChartVersion {
            id: self.id,
            app_store_id: self.app_store_id,
            chart_name: self.chart_name,
            version: self.version,
            default_values_yaml: self.values_yaml,
            values_schema_json: self.values_schema_json,
            origin,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EnvironmentRow {
    id: i64,
    environment_name: String,
    namespace: String,
    cluster_id: i64,
    cluster_name: String,
    server_url: String,
    is_virtual_environment: bool,
    is_virtual_cluster: bool,
}

impl PgCatalog {
    /// Create a reader over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChartCatalog for PgCatalog {
    async fn chart_version(&self, id: i64) -> Result<Option<ChartVersion>> {
        let row = sqlx::query_as::<_, ChartVersionRow>(
            r#"
            SELECT v.id, v.app_store_id, s.name AS chart_name, v.version, v.values_yaml,
                   v.values_schema_json,
                   r.name AS repo_name, r.url AS repo_url, r.user_name AS repo_username,
                   r.password AS repo_password, r.active AS repo_active,
                   d.id AS registry_id, d.registry_url, d.username AS registry_username,
                   d.password AS registry_password
            FROM app_store_application_version v
            JOIN app_store s ON s.id = v.app_store_id
            LEFT JOIN chart_repo r ON r.id = s.chart_repo_id
            LEFT JOIN docker_artifact_store d ON d.id = s.docker_artifact_store_id
            WHERE v.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ChartVersionRow::into_chart_version).transpose()
    }

    async fn reference_values(&self, kind: ReferenceValueKind, id: i64) -> Result<Option<String>> {
        let query = match kind {
            ReferenceValueKind::Default => {
                "SELECT values_yaml FROM app_store_application_version WHERE id = $1"
            }
            ReferenceValueKind::Template => {
                "SELECT values_yaml FROM app_store_version_values WHERE id = $1 AND deleted = FALSE"
            }
            ReferenceValueKind::Deployed | ReferenceValueKind::Existing => {
                "SELECT values_yaml_raw FROM installed_app_versions WHERE id = $1"
            }
        };
        let values: Option<String> = sqlx::query_scalar(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(values)
    }

    async fn is_oci_pull_active(&self, registry_id: &str) -> Result<bool> {
        let active: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT pull_active AND active AND is_oci_chart_provider
            FROM docker_artifact_store
            WHERE id = $1
            "#,
        )
        .bind(registry_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(active.unwrap_or(false))
    }
}

#[async_trait]
impl EnvironmentReader for PgCatalog {
    async fn environment(&self, id: i64) -> Result<Option<EnvironmentInfo>> {
        let row = sqlx::query_as::<_, EnvironmentRow>(
            r#"
            SELECT e.id, e.environment_name, e.namespace, e.cluster_id, c.cluster_name,
                   c.server_url, e.is_virtual_environment, c.is_virtual_cluster
            FROM environment e
            JOIN cluster c ON c.id = e.cluster_id
            WHERE e.id = $1 AND e.active = TRUE
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| EnvironmentInfo {
            id: row.id,
            name: row.environment_name,
            namespace: row.namespace,
            cluster_id: row.cluster_id,
            cluster_name: row.cluster_name,
            cluster_server_url: row.server_url,
            is_virtual: row.is_virtual_environment || row.is_virtual_cluster,
        }))
    }

    async fn is_cluster_reachable(&self, cluster_id: i64) -> Result<bool> {
        let error: Option<Option<String>> =
            sqlx::query_scalar("SELECT error_in_connecting FROM cluster WHERE id = $1")
                .bind(cluster_id)
                .fetch_optional(&self.pool)
                .await?;
        match error {
            Some(err) => Ok(err.map(|e| e.is_empty()).unwrap_or(true)),
            None => Err(Error::NotFound(format!("cluster {} not found", cluster_id))),
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
struct InMemoryState {
    charts: HashMap<i64, ChartVersion>,
    reference_values: HashMap<(ReferenceValueKind, i64), String>,
    oci_pull_active: HashMap<String, bool>,
    environments: HashMap<i64, EnvironmentInfo>,
    unreachable_clusters: Vec<i64>,
}

/// In-memory catalog and environment inventory.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut InMemoryState) -> R) -> Result<R> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| Error::Internal(format!("catalog lock poisoned: {}", e)))?;
        Ok(f(&mut state))
    }

    /// Add or replace a chart version.
    pub fn add_chart(&self, chart: ChartVersion) {
        let _ = self.with_state(|s| {
            if let ChartOrigin::Oci { registry_id, .. } = &chart.origin {
                s.oci_pull_active.entry(registry_id.clone()).or_insert(true);
            }
            s.charts.insert(chart.id, chart)
        });
    }

    /// Add or replace reference values.
    pub fn add_reference_values(&self, kind: ReferenceValueKind, id: i64, values: &str) {
        let _ = self.with_state(|s| s.reference_values.insert((kind, id), values.to_string()));
    }

    /// Set whether an OCI registry allows pulls.
    pub fn set_oci_pull_active(&self, registry_id: &str, active: bool) {
        let _ = self.with_state(|s| s.oci_pull_active.insert(registry_id.to_string(), active));
    }

    /// Add or replace an environment.
    pub fn add_environment(&self, environment: EnvironmentInfo) {
        let _ = self.with_state(|s| s.environments.insert(environment.id, environment));
    }

    /// Mark a cluster unreachable (or reachable again).
    pub fn set_cluster_reachable(&self, cluster_id: i64, reachable: bool) {
        let _ = self.with_state(|s| {
            s.unreachable_clusters.retain(|id| *id != cluster_id);
            if !reachable {
                s.unreachable_clusters.push(cluster_id);
            }
        });
    }
}

#[async_trait]
impl ChartCatalog for InMemoryCatalog {
    async fn chart_version(&self, id: i64) -> Result<Option<ChartVersion>> {
        self.with_state(|s| s.charts.get(&id).cloned())
    }

    async fn reference_values(&self, kind: ReferenceValueKind, id: i64) -> Result<Option<String>> {
        self.with_state(|s| {
            s.reference_values.get(&(kind, id)).cloned().or_else(|| {
                (kind == ReferenceValueKind::Default)
                    .then(|| s.charts.get(&id).map(|c| c.default_values_yaml.clone()))
                    .flatten()
            })
        })
    }

    async fn is_oci_pull_active(&self, registry_id: &str) -> Result<bool> {
        self.with_state(|s| s.oci_pull_active.get(registry_id).copied().unwrap_or(false))
    }
}

#[async_trait]
impl EnvironmentReader for InMemoryCatalog {
    async fn environment(&self, id: i64) -> Result<Option<EnvironmentInfo>> {
        self.with_state(|s| s.environments.get(&id).cloned())
    }

    async fn is_cluster_reachable(&self, cluster_id: i64) -> Result<bool> {
        self.with_state(|s| !s.unreachable_clusters.contains(&cluster_id))
    }
}
