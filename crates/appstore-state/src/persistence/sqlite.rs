// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.
//!
//! Used by embedded deployments and by the test suites. Parameters use the
//! numbered `?N` form so a value can be referenced more than once.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{SqliteConnection, SqlitePool};

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::models::{
    AppRecord, AppstoreDeploymentStatus, ChartGroupDeploymentRecord, ClusterInstalledAppRecord,
    CreatedInstallation, DEPLOYMENT_SUPERSEDED_DETAIL, HelmReleaseStatusConfig, HistoryStatus,
    HistoryTransition, InstallationDraft, InstallationHistoryRow, InstalledAppRecord,
    InstalledAppVersionHistoryRecord, InstalledAppVersionRecord, NewApp, NewTimeline,
    PreparedRollback, PreparedUpgrade, ReferenceValueKind, RollbackDraft, TimelineEntry,
    TimelineRecord, TimelineStatus, UpgradeDraft, VersionChange, VersionRestore,
    group_installation_id,
};

use super::Persistence;

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and run migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| StoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        crate::migrations::SQLITE
            .run(&pool)
            .await
            .map_err(|e| StoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ============================================================================
// Connection-level helpers (shared by transactional operations)
// ============================================================================

async fn insert_timeline(conn: &mut SqliteConnection, timeline: &NewTimeline) -> Result<bool> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO pipeline_status_timeline
            (installed_app_version_history_id, status, status_detail, status_time,
             created_by, created_on, updated_by, updated_on)
        SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?5, ?6
        WHERE NOT EXISTS (
            SELECT 1 FROM pipeline_status_timeline
            WHERE installed_app_version_history_id = ?1
              AND status IN ('DEPLOYMENT_SUCCEEDED', 'DEPLOYMENT_FAILED', 'DEPLOYMENT_ABORTED',
                             'HEALTHY', 'DEPLOYMENT_SUPERSEDED')
        )
        "#,
    )
    .bind(timeline.history_id)
    .bind(timeline.status.as_str())
    .bind(&timeline.detail)
    .bind(timeline.status_time)
    .bind(timeline.user_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let stored = result.rows_affected() > 0;
    if !stored {
        debug!(
            history_id = timeline.history_id,
            status = %timeline.status.as_str(),
            "Timeline dropped: duplicate status or closed timeline"
        );
    }
    Ok(stored)
}

async fn insert_entries(
    conn: &mut SqliteConnection,
    history_id: i64,
    entries: &[TimelineEntry],
    user_id: i32,
) -> Result<()> {
    for entry in entries {
        let timeline = NewTimeline::now(history_id, entry.clone(), user_id);
        insert_timeline(&mut *conn, &timeline).await?;
    }
    Ok(())
}

async fn fetch_installed_app(
    conn: &mut SqliteConnection,
    installed_app_id: i64,
) -> Result<Option<InstalledAppRecord>> {
    let record = sqlx::query_as::<_, InstalledAppRecord>(
        r#"
        SELECT * FROM installed_apps WHERE id = ?1
        "#,
    )
    .bind(installed_app_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(record)
}

async fn insert_app(conn: &mut SqliteConnection, app: &NewApp) -> Result<AppRecord> {
    let existing: Option<i64> =
        sqlx::query_scalar(r#"SELECT id FROM app WHERE app_name = ?1 AND active = TRUE"#)
            .bind(&app.app_name)
            .fetch_optional(&mut *conn)
            .await?;
    if existing.is_some() {
        return Err(StoreError::AppAlreadyExists {
            app_name: app.app_name.clone(),
        });
    }

    let now = Utc::now();
    let record = sqlx::query_as::<_, AppRecord>(
        r#"
        INSERT INTO app (app_name, display_name, team_id, active,
                         created_by, created_on, updated_by, updated_on)
        VALUES (?1, ?2, ?3, TRUE, ?4, ?5, ?4, ?5)
        RETURNING *
        "#,
    )
    .bind(&app.app_name)
    .bind(&app.display_name)
    .bind(app.team_id)
    .bind(app.user_id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(record)
}

async fn resolve_app(conn: &mut SqliteConnection, draft: &InstallationDraft) -> Result<AppRecord> {
    if let Some(app_id) = draft.app_id {
        return sqlx::query_as::<_, AppRecord>(
            r#"SELECT * FROM app WHERE id = ?1 AND active = TRUE"#,
        )
        .bind(app_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StoreError::AppNotFound { app_id });
    }

    let existing = sqlx::query_as::<_, AppRecord>(
        r#"SELECT * FROM app WHERE app_name = ?1 AND active = TRUE"#,
    )
    .bind(&draft.app_name)
    .fetch_optional(&mut *conn)
    .await?;

    match existing {
        Some(app) if draft.skip_app_creation => Ok(app),
        Some(_) => Err(StoreError::AppAlreadyExists {
            app_name: draft.app_name.clone(),
        }),
        None => {
            insert_app(
                conn,
                &NewApp {
                    app_name: draft.app_name.clone(),
                    display_name: None,
                    team_id: draft.team_id,
                    user_id: draft.user_id,
                },
            )
            .await
        }
    }
}

async fn insert_version(
    conn: &mut SqliteConnection,
    installed_app_id: i64,
    app_store_application_version_id: i64,
    values_yaml: &str,
    reference_value_id: Option<i64>,
    reference_value_kind: ReferenceValueKind,
    user_id: i32,
) -> Result<InstalledAppVersionRecord> {
    let now = Utc::now();
    let record = sqlx::query_as::<_, InstalledAppVersionRecord>(
        r#"
        INSERT INTO installed_app_versions
            (installed_app_id, app_store_application_version_id, values_yaml_raw, active,
             reference_value_id, reference_value_kind,
             created_by, created_on, updated_by, updated_on)
        VALUES (?1, ?2, ?3, TRUE, ?4, ?5, ?6, ?7, ?6, ?7)
        RETURNING *
        "#,
    )
    .bind(installed_app_id)
    .bind(app_store_application_version_id)
    .bind(values_yaml)
    .bind(reference_value_id)
    .bind(reference_value_kind.as_str())
    .bind(user_id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(record)
}

async fn insert_history(
    conn: &mut SqliteConnection,
    installed_app_version_id: i64,
    values_yaml: &str,
    helm_config: Option<&HelmReleaseStatusConfig>,
    user_id: i32,
) -> Result<InstalledAppVersionHistoryRecord> {
    let now = Utc::now();
    let helm_config = helm_config.map(serde_json::to_string).transpose()?;
    let record = sqlx::query_as::<_, InstalledAppVersionHistoryRecord>(
        r#"
        INSERT INTO installed_app_version_history
            (installed_app_version_id, values_yaml_raw, status, started_on,
             helm_release_status_config, created_by, created_on, updated_by, updated_on)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?4, ?6, ?4)
        RETURNING *
        "#,
    )
    .bind(installed_app_version_id)
    .bind(values_yaml)
    .bind(HistoryStatus::InProgress.as_str())
    .bind(now)
    .bind(helm_config)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(record)
}

async fn deactivate_versions_of(
    conn: &mut SqliteConnection,
    installed_app_id: i64,
    user_id: i32,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE installed_app_versions
        SET active = FALSE, updated_by = ?2, updated_on = ?3
        WHERE installed_app_id = ?1 AND active = TRUE
        "#,
    )
    .bind(installed_app_id)
    .bind(user_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

// ============================================================================
// Persistence implementation
// ============================================================================

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn get_app(&self, app_id: i64) -> Result<Option<AppRecord>> {
        let record = sqlx::query_as::<_, AppRecord>(r#"SELECT * FROM app WHERE id = ?1"#)
            .bind(app_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_active_app_by_name(&self, app_name: &str) -> Result<Option<AppRecord>> {
        let record = sqlx::query_as::<_, AppRecord>(
            r#"SELECT * FROM app WHERE app_name = ?1 AND active = TRUE"#,
        )
        .bind(app_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn create_app(&self, app: &NewApp) -> Result<AppRecord> {
        let mut tx = self.pool.begin().await?;
        let record = insert_app(&mut tx, app).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn update_app_team(&self, app_id: i64, team_id: i64, user_id: i32) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE app SET team_id = ?2, updated_by = ?3, updated_on = ?4
            WHERE id = ?1
            "#,
        )
        .bind(app_id)
        .bind(team_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AppNotFound { app_id });
        }
        Ok(())
    }

    async fn create_installations(
        &self,
        drafts: &[InstallationDraft],
    ) -> Result<Vec<CreatedInstallation>> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(drafts.len());

        for draft in drafts {
            let app = resolve_app(&mut tx, draft).await?;
            let now = Utc::now();

            let installed_app = sqlx::query_as::<_, InstalledAppRecord>(
                r#"
                INSERT INTO installed_apps
                    (app_id, environment_id, active, git_ops_repo_name, git_ops_repo_url,
                     is_custom_repository, deployment_app_type, status,
                     deployment_app_delete_request,
                     created_by, created_on, updated_by, updated_on)
                VALUES (?1, ?2, TRUE, ?3, ?4, ?5, ?6, ?7, FALSE, ?8, ?9, ?8, ?9)
                RETURNING *
                "#,
            )
            .bind(app.id)
            .bind(draft.environment_id)
            .bind(&draft.git_ops_repo_name)
            .bind(&draft.git_ops_repo_url)
            .bind(draft.is_custom_repository)
            .bind(draft.deployment_app_type.as_str())
            .bind(AppstoreDeploymentStatus::DeployInit.as_i32())
            .bind(draft.user_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            let version = insert_version(
                &mut tx,
                installed_app.id,
                draft.app_store_application_version_id,
                &draft.values_yaml,
                draft.reference_value_id,
                draft.reference_value_kind,
                draft.user_id,
            )
            .await?;

            let history = insert_history(
                &mut tx,
                version.id,
                &draft.values_yaml,
                Some(&HelmReleaseStatusConfig::install_initiated()),
                draft.user_id,
            )
            .await?;

            if let Some(cluster_id) = draft.default_cluster_component {
                sqlx::query(
                    r#"
                    INSERT INTO cluster_installed_apps
                        (cluster_id, installed_app_id, created_by, created_on, updated_by, updated_on)
                    VALUES (?1, ?2, ?3, ?4, ?3, ?4)
                    "#,
                )
                .bind(cluster_id)
                .bind(installed_app.id)
                .bind(draft.user_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            insert_entries(&mut tx, history.id, &draft.initial_timelines, draft.user_id).await?;

            created.push(CreatedInstallation {
                app,
                installed_app,
                version,
                history,
                chart_group_deployment: None,
            });
        }

        let grouped: Vec<i64> = drafts
            .iter()
            .zip(created.iter())
            .filter(|(draft, _)| draft.chart_group.is_some())
            .map(|(_, c)| c.app.id)
            .collect();

        if !grouped.is_empty() {
            let group_id = group_installation_id(&grouped)?;
            for (draft, installation) in drafts.iter().zip(created.iter_mut()) {
                let Some(link) = draft.chart_group else {
                    continue;
                };
                let record = sqlx::query_as::<_, ChartGroupDeploymentRecord>(
                    r#"
                    INSERT INTO chart_group_deployment
                        (chart_group_id, chart_group_entry_id, installed_app_id,
                         group_installation_id, deleted,
                         created_by, created_on, updated_by, updated_on)
                    VALUES (?1, ?2, ?3, ?4, FALSE, ?5, ?6, ?5, ?6)
                    RETURNING *
                    "#,
                )
                .bind(link.chart_group_id)
                .bind(link.chart_group_entry_id)
                .bind(installation.installed_app.id)
                .bind(&group_id)
                .bind(draft.user_id)
                .bind(Utc::now())
                .fetch_one(&mut *tx)
                .await?;
                installation.chart_group_deployment = Some(record);
            }
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_installed_app(&self, installed_app_id: i64) -> Result<Option<InstalledAppRecord>> {
        let mut conn = self.pool.acquire().await?;
        fetch_installed_app(&mut conn, installed_app_id).await
    }

    async fn find_active_installed_app(
        &self,
        app_id: i64,
        environment_id: i64,
    ) -> Result<Option<InstalledAppRecord>> {
        let record = sqlx::query_as::<_, InstalledAppRecord>(
            r#"
            SELECT * FROM installed_apps
            WHERE app_id = ?1 AND environment_id = ?2 AND active = TRUE
            "#,
        )
        .bind(app_id)
        .bind(environment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_installed_apps_pending_delete(
        &self,
        limit: i64,
    ) -> Result<Vec<InstalledAppRecord>> {
        let records = sqlx::query_as::<_, InstalledAppRecord>(
            r#"
            SELECT * FROM installed_apps
            WHERE active = TRUE
              AND deployment_app_delete_request = TRUE
              AND deployment_app_type = 'argo_cd'
            ORDER BY id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn find_gitops_installed_app_pending_delete(
        &self,
        installed_app_id: i64,
        environment_id: i64,
    ) -> Result<Option<InstalledAppRecord>> {
        let record = sqlx::query_as::<_, InstalledAppRecord>(
            r#"
            SELECT * FROM installed_apps
            WHERE id = ?1
              AND environment_id = ?2
              AND active = TRUE
              AND deployment_app_delete_request = TRUE
              AND deployment_app_type = 'argo_cd'
            "#,
        )
        .bind(installed_app_id)
        .bind(environment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn update_installed_app_status(
        &self,
        installed_app_id: i64,
        status: AppstoreDeploymentStatus,
        user_id: i32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE installed_apps SET status = ?2, updated_by = ?3, updated_on = ?4
            WHERE id = ?1
            "#,
        )
        .bind(installed_app_id)
        .bind(status.as_i32())
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InstalledAppNotFound { installed_app_id });
        }
        Ok(())
    }

    async fn update_installed_app_status_if(
        &self,
        installed_app_id: i64,
        status: AppstoreDeploymentStatus,
        allowed_from: &[AppstoreDeploymentStatus],
        user_id: i32,
    ) -> Result<bool> {
        if allowed_from.is_empty() {
            return Ok(false);
        }
        let allowed = allowed_from
            .iter()
            .map(|s| s.as_i32().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE installed_apps SET status = ?2, updated_by = ?3, updated_on = ?4 \
             WHERE id = ?1 AND status IN ({})",
            allowed
        );
        let result = sqlx::query(&sql)
            .bind(installed_app_id)
            .bind(status.as_i32())
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_gitops_repository(
        &self,
        installed_app_id: i64,
        repo_name: Option<&str>,
        repo_url: Option<&str>,
        is_custom_repository: bool,
        user_id: i32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE installed_apps
            SET git_ops_repo_name = ?2, git_ops_repo_url = ?3, is_custom_repository = ?4,
                updated_by = ?5, updated_on = ?6
            WHERE id = ?1
            "#,
        )
        .bind(installed_app_id)
        .bind(repo_name)
        .bind(repo_url)
        .bind(is_custom_repository)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InstalledAppNotFound { installed_app_id });
        }
        Ok(())
    }

    async fn mark_deployment_app_delete_request(
        &self,
        installed_app_id: i64,
        user_id: i32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE installed_apps
            SET deployment_app_delete_request = TRUE, updated_by = ?2, updated_on = ?3
            WHERE id = ?1 AND active = TRUE
            "#,
        )
        .bind(installed_app_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InstalledAppNotFound { installed_app_id });
        }
        Ok(())
    }

    async fn deactivate_installation(&self, installed_app_id: i64, user_id: i32) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let installed_app = fetch_installed_app(&mut tx, installed_app_id)
            .await?
            .ok_or(StoreError::InstalledAppNotFound { installed_app_id })?;
        if !installed_app.active {
            return Ok(false);
        }
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE installed_apps SET active = FALSE, updated_by = ?2, updated_on = ?3
            WHERE id = ?1
            "#,
        )
        .bind(installed_app_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        deactivate_versions_of(&mut tx, installed_app_id, user_id).await?;

        sqlx::query(
            r#"
            UPDATE app SET active = FALSE, updated_by = ?2, updated_on = ?3
            WHERE id = ?1
              AND NOT EXISTS (
                  SELECT 1 FROM installed_apps WHERE app_id = ?1 AND active = TRUE
              )
            "#,
        )
        .bind(installed_app.app_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE chart_group_deployment SET deleted = TRUE, updated_by = ?2, updated_on = ?3
            WHERE installed_app_id = ?1 AND deleted = FALSE
            "#,
        )
        .bind(installed_app_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(r#"DELETE FROM app_status WHERE app_id = ?1 AND env_id = ?2"#)
            .bind(installed_app.app_id)
            .bind(installed_app.environment_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_installed_app_version(
        &self,
        installed_app_version_id: i64,
    ) -> Result<Option<InstalledAppVersionRecord>> {
        let record = sqlx::query_as::<_, InstalledAppVersionRecord>(
            r#"SELECT * FROM installed_app_versions WHERE id = ?1"#,
        )
        .bind(installed_app_version_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_active_installed_app_version(
        &self,
        installed_app_id: i64,
    ) -> Result<Option<InstalledAppVersionRecord>> {
        let record = sqlx::query_as::<_, InstalledAppVersionRecord>(
            r#"
            SELECT * FROM installed_app_versions
            WHERE installed_app_id = ?1 AND active = TRUE
            "#,
        )
        .bind(installed_app_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_installed_app_versions(
        &self,
        installed_app_id: i64,
    ) -> Result<Vec<InstalledAppVersionRecord>> {
        let records = sqlx::query_as::<_, InstalledAppVersionRecord>(
            r#"
            SELECT * FROM installed_app_versions
            WHERE installed_app_id = ?1
            ORDER BY id DESC
            "#,
        )
        .bind(installed_app_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn prepare_upgrade(&self, draft: &UpgradeDraft) -> Result<PreparedUpgrade> {
        let mut tx = self.pool.begin().await?;
        let installed_app_id = draft.installed_app_id;

        let installed_app = fetch_installed_app(&mut tx, installed_app_id).await?;
        if !installed_app.is_some_and(|app| app.active) {
            return Err(StoreError::InstalledAppNotFound { installed_app_id });
        }
        let now = Utc::now();

        let version = match draft.change {
            VersionChange::ChartChanged => {
                deactivate_versions_of(&mut tx, installed_app_id, draft.user_id).await?;
                insert_version(
                    &mut tx,
                    installed_app_id,
                    draft.app_store_application_version_id,
                    &draft.values_yaml,
                    draft.reference_value_id,
                    draft.reference_value_kind,
                    draft.user_id,
                )
                .await?
            }
            VersionChange::VersionBumped {
                installed_app_version_id,
            } => {
                let result = sqlx::query(
                    r#"
                    UPDATE installed_app_versions
                    SET active = FALSE, updated_by = ?3, updated_on = ?4
                    WHERE id = ?1 AND installed_app_id = ?2
                    "#,
                )
                .bind(installed_app_version_id)
                .bind(installed_app_id)
                .bind(draft.user_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::InstalledAppVersionNotFound {
                        installed_app_version_id,
                    });
                }
                insert_version(
                    &mut tx,
                    installed_app_id,
                    draft.app_store_application_version_id,
                    &draft.values_yaml,
                    draft.reference_value_id,
                    draft.reference_value_kind,
                    draft.user_id,
                )
                .await?
            }
            VersionChange::ValuesOnly {
                installed_app_version_id,
            } => sqlx::query_as::<_, InstalledAppVersionRecord>(
                r#"
                UPDATE installed_app_versions
                SET values_yaml_raw = ?3, reference_value_id = ?4, reference_value_kind = ?5,
                    updated_by = ?6, updated_on = ?7
                WHERE id = ?1 AND installed_app_id = ?2 AND active = TRUE
                RETURNING *
                "#,
            )
            .bind(installed_app_version_id)
            .bind(installed_app_id)
            .bind(&draft.values_yaml)
            .bind(draft.reference_value_id)
            .bind(draft.reference_value_kind.as_str())
            .bind(draft.user_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::InstalledAppVersionNotFound {
                installed_app_version_id,
            })?,
        };

        let history =
            insert_history(&mut tx, version.id, &draft.values_yaml, None, draft.user_id).await?;
        insert_entries(&mut tx, history.id, &draft.initial_timelines, draft.user_id).await?;

        tx.commit().await?;
        debug!(
            installed_app_id = installed_app_id,
            history_id = history.id,
            "Recorded upgrade attempt"
        );
        Ok(PreparedUpgrade { version, history })
    }

    async fn prepare_rollback(&self, draft: &RollbackDraft) -> Result<PreparedRollback> {
        let mut tx = self.pool.begin().await?;
        let installed_app_id = draft.installed_app_id;
        let now = Utc::now();

        let previous_version = sqlx::query_as::<_, InstalledAppVersionRecord>(
            r#"
            SELECT * FROM installed_app_versions
            WHERE installed_app_id = ?1 AND active = TRUE
            "#,
        )
        .bind(installed_app_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::InstalledAppVersionNotFound {
            installed_app_version_id: 0,
        })?;

        if previous_version.id != draft.target_version_id {
            sqlx::query(
                r#"
                UPDATE installed_app_versions
                SET active = FALSE, updated_by = ?2, updated_on = ?3
                WHERE id = ?1
                "#,
            )
            .bind(previous_version.id)
            .bind(draft.user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let version = sqlx::query_as::<_, InstalledAppVersionRecord>(
            r#"
            UPDATE installed_app_versions
            SET active = TRUE, values_yaml_raw = ?3, updated_by = ?4, updated_on = ?5
            WHERE id = ?1 AND installed_app_id = ?2
            RETURNING *
            "#,
        )
        .bind(draft.target_version_id)
        .bind(installed_app_id)
        .bind(&draft.values_yaml)
        .bind(draft.user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::InstalledAppVersionNotFound {
            installed_app_version_id: draft.target_version_id,
        })?;

        let history =
            insert_history(&mut tx, version.id, &draft.values_yaml, None, draft.user_id).await?;
        insert_entries(&mut tx, history.id, &draft.initial_timelines, draft.user_id).await?;

        tx.commit().await?;
        debug!(
            installed_app_id = installed_app_id,
            history_id = history.id,
            "Recorded rollback attempt"
        );
        Ok(PreparedRollback {
            previous_version,
            version,
            history,
        })
    }

    async fn restore_versions(&self, restore: &VersionRestore) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        deactivate_versions_of(&mut tx, restore.installed_app_id, restore.user_id).await?;
        for version in &restore.versions {
            sqlx::query(
                r#"
                UPDATE installed_app_versions
                SET active = ?3, values_yaml_raw = ?4, reference_value_id = ?5,
                    reference_value_kind = ?6, updated_by = ?7, updated_on = ?8
                WHERE id = ?1 AND installed_app_id = ?2
                "#,
            )
            .bind(version.id)
            .bind(restore.installed_app_id)
            .bind(version.active)
            .bind(&version.values_yaml_raw)
            .bind(version.reference_value_id)
            .bind(version.reference_value_kind.as_str())
            .bind(restore.user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            installed_app_id = restore.installed_app_id,
            versions = restore.versions.len(),
            "Restored version bindings"
        );
        Ok(())
    }

    async fn get_history(
        &self,
        history_id: i64,
    ) -> Result<Option<InstalledAppVersionHistoryRecord>> {
        let record = sqlx::query_as::<_, InstalledAppVersionHistoryRecord>(
            r#"SELECT * FROM installed_app_version_history WHERE id = ?1"#,
        )
        .bind(history_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_history_for_version(
        &self,
        installed_app_version_id: i64,
    ) -> Result<Vec<InstalledAppVersionHistoryRecord>> {
        let records = sqlx::query_as::<_, InstalledAppVersionHistoryRecord>(
            r#"
            SELECT * FROM installed_app_version_history
            WHERE installed_app_version_id = ?1
            ORDER BY id DESC
            "#,
        )
        .bind(installed_app_version_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_history_for_installed_app(
        &self,
        installed_app_id: i64,
    ) -> Result<Vec<InstallationHistoryRow>> {
        let records = sqlx::query_as::<_, InstallationHistoryRow>(
            r#"
            SELECT h.*, v.app_store_application_version_id
            FROM installed_app_version_history h
            JOIN installed_app_versions v ON v.id = h.installed_app_version_id
            WHERE v.installed_app_id = ?1
            ORDER BY h.id DESC
            "#,
        )
        .bind(installed_app_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn latest_history_for_version(
        &self,
        installed_app_version_id: i64,
    ) -> Result<Option<InstalledAppVersionHistoryRecord>> {
        let record = sqlx::query_as::<_, InstalledAppVersionHistoryRecord>(
            r#"
            SELECT * FROM installed_app_version_history
            WHERE installed_app_version_id = ?1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(installed_app_version_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn update_history_git_hash(
        &self,
        history_id: i64,
        git_hash: &str,
        user_id: i32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE installed_app_version_history
            SET git_hash = ?2, updated_by = ?3, updated_on = ?4
            WHERE id = ?1
            "#,
        )
        .bind(history_id)
        .bind(git_hash)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::HistoryNotFound { history_id });
        }
        Ok(())
    }

    async fn transition_history(&self, transition: &HistoryTransition) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let helm_config = transition
            .helm_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE installed_app_version_history
            SET status = ?2,
                finished_on = CASE WHEN ?3 THEN ?4 ELSE finished_on END,
                helm_release_status_config = COALESCE(?5, helm_release_status_config),
                message = COALESCE(?6, message),
                updated_by = ?7,
                updated_on = ?4
            WHERE id = ?1
            "#,
        )
        .bind(transition.history_id)
        .bind(transition.status.as_str())
        .bind(transition.status.is_terminal())
        .bind(now)
        .bind(helm_config)
        .bind(&transition.message)
        .bind(transition.user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::HistoryNotFound {
                history_id: transition.history_id,
            });
        }

        if let Some(entry) = &transition.timeline {
            let timeline = NewTimeline::now(transition.history_id, entry.clone(), transition.user_id);
            insert_timeline(&mut tx, &timeline).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn supersede_previous_histories(
        &self,
        installed_app_version_id: i64,
        keep_history_id: i64,
        user_id: i32,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let stale: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM installed_app_version_history
            WHERE installed_app_version_id = ?1
              AND id < ?2
              AND status NOT IN ('Healthy', 'Succeeded', 'Aborted', 'Failed')
            ORDER BY id ASC
            "#,
        )
        .bind(installed_app_version_id)
        .bind(keep_history_id)
        .fetch_all(&mut *tx)
        .await?;

        for history_id in &stale {
            let now = Utc::now();
            sqlx::query(
                r#"
                UPDATE installed_app_version_history
                SET status = ?2, finished_on = ?3, updated_by = ?4, updated_on = ?3
                WHERE id = ?1
                "#,
            )
            .bind(history_id)
            .bind(HistoryStatus::Failed.as_str())
            .bind(now)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

            let timeline = NewTimeline::now(
                *history_id,
                TimelineEntry::new(
                    TimelineStatus::DeploymentSuperseded,
                    DEPLOYMENT_SUPERSEDED_DETAIL,
                ),
                user_id,
            );
            insert_timeline(&mut tx, &timeline).await?;
        }

        tx.commit().await?;
        if !stale.is_empty() {
            debug!(
                installed_app_version_id = installed_app_version_id,
                superseded = stale.len(),
                "Superseded history rows"
            );
        }
        Ok(stale.len() as u64)
    }

    async fn save_timeline(&self, timeline: &NewTimeline) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        insert_timeline(&mut conn, timeline).await
    }

    async fn save_timelines(&self, timelines: &[NewTimeline]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut stored = 0;
        for timeline in timelines {
            if insert_timeline(&mut tx, timeline).await? {
                stored += 1;
            }
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn list_timelines(&self, history_id: i64) -> Result<Vec<TimelineRecord>> {
        let records = sqlx::query_as::<_, TimelineRecord>(
            r#"
            SELECT * FROM pipeline_status_timeline
            WHERE installed_app_version_history_id = ?1
            ORDER BY status_time ASC, id ASC
            "#,
        )
        .bind(history_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn upsert_app_status(&self, app_id: i64, env_id: i64, status: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_status (app_id, env_id, status, updated_on)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(app_id, env_id) DO UPDATE SET
                status = excluded.status,
                updated_on = excluded.updated_on
            "#,
        )
        .bind(app_id)
        .bind(env_id)
        .bind(status)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_app_status(&self, app_id: i64, env_id: i64) -> Result<Option<String>> {
        let status: Option<String> = sqlx::query_scalar(
            r#"SELECT status FROM app_status WHERE app_id = ?1 AND env_id = ?2"#,
        )
        .bind(app_id)
        .bind(env_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }

    async fn list_chart_group_deployments(
        &self,
        installed_app_id: i64,
    ) -> Result<Vec<ChartGroupDeploymentRecord>> {
        let records = sqlx::query_as::<_, ChartGroupDeploymentRecord>(
            r#"
            SELECT * FROM chart_group_deployment
            WHERE installed_app_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(installed_app_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_cluster_installed_apps(
        &self,
        cluster_id: i64,
    ) -> Result<Vec<ClusterInstalledAppRecord>> {
        let records = sqlx::query_as::<_, ClusterInstalledAppRecord>(
            r#"
            SELECT * FROM cluster_installed_apps
            WHERE cluster_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
