// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL backend tests for appstore-state.
//!
//! Skipped unless TEST_APPSTORE_DATABASE_URL points at a scratch database.

use appstore_state::{
    DeploymentAppType, HistoryStatus, HistoryTransition, InstallationDraft, NewTimeline,
    Persistence, PostgresPersistence, ReferenceValueKind, RollbackDraft, StoreError, TimelineEntry,
    TimelineStatus, UpgradeDraft, VersionChange, migrations,
};
use chrono::Utc;

/// Skip test if database URL is not set
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_APPSTORE_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_APPSTORE_DATABASE_URL not set");
            return;
        }
    };
}

async fn persistence() -> PostgresPersistence {
    let database_url =
        std::env::var("TEST_APPSTORE_DATABASE_URL").expect("TEST_APPSTORE_DATABASE_URL not set");
    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to database");
    migrations::run_postgres(&pool)
        .await
        .expect("Failed to run migrations");
    PostgresPersistence::new(pool)
}

/// Unique app name and environment id so tests can share one database.
fn unique(prefix: &str) -> (String, i64) {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    (format!("{}-{}", prefix, nanos), nanos % 1_000_000_000)
}

fn draft(app_name: &str, environment_id: i64) -> InstallationDraft {
    InstallationDraft {
        app_id: None,
        app_name: app_name.to_string(),
        team_id: 1,
        skip_app_creation: false,
        environment_id,
        deployment_app_type: DeploymentAppType::GitOps,
        git_ops_repo_name: Some(app_name.to_string()),
        git_ops_repo_url: None,
        is_custom_repository: false,
        app_store_application_version_id: 55,
        values_yaml: "replicas: 2\n".to_string(),
        reference_value_id: None,
        reference_value_kind: ReferenceValueKind::Default,
        default_cluster_component: None,
        chart_group: None,
        initial_timelines: vec![TimelineEntry::new(
            TimelineStatus::DeploymentInitiated,
            "Deployment initiated successfully.",
        )],
        user_id: 1,
    }
}

// ============================================================================
// Installation Tests
// ============================================================================

#[tokio::test]
async fn test_pg_create_installation_and_unique_active_row() {
    skip_if_no_db!();
    let persistence = persistence().await;
    let (name, env) = unique("pg-install");

    let created = persistence
        .create_installation(&draft(&name, env))
        .await
        .expect("Failed to create installation");
    assert_eq!(created.history.status, HistoryStatus::InProgress);

    let mut duplicate = draft(&name, env);
    duplicate.app_id = Some(created.app.id);
    let err = persistence
        .create_installation(&duplicate)
        .await
        .expect_err("Duplicate installation must fail");
    assert!(matches!(err, StoreError::UniqueViolation { .. }));

    assert!(
        persistence
            .deactivate_installation(created.installed_app.id, 1)
            .await
            .expect("Failed to deactivate")
    );
}

// ============================================================================
// Timeline Tests
// ============================================================================

#[tokio::test]
async fn test_pg_timeline_uniqueness_and_closing() {
    skip_if_no_db!();
    let persistence = persistence().await;
    let (name, env) = unique("pg-timeline");
    let created = persistence
        .create_installation(&draft(&name, env))
        .await
        .expect("Failed to create installation");
    let history_id = created.history.id;

    let initiated = NewTimeline::now(
        history_id,
        TimelineEntry::new(TimelineStatus::DeploymentInitiated, "again"),
        1,
    );
    assert!(!persistence.save_timeline(&initiated).await.unwrap());

    persistence
        .transition_history(
            &HistoryTransition::to(history_id, HistoryStatus::Failed, 1).with_timeline(
                TimelineEntry::new(TimelineStatus::DeploymentFailed, "helm error"),
            ),
        )
        .await
        .unwrap();

    let late = NewTimeline::now(
        history_id,
        TimelineEntry::new(TimelineStatus::GitCommit, "late"),
        1,
    );
    assert!(!persistence.save_timeline(&late).await.unwrap());
    assert_eq!(persistence.list_timelines(history_id).await.unwrap().len(), 2);
}

// ============================================================================
// Upgrade / Rollback Tests
// ============================================================================

#[tokio::test]
async fn test_pg_upgrade_then_rollback() {
    skip_if_no_db!();
    let persistence = persistence().await;
    let (name, env) = unique("pg-rollback");
    let created = persistence
        .create_installation(&draft(&name, env))
        .await
        .expect("Failed to create installation");

    let upgraded = persistence
        .prepare_upgrade(&UpgradeDraft {
            installed_app_id: created.installed_app.id,
            change: VersionChange::VersionBumped {
                installed_app_version_id: created.version.id,
            },
            app_store_application_version_id: 56,
            values_yaml: "replicas: 4\n".to_string(),
            reference_value_id: None,
            reference_value_kind: ReferenceValueKind::Existing,
            initial_timelines: vec![],
            user_id: 1,
        })
        .await
        .expect("Failed to upgrade");
    assert_ne!(upgraded.version.id, created.version.id);

    let rollback = persistence
        .prepare_rollback(&RollbackDraft {
            installed_app_id: created.installed_app.id,
            target_version_id: created.version.id,
            values_yaml: created.history.values_yaml_raw.clone(),
            initial_timelines: vec![],
            user_id: 1,
        })
        .await
        .expect("Failed to roll back");
    assert!(rollback.version_changed());

    let superseded = persistence
        .supersede_previous_histories(created.version.id, rollback.history.id, 1)
        .await
        .unwrap();
    assert_eq!(superseded, 1);

    persistence
        .deactivate_installation(created.installed_app.id, 1)
        .await
        .unwrap();
}
