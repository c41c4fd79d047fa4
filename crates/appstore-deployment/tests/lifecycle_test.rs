// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for upgrades and rollbacks of GitOps installations.

mod common;

use appstore_deployment::orchestrator::{
    InstallAppVersionDto, RollbackRequest, UpdateInstalledAppRequest,
};
use appstore_state::{AppstoreDeploymentStatus, HistoryStatus, ReferenceValueKind, TimelineStatus};
use common::*;

fn update(dto: &InstallAppVersionDto, version_id: i64, chart_id: i64, values: &str) -> UpdateInstalledAppRequest {
    UpdateInstalledAppRequest {
        installed_app_id: dto.installed_app_id,
        installed_app_version_id: version_id,
        app_store_application_version_id: chart_id,
        values_override_yaml: values.to_string(),
        reference_value_id: None,
        reference_value_kind: ReferenceValueKind::Default,
        user_id: 7,
    }
}

#[tokio::test]
async fn test_values_only_upgrade() {
    let ctx = TestContext::new().await;
    let installed = ctx.install("svc-a", CHART_A, "replicas: 1\n").await;
    let commits_before = ctx.git.commits("svc-a").len();

    let upgraded = ctx
        .orchestrator
        .update_installed_app(
            &ctx.ctx(),
            update(&installed, installed.installed_app_version_id, CHART_A, "replicas: 4\n"),
        )
        .await
        .unwrap();

    assert_deployed(&upgraded);
    assert_eq!(upgraded.installed_app_version_id, installed.installed_app_version_id);
    assert_ne!(
        upgraded.installed_app_version_history_id,
        installed.installed_app_version_history_id
    );

    // Only the values file is committed
    let commits = ctx.git.commits("svc-a");
    assert_eq!(commits.len(), commits_before + 1);
    assert_eq!(commits.last().unwrap().paths, vec!["svc-a-prod/values.yaml".to_string()]);
    assert_eq!(
        ctx.git.file("svc-a", "svc-a-prod/values.yaml").as_deref(),
        Some(r#"{"nginx":{"replicas":4}}"#)
    );

    let history = ctx.history(upgraded.installed_app_version_history_id).await;
    assert_succeeded(&history);
    assert_eq!(history.values_yaml_raw, "replicas: 4\n");
    assert_eq!(history.git_hash.as_deref(), Some(commits.last().unwrap().hash.as_str()));

    let version = ctx
        .store
        .get_installed_app_version(installed.installed_app_version_id)
        .await
        .unwrap()
        .unwrap();
    assert!(version.active);
    assert_eq!(version.values_yaml_raw, "replicas: 4\n");
}

#[tokio::test]
async fn test_chart_change_creates_new_version() {
    let ctx = TestContext::new().await;
    let installed = ctx.install("svc-a", CHART_A, "replicas: 1\n").await;

    let upgraded = ctx
        .orchestrator
        .update_installed_app(&ctx.ctx(), update(&installed, 0, CHART_B, "replicas: 2\n"))
        .await
        .unwrap();

    assert_deployed(&upgraded);
    assert_ne!(upgraded.installed_app_version_id, installed.installed_app_version_id);
    assert_eq!(upgraded.app_store_application_version_id, CHART_B);

    let old = ctx
        .store
        .get_installed_app_version(installed.installed_app_version_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!old.active);
    let active = ctx
        .store
        .get_active_installed_app_version(installed.installed_app_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, upgraded.installed_app_version_id);
    assert_eq!(active.app_store_application_version_id, CHART_B);

    // Requirements first, then values
    let commits = ctx.git.commits("svc-a");
    let last_two: Vec<_> = commits[commits.len() - 2..]
        .iter()
        .map(|c| c.paths.clone())
        .collect();
    assert_eq!(
        last_two,
        vec![
            vec!["svc-a-prod/requirements.yaml".to_string()],
            vec!["svc-a-prod/values.yaml".to_string()],
        ]
    );
    assert!(
        ctx.git
            .file("svc-a", "svc-a-prod/requirements.yaml")
            .unwrap()
            .contains("1.3.0")
    );
    assert_succeeded(&ctx.history(upgraded.installed_app_version_history_id).await);
}

#[tokio::test]
async fn test_outdated_version_is_rejected() {
    let ctx = TestContext::new().await;
    let installed = ctx.install("svc-a", CHART_A, "replicas: 1\n").await;
    ctx.orchestrator
        .update_installed_app(&ctx.ctx(), update(&installed, 0, CHART_B, "replicas: 2\n"))
        .await
        .unwrap();

    // The first version is no longer active
    let err = ctx
        .orchestrator
        .update_installed_app(
            &ctx.ctx(),
            update(&installed, installed.installed_app_version_id, CHART_A, "replicas: 3\n"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 409);
    assert!(err.to_string().contains("The values are outdated"));
}

#[tokio::test]
async fn test_upgrade_recreates_deleted_repository() {
    let ctx = TestContext::new().await;
    let installed = ctx.install("svc-a", CHART_A, "replicas: 1\n").await;
    ctx.git.delete_repository("svc-a");

    let upgraded = ctx
        .orchestrator
        .update_installed_app(
            &ctx.ctx(),
            update(&installed, installed.installed_app_version_id, CHART_A, "replicas: 2\n"),
        )
        .await
        .unwrap();

    assert_deployed(&upgraded);
    assert_eq!(
        ctx.git.created_repositories(),
        vec!["svc-a".to_string(), "svc-a".to_string()]
    );
    assert!(ctx.git.has_repository("svc-a"));
    assert_eq!(
        ctx.git.file("svc-a", "svc-a-prod/values.yaml").as_deref(),
        Some(r#"{"nginx":{"replicas":2}}"#)
    );

    // The engine app is re-pointed at the recreated repository
    let calls = ctx.engine.calls();
    assert!(calls.contains(&"patch svc-a-prod".to_string()));
    assert!(!calls.contains(&"update svc-a-prod".to_string()));
    assert_eq!(
        calls.iter().filter(|c| c.starts_with("register_repo")).count(),
        2
    );

    let installed_app = ctx.installed_app(installed.installed_app_id).await;
    assert_eq!(installed_app.status, AppstoreDeploymentStatus::DeploySuccess);
    assert_eq!(
        installed_app.git_ops_repo_url.as_deref(),
        Some("https://github.com/acme/svc-a.git")
    );
}

#[tokio::test]
async fn test_upgrade_of_deleting_installation_conflicts() {
    let ctx = TestContext::new().await;
    let installed = ctx.install("svc-a", CHART_A, "replicas: 1\n").await;
    ctx.store
        .mark_deployment_app_delete_request(installed.installed_app_id, 7)
        .await
        .unwrap();

    let err = ctx
        .orchestrator
        .update_installed_app(
            &ctx.ctx(),
            update(&installed, installed.installed_app_version_id, CHART_A, "replicas: 2\n"),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn test_rollback_to_previous_chart() {
    let ctx = TestContext::new().await;
    let v1 = "replicas: 1\n";
    let installed = ctx.install("svc-a", CHART_A, v1).await;
    let h1 = installed.installed_app_version_history_id;

    ctx.orchestrator
        .update_installed_app(
            &ctx.ctx(),
            update(&installed, installed.installed_app_version_id, CHART_A, "replicas: 2\n"),
        )
        .await
        .unwrap();
    let chart_b = ctx
        .orchestrator
        .update_installed_app(&ctx.ctx(), update(&installed, 0, CHART_B, "replicas: 3\n"))
        .await
        .unwrap();
    let commits_before = ctx.git.commits("svc-a").len();

    let rolled_back = ctx
        .orchestrator
        .rollback_application(
            &ctx.ctx(),
            RollbackRequest {
                installed_app_id: installed.installed_app_id,
                installed_app_version_history_id: h1,
                deployment_version: None,
                user_id: 7,
            },
        )
        .await
        .unwrap();
    assert!(rolled_back);

    // Version A active again with the values of h1
    let active = ctx
        .store
        .get_active_installed_app_version(installed.installed_app_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, installed.installed_app_version_id);
    assert_eq!(active.values_yaml_raw, v1);
    let version_b = ctx
        .store
        .get_installed_app_version(chart_b.installed_app_version_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!version_b.active);

    // Requirements changed back, so both files are committed
    let commits = ctx.git.commits("svc-a");
    assert_eq!(commits.len(), commits_before + 2);
    assert_eq!(
        commits[commits_before].paths,
        vec!["svc-a-prod/requirements.yaml".to_string()]
    );
    assert_eq!(
        commits[commits_before + 1].paths,
        vec!["svc-a-prod/values.yaml".to_string()]
    );
    assert!(
        ctx.git
            .file("svc-a", "svc-a-prod/requirements.yaml")
            .unwrap()
            .contains("1.2.3")
    );

    // The rollback is a new attempt; the target row is untouched
    let latest = ctx
        .store
        .latest_history_for_version(installed.installed_app_version_id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(latest.id, h1);
    assert_eq!(latest.values_yaml_raw, v1);
    assert_succeeded(&latest);
    assert_eq!(ctx.history(h1).await.status, HistoryStatus::Succeeded);
    assert_eq!(ctx.open_histories(installed.installed_app_version_id).await, 0);
}

#[tokio::test]
async fn test_failed_rollback_keeps_deployed_version_active() {
    let ctx = TestContext::new().await;
    let installed = ctx.install("svc-a", CHART_A, "replicas: 1\n").await;
    let h1 = installed.installed_app_version_history_id;
    let chart_b = ctx
        .orchestrator
        .update_installed_app(&ctx.ctx(), update(&installed, 0, CHART_B, "replicas: 2\n"))
        .await
        .unwrap();

    ctx.git.fail_commits("boom");
    ctx.orchestrator
        .rollback_application(
            &ctx.ctx(),
            RollbackRequest {
                installed_app_id: installed.installed_app_id,
                installed_app_version_history_id: h1,
                deployment_version: None,
                user_id: 7,
            },
        )
        .await
        .unwrap_err();

    // Git still holds B, so B stays the active version
    let active = ctx
        .store
        .get_active_installed_app_version(installed.installed_app_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, chart_b.installed_app_version_id);
    assert_eq!(active.values_yaml_raw, "replicas: 2\n");
    let version_a = ctx
        .store
        .get_installed_app_version(installed.installed_app_version_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!version_a.active);
    assert!(
        ctx.git
            .file("svc-a", "svc-a-prod/requirements.yaml")
            .unwrap()
            .contains("1.3.0")
    );

    // The failed attempt is still recorded
    let attempt = ctx
        .store
        .latest_history_for_version(installed.installed_app_version_id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(attempt.id, h1);
    assert_eq!(attempt.status, HistoryStatus::Failed);
    assert_eq!(
        ctx.timeline_statuses(attempt.id).await,
        vec![TimelineStatus::DeploymentInitiated, TimelineStatus::GitCommitFailed]
    );
}

#[tokio::test]
async fn test_failed_chart_change_keeps_previous_version_active() {
    let ctx = TestContext::new().await;
    let installed = ctx.install("svc-a", CHART_A, "replicas: 1\n").await;

    ctx.git.fail_commits("boom");
    let err = ctx
        .orchestrator
        .update_installed_app(&ctx.ctx(), update(&installed, 0, CHART_B, "replicas: 2\n"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 500);

    let active = ctx
        .store
        .get_active_installed_app_version(installed.installed_app_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, installed.installed_app_version_id);
    assert_eq!(active.app_store_application_version_id, CHART_A);
    assert_eq!(active.values_yaml_raw, "replicas: 1\n");
    assert!(
        ctx.git
            .file("svc-a", "svc-a-prod/requirements.yaml")
            .unwrap()
            .contains("1.2.3")
    );
    assert_eq!(
        ctx.installed_app(installed.installed_app_id).await.status,
        AppstoreDeploymentStatus::GitError
    );
}

#[tokio::test]
async fn test_rollback_rejects_foreign_history() {
    let ctx = TestContext::new().await;
    let a = ctx.install("svc-a", CHART_A, "replicas: 1\n").await;
    let b = ctx.install("svc-b", CHART_A, "replicas: 1\n").await;

    let err = ctx
        .orchestrator
        .rollback_application(
            &ctx.ctx(),
            RollbackRequest {
                installed_app_id: a.installed_app_id,
                installed_app_version_history_id: b.installed_app_version_history_id,
                deployment_version: None,
                user_id: 7,
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_manual_sync_upgrade_records_sync() {
    let ctx = TestContext::with_settings(appstore_deployment::config::DeploymentSettings {
        auto_sync_enabled: false,
        ..Default::default()
    })
    .await;
    let installed = ctx.install("svc-a", CHART_A, "replicas: 1\n").await;

    let upgraded = ctx
        .orchestrator
        .update_installed_app(
            &ctx.ctx(),
            update(&installed, installed.installed_app_version_id, CHART_A, "replicas: 2\n"),
        )
        .await
        .unwrap();

    assert_eq!(
        ctx.timeline_statuses(upgraded.installed_app_version_history_id).await,
        vec![
            TimelineStatus::DeploymentInitiated,
            TimelineStatus::GitCommit,
            TimelineStatus::ArgocdSyncInitiated,
            TimelineStatus::ArgocdSyncCompleted,
        ]
    );
    assert_eq!(
        ctx.engine
            .calls()
            .iter()
            .filter(|c| *c == "sync svc-a-prod")
            .count(),
        2
    );
}
