// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for fresh installations across backends and repository policies.

mod common;

use appstore_deployment::Error;
use appstore_deployment::config::DeploymentSettings;
use appstore_state::{AppstoreDeploymentStatus, DeploymentAppType, HistoryStatus, TimelineStatus};
use common::*;

#[tokio::test]
async fn test_fresh_gitops_install() {
    let ctx = TestContext::new().await;

    let dto = ctx.install("svc-a", CHART_A, "replicas: 2\n").await;

    assert_deployed(&dto);
    assert_eq!(dto.deployment_app_type, Some(DeploymentAppType::GitOps));
    assert!(dto.is_new_git_ops_repo);
    assert_eq!(dto.git_ops_repo_name.as_deref(), Some("svc-a"));

    // Repository auto-created once, README first, then the full chart push
    assert_eq!(ctx.git.created_repositories(), vec!["svc-a".to_string()]);
    let commits = ctx.git.commits("svc-a");
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].paths, vec!["README.md".to_string()]);
    assert!(commits[1].paths.contains(&"svc-a-prod/values.yaml".to_string()));
    assert!(commits[1].paths.contains(&"svc-a-prod/requirements.yaml".to_string()));
    assert_eq!(
        ctx.git.file("svc-a", "svc-a-prod/values.yaml").as_deref(),
        Some(r#"{"nginx":{"replicas":2}}"#)
    );

    // Engine app created against the repository and refreshed
    let app = ctx.engine.app("svc-a-prod").expect("engine app missing");
    assert_eq!(app.spec.source.repo_url, "https://github.com/acme/svc-a.git");
    assert_eq!(app.spec.source.path, "svc-a-prod");
    assert_eq!(app.spec.source.target_revision, "master");
    assert!(ctx.engine.registered_repos().contains(&"https://github.com/acme/svc-a.git".to_string()));
    assert!(ctx.engine.tokens().iter().all(|t| t == TOKEN));

    // Rows recorded and closed
    let installed_app = ctx.installed_app(dto.installed_app_id).await;
    assert!(installed_app.active);
    assert_eq!(installed_app.status, AppstoreDeploymentStatus::DeploySuccess);
    assert_eq!(
        installed_app.git_ops_repo_url.as_deref(),
        Some("https://github.com/acme/svc-a.git")
    );

    let history = ctx.history(dto.installed_app_version_history_id).await;
    assert_succeeded(&history);
    assert!(history.git_hash.as_deref().is_some_and(|h| !h.is_empty()));
    assert_eq!(history.git_hash, dto.git_hash);
    assert!(history.finished_on.is_some());

    assert_eq!(
        ctx.timeline_statuses(history.id).await,
        vec![TimelineStatus::DeploymentInitiated, TimelineStatus::GitCommit]
    );
}

#[tokio::test]
async fn test_manual_sync_records_sync_timelines() {
    let ctx = TestContext::with_settings(DeploymentSettings {
        auto_sync_enabled: false,
        ..DeploymentSettings::default()
    })
    .await;

    let dto = ctx.install("svc-a", CHART_A, "replicas: 2\n").await;

    assert_deployed(&dto);
    assert_eq!(
        ctx.timeline_statuses(dto.installed_app_version_history_id).await,
        vec![
            TimelineStatus::DeploymentInitiated,
            TimelineStatus::GitCommit,
            TimelineStatus::ArgocdSyncInitiated,
            TimelineStatus::ArgocdSyncCompleted,
        ]
    );
    assert!(ctx.engine.calls().contains(&"sync svc-a-prod".to_string()));
    assert!(!ctx.engine.app("svc-a-prod").unwrap().is_auto_sync());
}

#[tokio::test]
async fn test_oci_chart_is_deployed_through_helm() {
    let ctx = TestContext::new().await;

    let dto = ctx
        .orchestrator
        .install_app(
            &ctx.ctx(),
            install_request_as("svc-oci", OCI_CHART, "replicas: 1\n", DeploymentAppType::GitOps),
        )
        .await
        .unwrap();

    assert_deployed(&dto);
    assert_eq!(dto.deployment_app_type, Some(DeploymentAppType::Helm));
    assert!(ctx.git.created_repositories().is_empty());
    assert!(ctx.engine.app_names().is_empty());

    let installs = ctx.helm.install_requests();
    assert_eq!(installs.len(), 1);
    assert!(installs[0].is_oci_repo);
    assert_eq!(installs[0].chart_repository.url, "oci://registry.example.com/charts");
    assert_eq!(installs[0].release_identifier.release_name, "svc-oci");
    assert_eq!(installs[0].release_identifier.release_namespace, "prod-ns");
    assert_eq!(
        installs[0].install_app_version_history_id,
        dto.installed_app_version_history_id
    );

    // Helm installations record no initial timelines, only the outcome
    assert_eq!(
        ctx.timeline_statuses(dto.installed_app_version_history_id).await,
        vec![TimelineStatus::DeploymentSucceeded]
    );
    let history = ctx.history(dto.installed_app_version_history_id).await;
    assert_succeeded(&history);
    let config = history.helm_config().expect("helm config missing");
    assert!(config.is_release_installed);
    assert!(!config.error_in_installation);
}

#[tokio::test]
async fn test_virtual_environment_coerces_helm() {
    let ctx = TestContext::new().await;
    let mut request = install_request_as("svc-v", CHART_A, "replicas: 1\n", DeploymentAppType::Helm);
    request.environment_id = VIRTUAL_ENV_ID;

    let dto = ctx.orchestrator.install_app(&ctx.ctx(), request).await.unwrap();

    assert_deployed(&dto);
    assert_eq!(dto.deployment_app_type, Some(DeploymentAppType::Virtual));
    assert!(dto.rendered_manifest.as_deref().is_some_and(|m| m.contains("nginx")));
    assert!(ctx.helm.install_requests().is_empty());
}

#[tokio::test]
async fn test_manifest_download_on_virtual_environment_is_rejected() {
    let ctx = TestContext::new().await;
    let mut request = install_request_as(
        "svc-v",
        CHART_A,
        "replicas: 1\n",
        DeploymentAppType::ManifestDownload,
    );
    request.environment_id = VIRTUAL_ENV_ID;

    let err = ctx.orchestrator.install_app(&ctx.ctx(), request).await.unwrap_err();

    assert_eq!(err.status_code(), 400);
    assert!(ctx.store.find_active_app_by_name("svc-v").await.unwrap().is_none());
}

#[tokio::test]
async fn test_manifest_download_install() {
    let ctx = TestContext::new().await;

    let dto = ctx
        .orchestrator
        .install_app(
            &ctx.ctx(),
            install_request_as("svc-md", CHART_A, "replicas: 1\n", DeploymentAppType::ManifestDownload),
        )
        .await
        .unwrap();

    assert_deployed(&dto);
    assert!(dto.manifest_archive.as_ref().is_some_and(|a| !a.is_empty()));
    assert!(ctx.git.created_repositories().is_empty());
    assert!(ctx.helm.install_requests().is_empty());
    assert_eq!(
        ctx.timeline_statuses(dto.installed_app_version_history_id).await,
        vec![TimelineStatus::DeploymentInitiated, TimelineStatus::ManifestGenerated]
    );
    assert_succeeded(&ctx.history(dto.installed_app_version_history_id).await);
}

#[tokio::test]
async fn test_custom_repo_forbidden_leaves_no_rows() {
    let ctx = TestContext::new().await;
    let mut request = install_request("svc-x", CHART_A, "replicas: 1\n");
    request.git_ops_repo_url = Some("https://github.com/acme/other.git".to_string());

    let err = ctx.orchestrator.install_app(&ctx.ctx(), request).await.unwrap_err();

    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(err.status_code(), 409);
    assert!(ctx.store.find_active_app_by_name("svc-x").await.unwrap().is_none());
    assert_eq!(ctx.git.commit_calls(), 0);
}

#[tokio::test]
async fn test_custom_repo_must_be_reachable() {
    let ctx = TestContext::with_settings(DeploymentSettings {
        allow_custom_repository: true,
        ..DeploymentSettings::default()
    })
    .await;

    let mut request = install_request("svc-x", CHART_A, "replicas: 1\n");
    request.git_ops_repo_url = Some("https://github.com/acme/missing.git".to_string());
    let err = ctx.orchestrator.install_app(&ctx.ctx(), request).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    let mut request = install_request("svc-x", CHART_A, "replicas: 1\n");
    request.git_ops_repo_url = Some("https://gitlab.com/acme/shared.git".to_string());
    let err = ctx.orchestrator.install_app(&ctx.ctx(), request).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    let mut request = install_request("svc-x", CHART_A, "replicas: 1\n");
    request.git_ops_repo_url = None;
    let err = ctx.orchestrator.install_app(&ctx.ctx(), request).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    assert!(ctx.store.find_active_app_by_name("svc-x").await.unwrap().is_none());
}

#[tokio::test]
async fn test_custom_repo_install_reuses_repository() {
    let ctx = TestContext::with_settings(DeploymentSettings {
        allow_custom_repository: true,
        ..DeploymentSettings::default()
    })
    .await;
    let url = ctx.git.add_repository("shared");

    let mut request = install_request("svc-x", CHART_A, "replicas: 1\n");
    request.git_ops_repo_url = Some(format!("{}/", url));
    let dto = ctx.orchestrator.install_app(&ctx.ctx(), request).await.unwrap();

    assert_deployed(&dto);
    assert!(dto.is_custom_repository);
    assert_eq!(dto.git_ops_repo_url.as_deref(), Some(url.as_str()));
    assert!(ctx.git.created_repositories().is_empty());

    // Existing repository: tree push, then requirements and values commits
    let commits = ctx.git.commits("shared");
    assert_eq!(commits.len(), 3);
    assert_eq!(commits[1].paths, vec!["svc-x-prod/requirements.yaml".to_string()]);
    assert_eq!(commits[2].paths, vec!["svc-x-prod/values.yaml".to_string()]);
    assert_eq!(
        ctx.history(dto.installed_app_version_history_id).await.git_hash.as_deref(),
        Some(commits[2].hash.as_str())
    );
}

#[tokio::test]
async fn test_gitops_unconfigured_is_rejected() {
    let ctx = TestContext::with_settings(DeploymentSettings {
        gitops_configured: false,
        ..DeploymentSettings::default()
    })
    .await;

    let err = ctx
        .orchestrator
        .install_app(
            &ctx.ctx(),
            install_request_as("svc-a", CHART_A, "replicas: 1\n", DeploymentAppType::GitOps),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GitOpsNotConfigured));
    assert_eq!(err.status_code(), 400);

    // Without an explicit backend the helm path is chosen
    let dto = ctx.install("svc-a", CHART_A, "replicas: 1\n").await;
    assert_eq!(dto.deployment_app_type, Some(DeploymentAppType::Helm));
}

#[tokio::test]
async fn test_git_failure_keeps_rows_and_records_failure() {
    let ctx = TestContext::new().await;
    ctx.git.fail_commits("connection reset by peer");

    let err = ctx
        .orchestrator
        .install_app(&ctx.ctx(), install_request("svc-a", CHART_A, "replicas: 1\n"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Git(_)));

    let app = ctx
        .store
        .find_active_app_by_name("svc-a")
        .await
        .unwrap()
        .expect("app row missing");
    let installed_app = ctx
        .store
        .find_active_installed_app(app.id, PROD_ENV_ID)
        .await
        .unwrap()
        .expect("installed app row missing");
    assert_eq!(installed_app.status, AppstoreDeploymentStatus::GitError);

    let rows = ctx
        .store
        .list_history_for_installed_app(installed_app.id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].history.status, HistoryStatus::Failed);
    assert_eq!(
        ctx.timeline_statuses(rows[0].history.id).await,
        vec![TimelineStatus::DeploymentInitiated, TimelineStatus::GitCommitFailed]
    );
    assert!(ctx.engine.app_names().is_empty());
}

#[tokio::test]
async fn test_engine_failure_marks_acd_error() {
    let ctx = TestContext::new().await;
    ctx.engine.fail_operation("create");

    let err = ctx
        .orchestrator
        .install_app(&ctx.ctx(), install_request("svc-a", CHART_A, "replicas: 1\n"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Engine(_)));

    let app = ctx.store.find_active_app_by_name("svc-a").await.unwrap().unwrap();
    let installed_app = ctx
        .store
        .find_active_installed_app(app.id, PROD_ENV_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(installed_app.status, AppstoreDeploymentStatus::AcdError);

    let rows = ctx
        .store
        .list_history_for_installed_app(installed_app.id)
        .await
        .unwrap();
    assert_eq!(rows[0].history.status, HistoryStatus::Failed);
    assert!(rows[0].history.git_hash.is_some());
    assert_eq!(
        ctx.timeline_statuses(rows[0].history.id).await,
        vec![
            TimelineStatus::DeploymentInitiated,
            TimelineStatus::GitCommit,
            TimelineStatus::DeploymentFailed,
        ]
    );
}

#[tokio::test]
async fn test_values_round_trip() {
    let ctx = TestContext::new().await;
    let values = "# tuned for prod\nreplicas:   3\nimage:\n  tag: \"1.25\"   # pinned\n";

    let dto = ctx.install("svc-a", CHART_A, values).await;

    let history = ctx.history(dto.installed_app_version_history_id).await;
    assert_eq!(history.values_yaml_raw, values);

    let version = ctx
        .store
        .get_installed_app_version(dto.installed_app_version_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(version.values_yaml_raw, values);

    let detail = ctx
        .orchestrator
        .get_deployment_history_info(dto.installed_app_id, history.id)
        .await
        .unwrap();
    assert_eq!(detail.values_yaml.as_deref(), Some(values));
    assert!(detail.manifest.is_some());
}

#[tokio::test]
async fn test_invalid_values_are_rejected_before_recording() {
    let ctx = TestContext::new().await;

    let err = ctx
        .orchestrator
        .install_app(&ctx.ctx(), install_request("svc-a", CHART_A, "replicas: [1\n"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 400);
    assert!(ctx.store.find_active_app_by_name("svc-a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_deployment_history_lists_attempts() {
    let ctx = TestContext::new().await;
    let dto = ctx.install("svc-a", CHART_A, "replicas: 2\n").await;

    let response = ctx
        .orchestrator
        .get_deployment_history(dto.installed_app_id)
        .await
        .unwrap();

    assert_eq!(response.installed_app_info.app_name, "svc-a");
    assert_eq!(response.installed_app_info.environment_name, "prod");
    assert_eq!(
        response.installed_app_info.deployment_app_type,
        DeploymentAppType::GitOps
    );
    assert_eq!(response.deployment_history.len(), 1);
    let entry = &response.deployment_history[0];
    assert_eq!(entry.id, dto.installed_app_version_history_id);
    assert_eq!(entry.chart_version, "1.2.3");
    assert_eq!(entry.status, HistoryStatus::Succeeded);

    let timelines = ctx
        .orchestrator
        .fetch_timelines(dto.installed_app_id, None)
        .await
        .unwrap();
    assert_eq!(timelines.installed_app_version_history_id, entry.id);
    assert_eq!(timelines.timelines.len(), 2);
}
