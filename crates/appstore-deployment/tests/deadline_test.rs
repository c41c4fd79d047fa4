// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for runs cut short by the request deadline.

mod common;

use std::time::Duration;

use appstore_deployment::config::DeploymentSettings;
use appstore_state::{AppstoreDeploymentStatus, DeploymentAppType, HistoryStatus, TimelineStatus};
use common::*;

const DEADLINE: Duration = Duration::from_millis(300);
const SLOW_CALL: Duration = Duration::from_secs(60);

fn short_deadline() -> DeploymentSettings {
    DeploymentSettings {
        orchestration_timeout: DEADLINE,
        ..DeploymentSettings::default()
    }
}

fn assert_no_failure_timeline(statuses: &[TimelineStatus]) {
    assert!(
        !statuses.iter().any(|s| matches!(
            s,
            TimelineStatus::DeploymentFailed | TimelineStatus::GitCommitFailed
        )),
        "{:?}",
        statuses
    );
}

#[tokio::test]
async fn test_helm_install_past_deadline() {
    let ctx = TestContext::with_settings(short_deadline()).await;
    ctx.helm.delay_calls(SLOW_CALL);

    let err = ctx
        .orchestrator
        .install_app(
            &ctx.ctx(),
            install_request_as("svc-h", CHART_A, "replicas: 1\n", DeploymentAppType::Helm),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 504);
    assert_eq!(err.error_code(), "DEADLINE_EXCEEDED");

    let app = ctx.store.find_active_app_by_name("svc-h").await.unwrap().unwrap();
    let installed_app = ctx
        .store
        .find_active_installed_app(app.id, PROD_ENV_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(installed_app.status, AppstoreDeploymentStatus::HelmError);

    let rows = ctx
        .store
        .list_history_for_installed_app(installed_app.id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let history = &rows[0].history;
    assert_eq!(history.status, HistoryStatus::Failed);
    let statuses = ctx.timeline_statuses(history.id).await;
    assert!(statuses.is_empty(), "{:?}", statuses);
}

#[tokio::test]
async fn test_gitops_install_past_deadline() {
    let ctx = TestContext::with_settings(short_deadline()).await;
    ctx.engine.delay_calls(SLOW_CALL);

    let err = ctx
        .orchestrator
        .install_app(&ctx.ctx(), install_request("svc-a", CHART_A, "replicas: 1\n"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 504);

    // Git was written, the engine never answered
    assert!(ctx.git.file("svc-a", "svc-a-prod/values.yaml").is_some());
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
    let history = &rows[0].history;
    assert_eq!(history.status, HistoryStatus::Failed);
    let statuses = ctx.timeline_statuses(history.id).await;
    assert!(statuses.contains(&TimelineStatus::GitCommit), "{:?}", statuses);
    assert_no_failure_timeline(&statuses);
}
