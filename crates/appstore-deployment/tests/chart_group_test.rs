// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for chart group installs and the bulk deploy pipeline.

mod common;

use std::sync::Arc;

use appstore_deployment::chart_group::{
    ChannelBulkDeployQueue, ChartGroupInstallChartRequest, ChartGroupInstallRequest,
    ChartGroupService,
};
use appstore_state::{AppstoreDeploymentStatus, DeploymentAppType, ReferenceValueKind};
use common::*;

fn chart(app_name: &str, values: &str) -> ChartGroupInstallChartRequest {
    ChartGroupInstallChartRequest {
        app_name: app_name.to_string(),
        environment_id: PROD_ENV_ID,
        app_store_version: CHART_A,
        values_override_yaml: values.to_string(),
        reference_value_id: None,
        reference_value_kind: ReferenceValueKind::Default,
        chart_group_entry_id: None,
    }
}

#[tokio::test]
async fn test_bulk_install_enqueues_then_deploys() {
    let ctx = TestContext::new().await;
    let (queue, mut receiver) = ChannelBulkDeployQueue::channel(8);
    let service = ChartGroupService::new(ctx.orchestrator.clone(), Arc::new(queue));

    let dtos = service
        .deploy_bulk(ChartGroupInstallRequest {
            project_id: 1,
            chart_group_id: Some(12),
            user_id: 7,
            charts: vec![
                ChartGroupInstallChartRequest {
                    chart_group_entry_id: Some(100),
                    ..chart("svc-a", "replicas: 1\n")
                },
                ChartGroupInstallChartRequest {
                    chart_group_entry_id: Some(101),
                    ..chart("svc-b", "replicas: 2\n")
                },
            ],
        })
        .await
        .unwrap();

    assert_eq!(dtos.len(), 2);
    for dto in &dtos {
        assert_eq!(dto.status, Some(AppstoreDeploymentStatus::Enqueued));
        assert_eq!(dto.deployment_app_type, Some(DeploymentAppType::GitOps));
        assert_eq!(
            ctx.installed_app(dto.installed_app_id).await.status,
            AppstoreDeploymentStatus::Enqueued
        );
        let links = ctx
            .store
            .list_chart_group_deployments(dto.installed_app_id)
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].chart_group_id, 12);
    }
    // Nothing is deployed before the payloads are consumed
    assert!(ctx.git.created_repositories().is_empty());

    let mut payloads = Vec::new();
    for _ in 0..2 {
        payloads.push(receiver.recv().await.unwrap());
    }
    assert_eq!(payloads[0].installed_app_version_id, dtos[0].installed_app_version_id);
    assert_eq!(
        payloads[1].installed_app_version_history_id,
        dtos[1].installed_app_version_history_id
    );

    for payload in &payloads {
        let deployed = ctx
            .orchestrator
            .perform_deploy_stage(&ctx.ctx(), payload)
            .await
            .unwrap();
        assert_deployed(&deployed);
        assert_succeeded(&ctx.history(payload.installed_app_version_history_id).await);
    }
    assert_eq!(
        ctx.git.created_repositories(),
        vec!["svc-a".to_string(), "svc-b".to_string()]
    );
    assert!(ctx.engine.app("svc-a-prod").is_some());
    assert!(ctx.engine.app("svc-b-prod").is_some());

    // A redelivered payload does not redo the deployment
    let commit_calls = ctx.git.commit_calls();
    let again = ctx
        .orchestrator
        .perform_deploy_stage(&ctx.ctx(), &payloads[0])
        .await
        .unwrap();
    assert_deployed(&again);
    assert_eq!(ctx.git.commit_calls(), commit_calls);
}

#[tokio::test]
async fn test_bulk_deploy_resumes_after_engine_failure() {
    let ctx = TestContext::new().await;
    let (queue, mut receiver) = ChannelBulkDeployQueue::channel(8);
    let service = ChartGroupService::new(ctx.orchestrator.clone(), Arc::new(queue));
    service
        .deploy_bulk(ChartGroupInstallRequest {
            project_id: 1,
            chart_group_id: None,
            user_id: 7,
            charts: vec![chart("svc-a", "replicas: 1\n")],
        })
        .await
        .unwrap();
    let payload = receiver.recv().await.unwrap();

    // Both the registration and its retry fail
    ctx.engine.fail_register_repo(2);
    let err = ctx
        .orchestrator
        .perform_deploy_stage(&ctx.ctx(), &payload)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 500);

    let installed_app = ctx
        .store
        .get_installed_app_version(payload.installed_app_version_id)
        .await
        .unwrap()
        .unwrap()
        .installed_app_id;
    assert_eq!(
        ctx.installed_app(installed_app).await.status,
        AppstoreDeploymentStatus::AcdError
    );
    let commit_calls = ctx.git.commit_calls();
    assert!(commit_calls > 0);

    // Git phase already succeeded: the retry only runs the engine phase
    let deployed = ctx
        .orchestrator
        .perform_deploy_stage(&ctx.ctx(), &payload)
        .await
        .unwrap();
    assert_deployed(&deployed);
    assert_eq!(ctx.git.commit_calls(), commit_calls);
    assert!(ctx.engine.app("svc-a-prod").is_some());
}

#[tokio::test]
async fn test_bulk_values_from_reference() {
    let ctx = TestContext::new().await;
    ctx.catalog
        .add_reference_values(ReferenceValueKind::Template, 900, "replicas: 5\n");
    let (queue, _receiver) = ChannelBulkDeployQueue::channel(8);
    let service = ChartGroupService::new(ctx.orchestrator.clone(), Arc::new(queue));

    let dtos = service
        .deploy_bulk(ChartGroupInstallRequest {
            project_id: 1,
            chart_group_id: None,
            user_id: 7,
            charts: vec![ChartGroupInstallChartRequest {
                reference_value_id: Some(900),
                reference_value_kind: ReferenceValueKind::Template,
                ..chart("svc-a", "")
            }],
        })
        .await
        .unwrap();

    let version = ctx
        .store
        .get_installed_app_version(dtos[0].installed_app_version_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(version.values_yaml_raw, "replicas: 5\n");
    assert_eq!(version.reference_value_kind, ReferenceValueKind::Template);
}

#[tokio::test]
async fn test_bulk_validation_failure_records_nothing() {
    let ctx = TestContext::new().await;
    let (queue, _receiver) = ChannelBulkDeployQueue::channel(8);
    let service = ChartGroupService::new(ctx.orchestrator.clone(), Arc::new(queue));

    let err = service
        .deploy_bulk(ChartGroupInstallRequest {
            project_id: 1,
            chart_group_id: None,
            user_id: 7,
            charts: vec![chart("svc-a", "replicas: 1\n"), chart("svc-b", "replicas: [\n")],
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert!(ctx.store.find_active_app_by_name("svc-a").await.unwrap().is_none());

    let err = service
        .deploy_bulk(ChartGroupInstallRequest {
            project_id: 1,
            chart_group_id: None,
            user_id: 7,
            charts: Vec::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_closed_queue_marks_que_error() {
    let ctx = TestContext::new().await;
    let (queue, receiver) = ChannelBulkDeployQueue::channel(1);
    drop(receiver);
    let service = ChartGroupService::new(ctx.orchestrator.clone(), Arc::new(queue));

    let dtos = service
        .deploy_bulk(ChartGroupInstallRequest {
            project_id: 1,
            chart_group_id: None,
            user_id: 7,
            charts: vec![chart("svc-a", "replicas: 1\n")],
        })
        .await
        .unwrap();

    assert_eq!(dtos[0].status, Some(AppstoreDeploymentStatus::QueError));
    assert_eq!(
        ctx.installed_app(dtos[0].installed_app_id).await.status,
        AppstoreDeploymentStatus::QueError
    );
}

#[tokio::test]
async fn test_default_cluster_components() {
    let ctx = TestContext::new().await;
    let (queue, _receiver) = ChannelBulkDeployQueue::channel(8);
    let service = ChartGroupService::new(ctx.orchestrator.clone(), Arc::new(queue));

    let dtos = service
        .deploy_default_chart_on_cluster(PROD_CLUSTER_ID, 1, vec![chart("metrics", "")], 7)
        .await
        .unwrap();

    let markers = ctx
        .store
        .list_cluster_installed_apps(PROD_CLUSTER_ID)
        .await
        .unwrap();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].installed_app_id, dtos[0].installed_app_id);
}
