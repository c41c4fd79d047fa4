// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the embeddable runtime and its background workers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use appstore_deployment::bulk_deploy_worker::BulkDeployWorkerConfig;
use appstore_deployment::chart_group::{ChartGroupInstallChartRequest, ChartGroupInstallRequest};
use appstore_deployment::config::DeploymentSettings;
use appstore_deployment::reconciler_worker::OrphanReconcilerWorkerConfig;
use appstore_deployment::runtime::DeploymentRuntime;
use appstore_state::{AppstoreDeploymentStatus, DeploymentAppType, ReferenceValueKind};
use common::*;

fn helm_only() -> DeploymentSettings {
    DeploymentSettings {
        gitops_configured: false,
        ..DeploymentSettings::default()
    }
}

#[test]
fn test_builder_requires_store() {
    let result = DeploymentRuntime::builder().build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_runtime_deploys_bulk_installs() {
    let ctx = TestContext::with_settings(helm_only()).await;

    let runtime = DeploymentRuntime::builder()
        .store(ctx.store.clone())
        .catalog(Arc::new(ctx.catalog.clone()))
        .environments(Arc::new(ctx.catalog.clone()))
        .helm(Arc::new(ctx.helm.clone()))
        .settings(helm_only())
        .engine_token(TOKEN)
        .bulk_deploy_config(BulkDeployWorkerConfig { enabled: true })
        .reconciler_config(OrphanReconcilerWorkerConfig {
            enabled: true,
            poll_interval: Duration::from_millis(50),
            batch_size: 10,
        })
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    assert!(runtime.is_running());

    let dtos = runtime
        .chart_groups()
        .deploy_bulk(ChartGroupInstallRequest {
            project_id: 1,
            chart_group_id: None,
            user_id: 7,
            charts: vec![ChartGroupInstallChartRequest {
                app_name: "svc-h".to_string(),
                environment_id: PROD_ENV_ID,
                app_store_version: CHART_A,
                values_override_yaml: "replicas: 1\n".to_string(),
                reference_value_id: None,
                reference_value_kind: ReferenceValueKind::Default,
                chart_group_entry_id: None,
            }],
        })
        .await
        .unwrap();
    assert_eq!(dtos[0].deployment_app_type, Some(DeploymentAppType::Helm));

    let installed_app_id = dtos[0].installed_app_id;
    let mut status = AppstoreDeploymentStatus::Enqueued;
    for _ in 0..100 {
        status = ctx.installed_app(installed_app_id).await.status;
        if status == AppstoreDeploymentStatus::DeploySuccess {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, AppstoreDeploymentStatus::DeploySuccess);
    assert_eq!(ctx.helm.install_requests().len(), 1);

    runtime.shutdown().await.unwrap();
}
