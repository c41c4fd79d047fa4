// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for appstore-deployment integration tests.
//!
//! Provides TestContext wiring the orchestrator to a SQLite release store and
//! in-memory Git provider, deployment engine, helm service and catalog.

#![allow(dead_code)]

use std::sync::Arc;

use appstore_state::{
    AppstoreDeploymentStatus, DeploymentAppType, HistoryStatus, InstalledAppRecord,
    InstalledAppVersionHistoryRecord, Persistence, ReferenceValueKind, SqlitePersistence,
    TimelineStatus,
};

use appstore_deployment::backend::GitOpsBackend;
use appstore_deployment::catalog::{ChartOrigin, ChartVersion, EnvironmentInfo, InMemoryCatalog};
use appstore_deployment::config::{DeploymentSettings, EngineConfig};
use appstore_deployment::engine::{EngineAdapter, MockEngine};
use appstore_deployment::gitops::{GitOpsRepoService, MockGitProvider};
use appstore_deployment::helm::MockHelmClient;
use appstore_deployment::manifest::ManifestBuilder;
use appstore_deployment::orchestrator::{
    AppStoreOrchestrator, InstallAppRequest, InstallAppVersionDto, RequestContext,
};

/// Environment on a reachable cluster.
pub const PROD_ENV_ID: i64 = 2;
/// Virtual environment.
pub const VIRTUAL_ENV_ID: i64 = 3;
/// Cluster hosting [`PROD_ENV_ID`].
pub const PROD_CLUSTER_ID: i64 = 1;

/// nginx 1.2.3 from a classic chart repository.
pub const CHART_A: i64 = 55;
/// nginx 1.3.0 from a classic chart repository.
pub const CHART_B: i64 = 56;
/// nginx 1.2.3 from an OCI registry.
pub const OCI_CHART: i64 = 70;

/// Token carried by every request.
pub const TOKEN: &str = "engine-token";

/// Test context holding the orchestrator and every mocked collaborator.
pub struct TestContext {
    pub orchestrator: Arc<AppStoreOrchestrator>,
    pub store: Arc<dyn Persistence>,
    pub catalog: InMemoryCatalog,
    pub git: MockGitProvider,
    pub engine: MockEngine,
    pub helm: MockHelmClient,
    _temp_dir: tempfile::TempDir,
}

fn repo_chart(id: i64, version: &str) -> ChartVersion {
    ChartVersion {
        id,
        app_store_id: 9,
        chart_name: "nginx".to_string(),
        version: version.to_string(),
        default_values_yaml: "replicas: 1\n".to_string(),
        values_schema_json: None,
        origin: ChartOrigin::Repository {
            name: "bitnami".to_string(),
            url: "https://charts.bitnami.com/bitnami".to_string(),
            username: None,
            password: None,
            active: true,
        },
    }
}

fn oci_chart(id: i64) -> ChartVersion {
    ChartVersion {
        id,
        app_store_id: 10,
        chart_name: "nginx".to_string(),
        version: "1.2.3".to_string(),
        default_values_yaml: String::new(),
        values_schema_json: None,
        origin: ChartOrigin::Oci {
            registry_id: "ecr-main".to_string(),
            registry_url: "registry.example.com/charts".to_string(),
            username: None,
            password: None,
        },
    }
}

impl TestContext {
    /// Context with GitOps enabled and default policy.
    pub async fn new() -> Self {
        Self::with_settings(DeploymentSettings::default()).await
    }

    /// Context with GitOps enabled and the given policy.
    pub async fn with_settings(settings: DeploymentSettings) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let store: Arc<dyn Persistence> = Arc::new(
            SqlitePersistence::from_path(temp_dir.path().join("appstore.db"))
                .await
                .expect("Failed to open SQLite store"),
        );

        let catalog = InMemoryCatalog::new();
        catalog.add_chart(repo_chart(CHART_A, "1.2.3"));
        catalog.add_chart(repo_chart(CHART_B, "1.3.0"));
        catalog.add_chart(oci_chart(OCI_CHART));
        catalog.add_environment(EnvironmentInfo {
            id: PROD_ENV_ID,
            name: "prod".to_string(),
            namespace: "prod-ns".to_string(),
            cluster_id: PROD_CLUSTER_ID,
            cluster_name: "default_cluster".to_string(),
            cluster_server_url: "https://kubernetes.default.svc".to_string(),
            is_virtual: false,
        });
        catalog.add_environment(EnvironmentInfo {
            id: VIRTUAL_ENV_ID,
            name: "virtual".to_string(),
            namespace: "virtual-ns".to_string(),
            cluster_id: 5,
            cluster_name: "virtual_cluster".to_string(),
            cluster_server_url: String::new(),
            is_virtual: true,
        });

        let git = MockGitProvider::new();
        let engine = MockEngine::new();
        let helm = MockHelmClient::new();

        let repos = Arc::new(GitOpsRepoService::with_author(
            Arc::new(git.clone()),
            "",
            "appstore-bot",
            "appstore-bot@localhost",
        ));
        let engine_config = EngineConfig {
            auto_sync_enabled: settings.auto_sync_enabled,
            ..EngineConfig::default()
        };
        let adapter = Arc::new(EngineAdapter::new(Arc::new(engine.clone()), &engine_config));
        let gitops = GitOpsBackend::new(
            store.clone(),
            repos,
            adapter,
            ManifestBuilder::new(temp_dir.path().join("charts")),
        );

        let catalog_arc = Arc::new(catalog.clone());
        let orchestrator = AppStoreOrchestrator::new(
            store.clone(),
            catalog_arc.clone(),
            catalog_arc,
            Arc::new(helm.clone()),
            settings,
        )
        .with_gitops(gitops);

        Self {
            orchestrator: Arc::new(orchestrator),
            store,
            catalog,
            git,
            engine,
            helm,
            _temp_dir: temp_dir,
        }
    }

    /// Request context carrying [`TOKEN`].
    pub fn ctx(&self) -> RequestContext {
        RequestContext::new(TOKEN)
    }

    /// Install `app_name` into the prod environment with the resolved backend.
    pub async fn install(&self, app_name: &str, chart_id: i64, values: &str) -> InstallAppVersionDto {
        self.orchestrator
            .install_app(&self.ctx(), install_request(app_name, chart_id, values))
            .await
            .expect("install failed")
    }

    /// Installation row.
    pub async fn installed_app(&self, installed_app_id: i64) -> InstalledAppRecord {
        self.store
            .get_installed_app(installed_app_id)
            .await
            .expect("store error")
            .expect("installed app missing")
    }

    /// History row.
    pub async fn history(&self, history_id: i64) -> InstalledAppVersionHistoryRecord {
        self.store
            .get_history(history_id)
            .await
            .expect("store error")
            .expect("history missing")
    }

    /// Timeline statuses of a history row, in order.
    pub async fn timeline_statuses(&self, history_id: i64) -> Vec<TimelineStatus> {
        self.store
            .list_timelines(history_id)
            .await
            .expect("store error")
            .into_iter()
            .map(|t| t.status)
            .collect()
    }

    /// Number of non-terminal history rows of a version.
    pub async fn open_histories(&self, installed_app_version_id: i64) -> usize {
        self.store
            .list_history_for_version(installed_app_version_id)
            .await
            .expect("store error")
            .into_iter()
            .filter(|h| !h.status.is_terminal())
            .count()
    }
}

/// Install request for the prod environment with backend resolution left to policy.
pub fn install_request(app_name: &str, chart_id: i64, values: &str) -> InstallAppRequest {
    InstallAppRequest {
        app_name: app_name.to_string(),
        team_id: 1,
        environment_id: PROD_ENV_ID,
        app_store_application_version_id: chart_id,
        values_override_yaml: values.to_string(),
        reference_value_kind: ReferenceValueKind::Default,
        git_ops_repo_url: Some("Default".to_string()),
        user_id: 7,
        ..Default::default()
    }
}

/// Same as [`install_request`] with an explicit backend.
pub fn install_request_as(
    app_name: &str,
    chart_id: i64,
    values: &str,
    app_type: DeploymentAppType,
) -> InstallAppRequest {
    InstallAppRequest {
        deployment_app_type: Some(app_type),
        ..install_request(app_name, chart_id, values)
    }
}

/// Assert an installation finished.
pub fn assert_deployed(dto: &InstallAppVersionDto) {
    assert_eq!(dto.status, Some(AppstoreDeploymentStatus::DeploySuccess));
}

/// Assert a history row succeeded.
pub fn assert_succeeded(history: &InstalledAppVersionHistoryRecord) {
    assert_eq!(history.status, HistoryStatus::Succeeded, "{:?}", history.message);
}
