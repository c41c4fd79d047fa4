// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application Store Deployment Engine - server binary
//!
//! Connects to the release state database, wires the Git provider, the
//! deployment engine and the helm service, then runs the background workers
//! until interrupted.

use std::sync::Arc;
use tracing::{info, warn};

use appstore_deployment::backend::GitOpsBackend;
use appstore_deployment::catalog::PgCatalog;
use appstore_deployment::config::Config;
use appstore_deployment::engine::{ArgoEngineClient, EngineAdapter};
use appstore_deployment::gitops::{GitOpsRepoService, provider_from_config};
use appstore_deployment::helm::HttpHelmClient;
use appstore_deployment::manifest::ManifestBuilder;
use appstore_deployment::runtime::DeploymentRuntime;
use appstore_state::PostgresPersistence;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appstore_deployment=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        integration_mode = ?config.integration_mode,
        gitops_provider = ?config.gitops.as_ref().map(|g| g.provider),
        helm_service = %config.helm.service_url,
        "Starting deployment engine"
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    appstore_state::migrations::run_postgres(&pool).await?;

    info!("Database schema verified");

    let store = Arc::new(PostgresPersistence::new(pool.clone()));
    let catalog = Arc::new(PgCatalog::new(pool));
    let helm = Arc::new(HttpHelmClient::new(&config.helm.service_url)?);

    let mut builder = DeploymentRuntime::builder()
        .store(store.clone())
        .catalog(catalog.clone())
        .environments(catalog)
        .helm(helm)
        .settings(config.deployment_settings())
        .engine_token(config.engine.token.clone());

    match (&config.gitops, &config.engine.url) {
        (Some(gitops), Some(engine_url)) => {
            let provider = provider_from_config(gitops)?;
            let repos = Arc::new(GitOpsRepoService::new(provider, gitops));
            let engine_api = Arc::new(ArgoEngineClient::new(reqwest::Client::new(), engine_url));
            let engine = Arc::new(EngineAdapter::new(engine_api, &config.engine));
            let manifests = ManifestBuilder::new(&config.chart_work_dir);
            builder = builder.gitops(GitOpsBackend::new(store, repos, engine, manifests));
            info!(provider = %gitops.provider, "GitOps enabled");
        }
        (Some(_), None) => warn!("GITOPS_PROVIDER is set but ENGINE_URL is not; GitOps disabled"),
        _ => info!("GitOps not configured"),
    }

    let runtime = builder.build()?.start().await?;

    info!("Deployment engine ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("Deployment engine shut down");

    Ok(())
}
