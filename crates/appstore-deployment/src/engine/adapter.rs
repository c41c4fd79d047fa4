// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Time-bounded façade over [`EngineApi`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use super::{AppTemplate, Application, EngineApi, EngineError};
use crate::config::EngineConfig;
use crate::gitops::DEFAULT_BRANCH;

/// Deployment engine adapter used by the orchestrator.
#[derive(Clone)]
pub struct EngineAdapter {
    api: Arc<dyn EngineApi>,
    read_timeout: Duration,
    write_timeout: Duration,
    auto_sync_enabled: bool,
}

impl EngineAdapter {
    /// Wrap `api` with the configured deadlines and sync mode.
    pub fn new(api: Arc<dyn EngineApi>, config: &EngineConfig) -> Self {
        Self {
            api,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            auto_sync_enabled: config.auto_sync_enabled,
        }
    }

    /// Override the per-call deadlines.
    pub fn with_timeouts(mut self, read_timeout: Duration, write_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self
    }

    /// Whether app objects are created with automated sync.
    pub fn auto_sync_enabled(&self) -> bool {
        self.auto_sync_enabled
    }

    async fn bounded<T, F>(
        &self,
        operation: &'static str,
        timeout: Duration,
        call: F,
    ) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout { operation, timeout }),
        }
    }

    /// Fetch an app object.
    pub async fn get(&self, token: &str, name: &str) -> Result<Application, EngineError> {
        self.bounded("get", self.read_timeout, self.api.get(token, name))
            .await
    }

    /// Whether the app object exists.
    pub async fn app_exists(&self, token: &str, name: &str) -> Result<bool, EngineError> {
        match self.get(token, name).await {
            Ok(_) => Ok(true),
            Err(EngineError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Create the app object described by `template`.
    pub async fn create_app(
        &self,
        token: &str,
        template: &AppTemplate,
    ) -> Result<Application, EngineError> {
        let application = template.to_application();
        let created = self
            .bounded(
                "create",
                self.write_timeout,
                self.api.create(token, &application),
            )
            .await?;
        info!(app = %template.name, repo = %template.repo_url, "Created engine application");
        Ok(created)
    }

    /// Point the app object at a new repository location and align its sync
    /// mode with the configured one, in a single write.
    pub async fn patch_source(
        &self,
        token: &str,
        name: &str,
        repo_url: &str,
        chart_location: &str,
    ) -> Result<Application, EngineError> {
        let patch = json!({
            "spec": {
                "source": {
                    "repoURL": repo_url,
                    "path": chart_location,
                    "targetRevision": DEFAULT_BRANCH,
                },
                "syncPolicy": self.sync_policy_patch(),
            }
        });
        let patched = self
            .bounded("patch", self.write_timeout, self.api.patch(token, name, &patch))
            .await?;
        info!(
            app = name,
            repo = repo_url,
            auto_sync = self.auto_sync_enabled,
            "Patched engine application source"
        );
        Ok(patched)
    }

    /// Merge-patch body for the configured sync mode. A null `automated`
    /// removes automated sync.
    fn sync_policy_patch(&self) -> serde_json::Value {
        if self.auto_sync_enabled {
            json!({ "automated": { "prune": true, "selfHeal": true } })
        } else {
            json!({ "automated": null })
        }
    }

    /// Delete an app object.
    pub async fn delete(&self, token: &str, name: &str, cascade: bool) -> Result<(), EngineError> {
        self.bounded(
            "delete",
            self.write_timeout,
            self.api.delete(token, name, cascade),
        )
        .await
    }

    /// Ask the engine to re-read the app's source.
    pub async fn refresh(&self, token: &str, name: &str) -> Result<Application, EngineError> {
        self.bounded("refresh", self.read_timeout, self.api.refresh(token, name))
            .await
    }

    /// Trigger a sync to the default branch.
    pub async fn sync(&self, token: &str, name: &str) -> Result<(), EngineError> {
        self.bounded(
            "sync",
            self.write_timeout,
            self.api.sync(token, name, DEFAULT_BRANCH),
        )
        .await
    }

    /// Register a repository, retrying once on a transient failure.
    pub async fn register_repo_with_retry(
        &self,
        token: &str,
        repo_url: &str,
    ) -> Result<(), EngineError> {
        let register = || {
            self.bounded(
                "register_repo",
                self.write_timeout,
                self.api.register_repo(token, repo_url),
            )
        };
        match register().await {
            Err(err) if err.is_transient() => {
                warn!(repo = repo_url, error = %err, "Repository registration failed, retrying");
                register().await
            }
            other => other,
        }
    }

    /// Align the object's sync mode with the configured one.
    ///
    /// Returns whether the object was updated.
    pub async fn update_sync_mode_if_needed(
        &self,
        token: &str,
        name: &str,
    ) -> Result<bool, EngineError> {
        let mut application = self.get(token, name).await?;
        if application.is_auto_sync() == self.auto_sync_enabled {
            return Ok(false);
        }
        application.set_auto_sync(self.auto_sync_enabled);
        application.status = None;
        self.bounded(
            "update",
            self.write_timeout,
            self.api.update(token, &application),
        )
        .await?;
        debug!(app = name, auto_sync = self.auto_sync_enabled, "Updated engine sync mode");
        Ok(true)
    }

    /// Sync explicitly when automated sync is off, then refresh.
    pub async fn sync_if_needed_and_refresh(
        &self,
        token: &str,
        name: &str,
    ) -> Result<Application, EngineError> {
        if !self.auto_sync_enabled {
            self.sync(token, name).await?;
        }
        self.refresh(token, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockEngine, SyncPolicyAutomated};
    use async_trait::async_trait;

    fn template(auto_sync: bool) -> AppTemplate {
        AppTemplate {
            name: "svc-a-prod".to_string(),
            repo_url: "https://github.com/acme/svc-a.git".to_string(),
            chart_location: "svc-a-prod".to_string(),
            target_revision: "master".to_string(),
            target_server: "https://k".to_string(),
            target_namespace: "prod".to_string(),
            value_file: "values.yaml".to_string(),
            auto_sync,
        }
    }

    fn adapter(engine: &MockEngine, auto_sync: bool) -> EngineAdapter {
        EngineAdapter::new(
            Arc::new(engine.clone()),
            &EngineConfig {
                auto_sync_enabled: auto_sync,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_manual_sync_mode_syncs_before_refresh() {
        let engine = MockEngine::new();
        let adapter = adapter(&engine, false);
        adapter.create_app("t", &template(false)).await.unwrap();

        adapter.sync_if_needed_and_refresh("t", "svc-a-prod").await.unwrap();
        assert_eq!(
            engine.calls(),
            vec![
                "create svc-a-prod".to_string(),
                "sync svc-a-prod".to_string(),
                "refresh svc-a-prod".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_auto_sync_mode_only_refreshes() {
        let engine = MockEngine::new();
        let adapter = adapter(&engine, true);
        adapter.create_app("t", &template(true)).await.unwrap();

        adapter.sync_if_needed_and_refresh("t", "svc-a-prod").await.unwrap();
        assert!(!engine.calls().iter().any(|c| c.starts_with("sync")));
    }

    #[tokio::test]
    async fn test_update_sync_mode_only_when_different() {
        let engine = MockEngine::new();
        adapter(&engine, false)
            .create_app("t", &template(false))
            .await
            .unwrap();

        let adapter = adapter(&engine, true);
        assert!(adapter.update_sync_mode_if_needed("t", "svc-a-prod").await.unwrap());
        assert!(engine.app("svc-a-prod").unwrap().is_auto_sync());
        assert!(!adapter.update_sync_mode_if_needed("t", "svc-a-prod").await.unwrap());
    }

    #[tokio::test]
    async fn test_register_repo_retries_once() {
        let engine = MockEngine::new();
        engine.fail_register_repo(1);
        let adapter = adapter(&engine, true);

        adapter
            .register_repo_with_retry("t", "https://github.com/acme/svc-a.git")
            .await
            .unwrap();
        assert_eq!(engine.registered_repos().len(), 1);

        engine.fail_register_repo(2);
        assert!(adapter
            .register_repo_with_retry("t", "https://github.com/acme/svc-b.git")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_patch_source_rewrites_repo() {
        let engine = MockEngine::new();
        let adapter = adapter(&engine, true);
        adapter.create_app("t", &template(true)).await.unwrap();

        adapter
            .patch_source("t", "svc-a-prod", "https://github.com/acme/new.git", "svc-a-prod")
            .await
            .unwrap();
        let app = engine.app("svc-a-prod").unwrap();
        assert_eq!(app.spec.source.repo_url, "https://github.com/acme/new.git");
        assert_eq!(app.spec.source.target_revision, "master");
    }

    #[tokio::test]
    async fn test_patch_source_carries_sync_mode() {
        let engine = MockEngine::new();
        adapter(&engine, false)
            .create_app("t", &template(false))
            .await
            .unwrap();

        adapter(&engine, true)
            .patch_source("t", "svc-a-prod", "https://github.com/acme/new.git", "svc-a-prod")
            .await
            .unwrap();
        let app = engine.app("svc-a-prod").unwrap();
        assert!(app.is_auto_sync());
        assert_eq!(
            app.spec.sync_policy.unwrap().automated,
            Some(SyncPolicyAutomated {
                prune: true,
                self_heal: true
            })
        );

        adapter(&engine, false)
            .patch_source("t", "svc-a-prod", "https://github.com/acme/new.git", "svc-a-prod")
            .await
            .unwrap();
        assert!(!engine.app("svc-a-prod").unwrap().is_auto_sync());

        // One write per alignment, no separate update
        assert_eq!(
            engine.calls(),
            vec![
                "create svc-a-prod".to_string(),
                "patch svc-a-prod".to_string(),
                "patch svc-a-prod".to_string(),
            ]
        );
    }

    struct SlowEngine;

    #[async_trait]
    impl EngineApi for SlowEngine {
        async fn get(&self, _: &str, name: &str) -> Result<Application, EngineError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(EngineError::NotFound {
                name: name.to_string(),
            })
        }
        async fn create(&self, _: &str, a: &Application) -> Result<Application, EngineError> {
            Ok(a.clone())
        }
        async fn update(&self, _: &str, a: &Application) -> Result<Application, EngineError> {
            Ok(a.clone())
        }
        async fn patch(
            &self,
            _: &str,
            name: &str,
            _: &serde_json::Value,
        ) -> Result<Application, EngineError> {
            self.get("", name).await
        }
        async fn delete(&self, _: &str, _: &str, _: bool) -> Result<(), EngineError> {
            Ok(())
        }
        async fn sync(&self, _: &str, _: &str, _: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn refresh(&self, _: &str, name: &str) -> Result<Application, EngineError> {
            self.get("", name).await
        }
        async fn register_repo(&self, _: &str, _: &str) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline() {
        let adapter = EngineAdapter::new(Arc::new(SlowEngine), &EngineConfig::default())
            .with_timeouts(Duration::from_secs(10), Duration::from_secs(60));

        let err = adapter.get("t", "svc-a-prod").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Timeout {
                operation: "get",
                ..
            }
        ));
    }
}
