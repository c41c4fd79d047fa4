// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory helm service for testing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{
    HelmClient, HelmError, InstallReleaseRequest, ReleaseIdentifier, ReleaseManifest,
    ReleaseRevision,
};

#[derive(Debug, Clone)]
struct MockRevision {
    revision: ReleaseRevision,
    values_yaml: String,
}

#[derive(Debug, Default)]
struct MockState {
    releases: HashMap<ReleaseIdentifier, Vec<MockRevision>>,
    installs: Vec<InstallReleaseRequest>,
    upgrades: Vec<InstallReleaseRequest>,
    links: Vec<InstallReleaseRequest>,
    rollbacks: Vec<(ReleaseIdentifier, i32)>,
    uninstalls: Vec<ReleaseIdentifier>,
    failing: HashSet<&'static str>,
    delay: Option<Duration>,
}

/// Mock helm service keeping releases and their revisions in memory.
#[derive(Clone, Default)]
pub struct MockHelmClient {
    state: Arc<Mutex<MockState>>,
}

fn render(chart_name: &str, values_yaml: &str) -> String {
    format!(
        "---\n# Source: {}/templates/deployment.yaml\n# values:\n{}",
        chart_name,
        values_yaml
            .lines()
            .map(|line| format!("#   {}\n", line))
            .collect::<String>()
    )
}

impl MockHelmClient {
    /// Create an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, HelmError> {
        self.state
            .lock()
            .map_err(|e| HelmError::Transport(format!("mock state poisoned: {}", e)))
    }

    fn check(&self, operation: &'static str) -> Result<(), HelmError> {
        if self.lock()?.failing.contains(operation) {
            return Err(HelmError::Unsuccessful {
                operation,
                message: format!("{} failed", operation),
            });
        }
        Ok(())
    }

    /// Fail every call of `operation` (`install`, `upgrade`, `rollback`, `template`, ...).
    pub fn fail_operation(&self, operation: &'static str) {
        if let Ok(mut state) = self.lock() {
            state.failing.insert(operation);
        }
    }

    /// Delay every release operation by `delay` before answering.
    pub fn delay_calls(&self, delay: Duration) {
        if let Ok(mut state) = self.lock() {
            state.delay = Some(delay);
        }
    }

    async fn pause(&self) {
        let delay = self.lock().ok().and_then(|s| s.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Add an existing release with one revision.
    pub fn add_release(
        &self,
        release: ReleaseIdentifier,
        chart_name: &str,
        chart_version: &str,
        values_yaml: &str,
    ) {
        if let Ok(mut state) = self.lock() {
            state.releases.insert(
                release,
                vec![MockRevision {
                    revision: ReleaseRevision {
                        revision: 1,
                        chart_name: chart_name.to_string(),
                        chart_version: chart_version.to_string(),
                        status: "deployed".to_string(),
                        deployed_at: Utc::now(),
                    },
                    values_yaml: values_yaml.to_string(),
                }],
            );
        }
    }

    /// Install requests received.
    pub fn install_requests(&self) -> Vec<InstallReleaseRequest> {
        self.lock().map(|s| s.installs.clone()).unwrap_or_default()
    }

    /// Upgrade requests received.
    pub fn upgrade_requests(&self) -> Vec<InstallReleaseRequest> {
        self.lock().map(|s| s.upgrades.clone()).unwrap_or_default()
    }

    /// Link requests received.
    pub fn link_requests(&self) -> Vec<InstallReleaseRequest> {
        self.lock().map(|s| s.links.clone()).unwrap_or_default()
    }

    /// Rollbacks received as `(release, revision)`.
    pub fn rollbacks(&self) -> Vec<(ReleaseIdentifier, i32)> {
        self.lock().map(|s| s.rollbacks.clone()).unwrap_or_default()
    }

    /// Uninstalls received.
    pub fn uninstalls(&self) -> Vec<ReleaseIdentifier> {
        self.lock().map(|s| s.uninstalls.clone()).unwrap_or_default()
    }

    fn push_revision(
        state: &mut MockState,
        release: &ReleaseIdentifier,
        chart_name: &str,
        chart_version: &str,
        values_yaml: &str,
    ) {
        let revisions = state.releases.entry(release.clone()).or_default();
        for existing in revisions.iter_mut() {
            existing.revision.status = "superseded".to_string();
        }
        let next = revisions.len() as i32 + 1;
        revisions.push(MockRevision {
            revision: ReleaseRevision {
                revision: next,
                chart_name: chart_name.to_string(),
                chart_version: chart_version.to_string(),
                status: "deployed".to_string(),
                deployed_at: Utc::now(),
            },
            values_yaml: values_yaml.to_string(),
        });
    }
}

#[async_trait]
impl HelmClient for MockHelmClient {
    async fn install_release(&self, request: &InstallReleaseRequest) -> Result<(), HelmError> {
        self.pause().await;
        self.lock()?.installs.push(request.clone());
        self.check("install")?;
        let mut state = self.lock()?;
        if state.releases.contains_key(&request.release_identifier) {
            return Err(HelmError::Unsuccessful {
                operation: "install",
                message: "cannot re-use a name that is still in use".to_string(),
            });
        }
        Self::push_revision(
            &mut state,
            &request.release_identifier,
            &request.chart_name,
            &request.chart_version,
            &request.values_yaml,
        );
        Ok(())
    }

    async fn upgrade_release(&self, request: &InstallReleaseRequest) -> Result<(), HelmError> {
        self.pause().await;
        self.lock()?.upgrades.push(request.clone());
        self.check("upgrade")?;
        let mut state = self.lock()?;
        if !state.releases.contains_key(&request.release_identifier) {
            return Err(HelmError::NotFound(
                request.release_identifier.release_name.clone(),
            ));
        }
        Self::push_revision(
            &mut state,
            &request.release_identifier,
            &request.chart_name,
            &request.chart_version,
            &request.values_yaml,
        );
        Ok(())
    }

    async fn rollback_release(
        &self,
        release: &ReleaseIdentifier,
        revision: i32,
    ) -> Result<(), HelmError> {
        self.pause().await;
        self.lock()?.rollbacks.push((release.clone(), revision));
        self.check("rollback")?;
        let mut state = self.lock()?;
        let target = state
            .releases
            .get(release)
            .and_then(|revisions| revisions.iter().find(|r| r.revision.revision == revision))
            .cloned()
            .ok_or_else(|| HelmError::NotFound(release.release_name.clone()))?;
        Self::push_revision(
            &mut state,
            release,
            &target.revision.chart_name,
            &target.revision.chart_version,
            &target.values_yaml,
        );
        Ok(())
    }

    async fn template_chart(&self, request: &InstallReleaseRequest) -> Result<String, HelmError> {
        self.pause().await;
        self.check("template")?;
        Ok(render(&request.chart_name, &request.values_yaml))
    }

    async fn uninstall_release(&self, release: &ReleaseIdentifier) -> Result<(), HelmError> {
        self.pause().await;
        self.lock()?.uninstalls.push(release.clone());
        self.check("uninstall")?;
        match self.lock()?.releases.remove(release) {
            Some(_) => Ok(()),
            None => Err(HelmError::NotFound(release.release_name.clone())),
        }
    }

    async fn is_release_installed(&self, release: &ReleaseIdentifier) -> Result<bool, HelmError> {
        self.pause().await;
        self.check("status")?;
        Ok(self.lock()?.releases.contains_key(release))
    }

    async fn release_history(
        &self,
        release: &ReleaseIdentifier,
    ) -> Result<Vec<ReleaseRevision>, HelmError> {
        let state = self.lock()?;
        let revisions = state
            .releases
            .get(release)
            .ok_or_else(|| HelmError::NotFound(release.release_name.clone()))?;
        Ok(revisions.iter().rev().map(|r| r.revision.clone()).collect())
    }

    async fn release_manifest(
        &self,
        release: &ReleaseIdentifier,
        revision: i32,
    ) -> Result<ReleaseManifest, HelmError> {
        let state = self.lock()?;
        state
            .releases
            .get(release)
            .and_then(|revisions| revisions.iter().find(|r| r.revision.revision == revision))
            .map(|r| ReleaseManifest {
                manifest: render(&r.revision.chart_name, &r.values_yaml),
                values_yaml: r.values_yaml.clone(),
            })
            .ok_or_else(|| HelmError::NotFound(release.release_name.clone()))
    }

    async fn link_release_to_chart(&self, request: &InstallReleaseRequest) -> Result<(), HelmError> {
        self.pause().await;
        self.lock()?.links.push(request.clone());
        self.check("link")?;
        if !self.lock()?.releases.contains_key(&request.release_identifier) {
            return Err(HelmError::NotFound(
                request.release_identifier.release_name.clone(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release() -> ReleaseIdentifier {
        ReleaseIdentifier {
            cluster_id: 1,
            release_name: "svc-a".to_string(),
            release_namespace: "prod".to_string(),
        }
    }

    #[tokio::test]
    async fn test_rollback_creates_new_revision_from_target() {
        let helm = MockHelmClient::new();
        helm.add_release(release(), "nginx", "1.0.0", "replicas: 1\n");
        let mut upgrade = InstallReleaseRequest {
            release_identifier: release(),
            chart_name: "nginx".to_string(),
            chart_version: "1.1.0".to_string(),
            values_yaml: "replicas: 3\n".to_string(),
            chart_repository: crate::helm::ChartRepository {
                name: "bitnami".to_string(),
                url: "https://charts.bitnami.com/bitnami".to_string(),
                username: None,
                password: None,
            },
            is_oci_repo: false,
            install_app_version_history_id: 0,
        };
        helm.upgrade_release(&upgrade).await.unwrap();

        helm.rollback_release(&release(), 1).await.unwrap();
        let history = helm.release_history(&release()).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].revision, 3);
        assert_eq!(history[0].chart_version, "1.0.0");
        let manifest = helm.release_manifest(&release(), 3).await.unwrap();
        assert_eq!(manifest.values_yaml, "replicas: 1\n");

        upgrade.release_identifier.release_name = "other".to_string();
        assert!(matches!(
            helm.upgrade_release(&upgrade).await,
            Err(HelmError::NotFound(_))
        ));
    }
}
