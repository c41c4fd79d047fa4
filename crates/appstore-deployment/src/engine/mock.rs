// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory deployment engine for testing.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{Application, ApplicationStatus, EngineApi, EngineError, StatusField};

#[derive(Debug, Default)]
struct MockState {
    apps: BTreeMap<String, Application>,
    repos: Vec<String>,
    calls: Vec<String>,
    tokens: Vec<String>,
    register_failures: usize,
    failing: HashSet<&'static str>,
    delay: Option<Duration>,
}

/// Mock engine keeping app objects in memory and recording every call.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, EngineError> {
        self.state
            .lock()
            .map_err(|e| EngineError::Transport(format!("mock state poisoned: {}", e)))
    }

    fn record(&self, operation: &'static str, name: &str, token: &str) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.calls.push(format!("{} {}", operation, name));
        state.tokens.push(token.to_string());
        if state.failing.contains(operation) {
            return Err(EngineError::Status {
                status: 500,
                message: format!("{} failed", operation),
            });
        }
        Ok(())
    }

    /// Current app object.
    pub fn app(&self, name: &str) -> Option<Application> {
        self.lock().ok().and_then(|s| s.apps.get(name).cloned())
    }

    /// Names of existing app objects.
    pub fn app_names(&self) -> Vec<String> {
        self.lock()
            .map(|s| s.apps.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove an app object behind the orchestrator's back.
    pub fn remove_app(&self, name: &str) {
        if let Ok(mut state) = self.lock() {
            state.apps.remove(name);
        }
    }

    /// Calls as `"{operation} {name}"`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Tokens passed with each call, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.lock().map(|s| s.tokens.clone()).unwrap_or_default()
    }

    /// Registered repositories.
    pub fn registered_repos(&self) -> Vec<String> {
        self.lock().map(|s| s.repos.clone()).unwrap_or_default()
    }

    /// Fail the next `times` repository registrations with a transport error.
    pub fn fail_register_repo(&self, times: usize) {
        if let Ok(mut state) = self.lock() {
            state.register_failures = times;
        }
    }

    /// Fail every call of `operation` (`create`, `delete`, `sync`, ...) with a 500.
    pub fn fail_operation(&self, operation: &'static str) {
        if let Ok(mut state) = self.lock() {
            state.failing.insert(operation);
        }
    }

    /// Delay every call by `delay` before answering.
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

    fn existing(&self, name: &str) -> Result<Application, EngineError> {
        self.lock()?
            .apps
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                name: name.to_string(),
            })
    }
}

fn merge(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge(
                        target.entry(key.clone()).or_insert(serde_json::Value::Null),
                        value,
                    );
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[async_trait]
impl EngineApi for MockEngine {
    async fn get(&self, token: &str, name: &str) -> Result<Application, EngineError> {
        self.pause().await;
        self.record("get", name, token)?;
        self.existing(name)
    }

    async fn create(
        &self,
        token: &str,
        application: &Application,
    ) -> Result<Application, EngineError> {
        self.pause().await;
        self.record("create", &application.metadata.name, token)?;
        let mut created = application.clone();
        created.status = Some(ApplicationStatus::default());
        self.lock()?
            .apps
            .insert(created.metadata.name.clone(), created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        token: &str,
        application: &Application,
    ) -> Result<Application, EngineError> {
        let name = &application.metadata.name;
        self.pause().await;
        self.record("update", name, token)?;
        let mut current = self.existing(name)?;
        current.spec = application.spec.clone();
        self.lock()?.apps.insert(name.clone(), current.clone());
        Ok(current)
    }

    async fn patch(
        &self,
        token: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<Application, EngineError> {
        self.pause().await;
        self.record("patch", name, token)?;
        let current = self.existing(name)?;
        let mut value = serde_json::to_value(&current)
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        merge(&mut value, patch);
        let patched: Application =
            serde_json::from_value(value).map_err(|e| EngineError::Status {
                status: 400,
                message: e.to_string(),
            })?;
        self.lock()?.apps.insert(name.to_string(), patched.clone());
        Ok(patched)
    }

    async fn delete(&self, token: &str, name: &str, _cascade: bool) -> Result<(), EngineError> {
        self.pause().await;
        self.record("delete", name, token)?;
        match self.lock()?.apps.remove(name) {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn sync(&self, token: &str, name: &str, _revision: &str) -> Result<(), EngineError> {
        self.pause().await;
        self.record("sync", name, token)?;
        let mut state = self.lock()?;
        match state.apps.get_mut(name) {
            Some(app) => {
                app.status = Some(ApplicationStatus {
                    sync: StatusField {
                        status: "Synced".to_string(),
                    },
                    health: StatusField {
                        status: "Progressing".to_string(),
                    },
                });
                Ok(())
            }
            None => Err(EngineError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn refresh(&self, token: &str, name: &str) -> Result<Application, EngineError> {
        self.pause().await;
        self.record("refresh", name, token)?;
        self.existing(name)
    }

    async fn register_repo(&self, token: &str, repo_url: &str) -> Result<(), EngineError> {
        self.pause().await;
        self.record("register_repo", repo_url, token)?;
        let mut state = self.lock()?;
        if state.register_failures > 0 {
            state.register_failures -= 1;
            return Err(EngineError::Transport("connection reset".to_string()));
        }
        if !state.repos.iter().any(|r| r == repo_url) {
            state.repos.push(repo_url.to_string());
        }
        Ok(())
    }
}
