// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment status timelines.
//!
//! Timelines are written best-effort: a failed write is logged and never
//! aborts the step that produced it. Duplicate statuses and entries after a
//! terminal status are dropped by the store.

use std::sync::Arc;

use appstore_state::{
    DeploymentAppType, NewTimeline, Persistence, TimelineEntry, TimelineRecord, TimelineStatus,
};
use tracing::{debug, warn};

use crate::error::Result;

/// Detail of [`TimelineStatus::DeploymentInitiated`].
pub const DEPLOYMENT_INITIATED_DETAIL: &str = "Deployment initiated successfully.";
/// Detail of [`TimelineStatus::ManifestGenerated`].
pub const MANIFEST_GENERATED_DETAIL: &str = "Manifest generated successfully.";
/// Detail of [`TimelineStatus::GitCommit`].
pub const GIT_COMMIT_DETAIL: &str = "Git commit done successfully.";
/// Detail of [`TimelineStatus::ArgocdSyncInitiated`].
pub const ARGOCD_SYNC_INITIATED_DETAIL: &str = "ArgoCD sync initiated.";
/// Detail of [`TimelineStatus::ArgocdSyncCompleted`].
pub const ARGOCD_SYNC_COMPLETED_DETAIL: &str = "ArgoCD sync completed.";
/// Detail of [`TimelineStatus::DeploymentSucceeded`].
pub const DEPLOYMENT_SUCCEEDED_DETAIL: &str = "Deployment succeeded.";

const MAX_DETAIL_LEN: usize = 255;

/// Detail of [`TimelineStatus::GitCommitFailed`].
pub fn git_commit_failed_detail(error: &str) -> String {
    truncate(format!("Git commit failed - {}", error))
}

/// Deployment message of a failed attempt.
pub fn deployment_failed_message(error: &str) -> String {
    truncate(format!("Deployment failed: {}", error))
}

fn truncate(mut message: String) -> String {
    if message.len() > MAX_DETAIL_LEN {
        let mut end = MAX_DETAIL_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}

/// Timelines recorded together with the initial rows of an attempt.
pub fn initial_timelines(app_type: DeploymentAppType) -> Vec<TimelineEntry> {
    match app_type {
        DeploymentAppType::GitOps => vec![TimelineEntry::new(
            TimelineStatus::DeploymentInitiated,
            DEPLOYMENT_INITIATED_DETAIL,
        )],
        DeploymentAppType::ManifestDownload => vec![
            TimelineEntry::new(
                TimelineStatus::DeploymentInitiated,
                DEPLOYMENT_INITIATED_DETAIL,
            ),
            TimelineEntry::new(TimelineStatus::ManifestGenerated, MANIFEST_GENERATED_DETAIL),
        ],
        DeploymentAppType::Helm | DeploymentAppType::Virtual => Vec::new(),
    }
}

/// Timelines opening an upgrade or rollback attempt. Every backend starts with
/// [`TimelineStatus::DeploymentInitiated`].
pub fn attempt_timelines(app_type: DeploymentAppType) -> Vec<TimelineEntry> {
    match app_type {
        DeploymentAppType::ManifestDownload => initial_timelines(app_type),
        DeploymentAppType::GitOps | DeploymentAppType::Helm | DeploymentAppType::Virtual => {
            vec![TimelineEntry::new(
                TimelineStatus::DeploymentInitiated,
                DEPLOYMENT_INITIATED_DETAIL,
            )]
        }
    }
}

/// Best-effort timeline writer.
#[derive(Clone)]
pub struct TimelineService {
    store: Arc<dyn Persistence>,
}

impl TimelineService {
    /// Create a service writing through `store`.
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self { store }
    }

    /// Append one timeline entry.
    pub async fn record(
        &self,
        history_id: i64,
        status: TimelineStatus,
        detail: &str,
        user_id: i32,
    ) {
        let timeline = NewTimeline::now(history_id, TimelineEntry::new(status, detail), user_id);
        match self.store.save_timeline(&timeline).await {
            Ok(true) => debug!(history_id = history_id, status = %status, "Saved timeline"),
            Ok(false) => debug!(history_id = history_id, status = %status, "Timeline dropped"),
            Err(e) => warn!(
                history_id = history_id,
                status = %status,
                error = %e,
                "Failed to save timeline"
            ),
        }
    }

    /// Append several timeline entries in order.
    pub async fn record_all(&self, history_id: i64, entries: Vec<TimelineEntry>, user_id: i32) {
        if entries.is_empty() {
            return;
        }
        let timelines: Vec<NewTimeline> = entries
            .into_iter()
            .map(|entry| NewTimeline::now(history_id, entry, user_id))
            .collect();
        if let Err(e) = self.store.save_timelines(&timelines).await {
            warn!(history_id = history_id, error = %e, "Failed to save timelines");
        }
    }

    /// Record a successful commit; manual sync additionally records the sync request.
    pub async fn record_git_commit(&self, history_id: i64, auto_sync_enabled: bool, user_id: i32) {
        let mut entries = vec![TimelineEntry::new(TimelineStatus::GitCommit, GIT_COMMIT_DETAIL)];
        if !auto_sync_enabled {
            entries.push(TimelineEntry::new(
                TimelineStatus::ArgocdSyncInitiated,
                ARGOCD_SYNC_INITIATED_DETAIL,
            ));
        }
        self.record_all(history_id, entries, user_id).await;
    }

    /// Record a finished manual sync.
    pub async fn record_sync_completed(&self, history_id: i64, user_id: i32) {
        self.record(
            history_id,
            TimelineStatus::ArgocdSyncCompleted,
            ARGOCD_SYNC_COMPLETED_DETAIL,
            user_id,
        )
        .await;
    }

    /// Timeline of a history row.
    pub async fn fetch(&self, history_id: i64) -> Result<Vec<TimelineRecord>> {
        Ok(self.store.list_timelines(history_id).await?)
    }
}
