// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upgrades of existing installations.

use appstore_state::{InstalledAppVersionRecord, UpgradeDraft, VersionChange, VersionRestore};
use tracing::info;

use super::{
    AppStoreOrchestrator, InstallAppVersionDto, Operation, RequestContext,
    UpdateInstalledAppRequest,
};
use crate::backend::UpgradePlan;
use crate::error::{Error, Result};
use crate::timeline::attempt_timelines;
use crate::validation::{ensure_values_current, validate_values_yaml};

/// Classify an upgrade against the active version.
///
/// An unset version id means the user picked a different chart.
pub(crate) fn classify_change(
    request: &UpdateInstalledAppRequest,
    active: &InstalledAppVersionRecord,
) -> Result<(VersionChange, UpgradePlan)> {
    if request.installed_app_version_id == 0 {
        return Ok((
            VersionChange::ChartChanged,
            UpgradePlan {
                chart_changed: true,
                version_changed: false,
            },
        ));
    }
    ensure_values_current(request.installed_app_version_id, active)?;

    if request.app_store_application_version_id != active.app_store_application_version_id {
        Ok((
            VersionChange::VersionBumped {
                installed_app_version_id: active.id,
            },
            UpgradePlan {
                chart_changed: false,
                version_changed: true,
            },
        ))
    } else {
        Ok((
            VersionChange::ValuesOnly {
                installed_app_version_id: active.id,
            },
            UpgradePlan::default(),
        ))
    }
}

impl AppStoreOrchestrator {
    /// Change the chart version or values of an installation.
    pub async fn update_installed_app(
        &self,
        ctx: &RequestContext,
        request: UpdateInstalledAppRequest,
    ) -> Result<InstallAppVersionDto> {
        validate_values_yaml(&request.values_override_yaml)?;
        let (installed_app, app) = self.load_active_installation(request.installed_app_id).await?;
        if installed_app.deployment_app_delete_request {
            return Err(Error::Conflict(format!(
                "installed app {} is being deleted",
                installed_app.id
            )));
        }
        let environment = self.load_environment(installed_app.environment_id).await?;
        let chart = self.load_chart(request.app_store_application_version_id).await?;
        let active = self
            .store
            .get_active_installed_app_version(installed_app.id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no active version for installed app {}",
                    installed_app.id
                ))
            })?;

        let (change, plan) = classify_change(&request, &active)?;
        let app_type = installed_app.deployment_app_type;
        let prepared = self
            .store
            .prepare_upgrade(&UpgradeDraft {
                installed_app_id: installed_app.id,
                change,
                app_store_application_version_id: chart.id,
                values_yaml: request.values_override_yaml.clone(),
                reference_value_id: request.reference_value_id,
                reference_value_kind: request.reference_value_kind,
                initial_timelines: attempt_timelines(app_type),
                user_id: request.user_id,
            })
            .await?;

        let mut dto = InstallAppVersionDto::from_installation(
            &installed_app,
            &prepared.version,
            &app.app_name,
            &environment,
        );
        dto.team_id = app.team_id;
        dto.installed_app_version_history_id = prepared.history.id;
        dto.deployment_started_on = Some(prepared.history.started_on);
        dto.user_id = request.user_id;
        info!(
            installed_app_id = dto.installed_app_id,
            installed_app_version_id = dto.installed_app_version_id,
            history_id = dto.installed_app_version_history_id,
            change = ?change,
            "Upgrade recorded"
        );

        self.supersede_previous(&dto).await;
        let restore = VersionRestore {
            installed_app_id: installed_app.id,
            versions: vec![active],
            user_id: request.user_id,
        };
        self.run_attempt(
            ctx,
            &mut dto,
            &chart,
            app_type,
            Operation::Upgrade(plan),
            restore,
        )
        .await?;
        Ok(dto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appstore_state::{AuditLog, ReferenceValueKind};

    fn active() -> InstalledAppVersionRecord {
        InstalledAppVersionRecord {
            id: 10,
            installed_app_id: 3,
            app_store_application_version_id: 55,
            values_yaml_raw: "replicas: 1\n".to_string(),
            active: true,
            reference_value_id: None,
            reference_value_kind: ReferenceValueKind::Default,
            audit: AuditLog::new(1),
        }
    }

    fn request(version_id: i64, chart_version_id: i64) -> UpdateInstalledAppRequest {
        UpdateInstalledAppRequest {
            installed_app_id: 3,
            installed_app_version_id: version_id,
            app_store_application_version_id: chart_version_id,
            values_override_yaml: "replicas: 2\n".to_string(),
            reference_value_id: None,
            reference_value_kind: ReferenceValueKind::Default,
            user_id: 7,
        }
    }

    #[test]
    fn test_classify_change() {
        let (change, plan) = classify_change(&request(0, 77), &active()).unwrap();
        assert_eq!(change, VersionChange::ChartChanged);
        assert!(plan.chart_changed);

        let (change, plan) = classify_change(&request(10, 56), &active()).unwrap();
        assert_eq!(
            change,
            VersionChange::VersionBumped {
                installed_app_version_id: 10
            }
        );
        assert!(plan.version_changed);

        let (change, plan) = classify_change(&request(10, 55), &active()).unwrap();
        assert_eq!(
            change,
            VersionChange::ValuesOnly {
                installed_app_version_id: 10
            }
        );
        assert!(!plan.requirements_changed());
    }

    #[test]
    fn test_outdated_version_is_rejected() {
        let err = classify_change(&request(9, 55), &active()).unwrap_err();
        assert_eq!(err.status_code(), 409);
    }
}
