// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request policy, evaluated before any row is written.
//!
//! | Rule | Outcome |
//! |------|---------|
//! | OCI chart, GitOps or no backend requested | coerced to helm |
//! | virtual environment, manifest download requested | 400 |
//! | virtual environment, helm or no backend requested | coerced to virtual |
//! | GitOps requested but not configured | 400 |
//! | custom repository URL required but missing | 400 |
//! | custom repository URL given but not allowed | 409 |

use appstore_state::{DeploymentAppType, InstalledAppVersionRecord};
use tracing::debug;

use crate::catalog::{ChartVersion, EnvironmentInfo};
use crate::config::{DeploymentSettings, IntegrationMode};
use crate::error::{Error, Result};

/// Repository URL meaning "let the engine create the repository".
pub const DEFAULT_REPO_SENTINEL: &str = "Default";

/// Message returned when an upgrade edits a version that is no longer active.
pub const VALUES_OUTDATED_MESSAGE: &str =
    "The values are outdated. Please make your changes to the latest version and try again.";

/// Where the GitOps repository of a new installation comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoSelection {
    /// Create (or reuse) `{prefix}-{appName}`.
    AutoCreate,
    /// Use the URL the user supplied.
    Custom(String),
}

fn gitops_available(settings: &DeploymentSettings) -> bool {
    settings.gitops_configured && settings.integration_mode == IntegrationMode::Full
}

/// Resolve the backend of a new installation.
pub fn resolve_deployment_app_type(
    settings: &DeploymentSettings,
    requested: Option<DeploymentAppType>,
    chart: &ChartVersion,
    environment: &EnvironmentInfo,
) -> Result<DeploymentAppType> {
    let mut requested = requested;
    if chart.is_oci() && matches!(requested, None | Some(DeploymentAppType::GitOps)) {
        debug!(chart = %chart.chart_name, "OCI chart, deploying through helm");
        requested = Some(DeploymentAppType::Helm);
    }

    let resolved = if environment.is_virtual {
        match requested {
            Some(DeploymentAppType::ManifestDownload) => {
                return Err(Error::Validation(format!(
                    "Invalid request! manifest download is not supported for virtual environment '{}'",
                    environment.name
                )));
            }
            None | Some(DeploymentAppType::Helm) | Some(DeploymentAppType::Virtual) => {
                DeploymentAppType::Virtual
            }
            Some(DeploymentAppType::GitOps) => DeploymentAppType::GitOps,
        }
    } else {
        match requested {
            Some(DeploymentAppType::Virtual) => {
                return Err(Error::Validation(format!(
                    "Invalid request! environment '{}' is not a virtual environment",
                    environment.name
                )));
            }
            Some(app_type) => app_type,
            None if gitops_available(settings) => DeploymentAppType::GitOps,
            None => DeploymentAppType::Helm,
        }
    };

    if resolved == DeploymentAppType::GitOps && !gitops_available(settings) {
        return Err(Error::GitOpsNotConfigured);
    }
    Ok(resolved)
}

/// Apply the custom repository policy to a GitOps install.
pub fn resolve_repo_selection(
    settings: &DeploymentSettings,
    app_name: &str,
    git_repo_url: Option<&str>,
) -> Result<RepoSelection> {
    let url = git_repo_url.map(str::trim).unwrap_or_default();
    let is_default = url.is_empty() || url == DEFAULT_REPO_SENTINEL;

    if settings.allow_custom_repository {
        if url.is_empty() {
            return Err(Error::Validation(format!(
                "Invalid request! Git repository URL is not found for installed app '{}'",
                app_name
            )));
        }
        if is_default {
            return Ok(RepoSelection::AutoCreate);
        }
        return Ok(RepoSelection::Custom(url.to_string()));
    }

    if !is_default {
        return Err(Error::Conflict(format!(
            "Invalid request! Custom repository is not allowed, please remove git repository URL for installed app '{}'",
            app_name
        )));
    }
    Ok(RepoSelection::AutoCreate)
}

/// Reject values that are not a YAML document.
pub fn validate_values_yaml(values_yaml: &str) -> Result<()> {
    if values_yaml.trim().is_empty() {
        return Ok(());
    }
    serde_yaml::from_str::<serde_yaml::Value>(values_yaml)?;
    Ok(())
}

/// Reject upgrades that edit a version other than the active one.
pub fn ensure_values_current(
    requested_version_id: i64,
    active: &InstalledAppVersionRecord,
) -> Result<()> {
    if requested_version_id != 0 && requested_version_id != active.id {
        return Err(Error::Conflict(VALUES_OUTDATED_MESSAGE.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ChartOrigin;
    use appstore_state::{AuditLog, ReferenceValueKind};

    fn chart(oci: bool) -> ChartVersion {
        let origin = if oci {
            ChartOrigin::Oci {
                registry_id: "ecr".to_string(),
                registry_url: "registry.example.com/charts".to_string(),
                username: None,
                password: None,
            }
        } else {
            ChartOrigin::Repository {
                name: "bitnami".to_string(),
                url: "https://charts.bitnami.com/bitnami".to_string(),
                username: None,
                password: None,
                active: true,
            }
        };
        ChartVersion {
            id: 55,
            app_store_id: 1,
            chart_name: "nginx".to_string(),
            version: "1.2.3".to_string(),
            default_values_yaml: String::new(),
            values_schema_json: None,
            origin,
        }
    }

    fn environment(is_virtual: bool) -> EnvironmentInfo {
        EnvironmentInfo {
            id: 2,
            name: "prod".to_string(),
            namespace: "prod".to_string(),
            cluster_id: 1,
            cluster_name: "default".to_string(),
            cluster_server_url: "https://kubernetes.default.svc".to_string(),
            is_virtual,
        }
    }

    #[test]
    fn test_backend_resolution() {
        let settings = DeploymentSettings::default();
        let helm_only = DeploymentSettings {
            integration_mode: IntegrationMode::HelmOnly,
            ..Default::default()
        };
        let unconfigured = DeploymentSettings {
            gitops_configured: false,
            ..Default::default()
        };

        let test_cases = vec![
            (&settings, None, false, false, Ok(DeploymentAppType::GitOps)),
            (&helm_only, None, false, false, Ok(DeploymentAppType::Helm)),
            (&unconfigured, None, false, false, Ok(DeploymentAppType::Helm)),
            (
                &settings,
                Some(DeploymentAppType::GitOps),
                true,
                false,
                Ok(DeploymentAppType::Helm),
            ),
            (&settings, None, true, false, Ok(DeploymentAppType::Helm)),
            (
                &settings,
                Some(DeploymentAppType::Helm),
                false,
                true,
                Ok(DeploymentAppType::Virtual),
            ),
            (&settings, None, false, true, Ok(DeploymentAppType::Virtual)),
            (
                &settings,
                Some(DeploymentAppType::ManifestDownload),
                false,
                false,
                Ok(DeploymentAppType::ManifestDownload),
            ),
            (&settings, Some(DeploymentAppType::ManifestDownload), false, true, Err(400)),
            (&settings, Some(DeploymentAppType::Virtual), false, false, Err(400)),
            (&unconfigured, Some(DeploymentAppType::GitOps), false, false, Err(400)),
        ];

        for (settings, requested, oci, is_virtual, expected) in test_cases {
            let result =
                resolve_deployment_app_type(settings, requested, &chart(oci), &environment(is_virtual))
                    .map_err(|e| e.status_code());
            assert_eq!(
                result, expected,
                "requested={:?} oci={} virtual={}",
                requested, oci, is_virtual
            );
        }
    }

    #[test]
    fn test_unconfigured_gitops_error() {
        let settings = DeploymentSettings {
            gitops_configured: false,
            ..Default::default()
        };
        let err = resolve_deployment_app_type(
            &settings,
            Some(DeploymentAppType::GitOps),
            &chart(false),
            &environment(false),
        )
        .unwrap_err();
        assert!(matches!(err, Error::GitOpsNotConfigured));
    }

    #[test]
    fn test_repo_selection() {
        let closed = DeploymentSettings::default();
        let open = DeploymentSettings {
            allow_custom_repository: true,
            ..Default::default()
        };
        let url = "https://github.com/acme/custom.git";

        assert_eq!(
            resolve_repo_selection(&closed, "svc-a", None).unwrap(),
            RepoSelection::AutoCreate
        );
        assert_eq!(
            resolve_repo_selection(&closed, "svc-a", Some("Default")).unwrap(),
            RepoSelection::AutoCreate
        );
        assert_eq!(
            resolve_repo_selection(&closed, "svc-a", Some(url))
                .unwrap_err()
                .status_code(),
            409
        );

        assert_eq!(
            resolve_repo_selection(&open, "svc-a", Some(url)).unwrap(),
            RepoSelection::Custom(url.to_string())
        );
        assert_eq!(
            resolve_repo_selection(&open, "svc-a", Some("Default")).unwrap(),
            RepoSelection::AutoCreate
        );
        let err = resolve_repo_selection(&open, "svc-a", Some("  ")).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(
            err.to_string(),
            "Invalid request! Git repository URL is not found for installed app 'svc-a'"
        );
    }

    #[test]
    fn test_values_checks() {
        assert!(validate_values_yaml("").is_ok());
        assert!(validate_values_yaml("replicas: 2\n").is_ok());
        assert_eq!(
            validate_values_yaml("replicas: [2\n").unwrap_err().status_code(),
            400
        );

        let active = InstalledAppVersionRecord {
            id: 10,
            installed_app_id: 1,
            app_store_application_version_id: 55,
            values_yaml_raw: String::new(),
            active: true,
            reference_value_id: None,
            reference_value_kind: ReferenceValueKind::Default,
            audit: AuditLog::new(1),
        };
        assert!(ensure_values_current(0, &active).is_ok());
        assert!(ensure_values_current(10, &active).is_ok());
        let err = ensure_values_current(9, &active).unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.to_string(), VALUES_OUTDATED_MESSAGE);
    }
}
