// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the deployment engine.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Which deployment backends the installation supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMode {
    /// GitOps engine and helm service are both available.
    #[default]
    Full,
    /// Only the helm service is available.
    HelmOnly,
}

impl FromStr for IntegrationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "helm" | "helm_only" => Ok(Self::HelmOnly),
            _ => Err(ConfigError::InvalidValue {
                var: "APPSTORE_INTEGRATION_MODE",
                value: s.to_string(),
            }),
        }
    }
}

/// Hosted Git provider backing GitOps repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitProviderKind {
    /// GitHub (organisation repositories).
    GitHub,
    /// GitLab (group projects).
    GitLab,
    /// Bitbucket Cloud (workspace repositories).
    Bitbucket,
    /// Azure DevOps (project repositories).
    Azure,
}

impl GitProviderKind {
    /// Public API base URL used when `GITOPS_HOST` is unset.
    pub fn default_host(&self) -> &'static str {
        match self {
            Self::GitHub => "https://api.github.com",
            Self::GitLab => "https://gitlab.com",
            Self::Bitbucket => "https://api.bitbucket.org",
            Self::Azure => "https://dev.azure.com",
        }
    }
}

impl fmt::Display for GitProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::Bitbucket => "bitbucket",
            Self::Azure => "azure",
        };
        f.write_str(name)
    }
}

impl FromStr for GitProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            "bitbucket" | "bitbucket_cloud" => Ok(Self::Bitbucket),
            "azure" | "azure_devops" => Ok(Self::Azure),
            _ => Err(ConfigError::InvalidValue {
                var: "GITOPS_PROVIDER",
                value: s.to_string(),
            }),
        }
    }
}

/// GitOps provider configuration. Absent when GitOps is not configured.
#[derive(Debug, Clone)]
pub struct GitOpsConfig {
    /// Provider kind.
    pub provider: GitProviderKind,
    /// Provider API base URL.
    pub host: String,
    /// Organisation, group or workspace owning the repositories.
    pub organization: String,
    /// Azure project or Bitbucket project key.
    pub project: String,
    /// API token.
    pub token: String,
    /// Username (Bitbucket basic auth, commit author).
    pub username: String,
    /// Commit author email.
    pub email: String,
    /// Whether users supply their own repository URLs.
    pub allow_custom_repository: bool,
    /// Prefix prepended to generated repository names.
    pub repo_prefix: String,
}

/// Deployment engine (GitOps sync) configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine API base URL; `None` disables the GitOps backend.
    pub url: Option<String>,
    /// Token used by background workers (requests carry their own).
    pub token: String,
    /// Whether engine apps are created with automated sync.
    pub auto_sync_enabled: bool,
    /// Deadline for read calls.
    pub read_timeout: Duration,
    /// Deadline for write calls.
    pub write_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: String::new(),
            auto_sync_enabled: true,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(60),
        }
    }
}

/// Helm execution service configuration.
#[derive(Debug, Clone)]
pub struct HelmConfig {
    /// Service base URL.
    pub service_url: String,
    /// Leave helm history rows in progress until the release callback arrives.
    pub install_async_mode: bool,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:50051".to_string(),
            install_async_mode: false,
        }
    }
}

/// Deployment engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL database URL.
    pub database_url: String,

    /// Maximum database pool size.
    pub db_max_connections: u32,

    /// Which backends are available.
    pub integration_mode: IntegrationMode,

    /// GitOps provider; `None` when GitOps is not configured.
    pub gitops: Option<GitOpsConfig>,

    /// Deployment engine.
    pub engine: EngineConfig,

    /// Helm execution service.
    pub helm: HelmConfig,

    /// Request-level deadline for orchestration methods.
    pub orchestration_timeout: Duration,

    /// Directory chart trees are materialised in.
    pub chart_work_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `APPSTORE_DATABASE_URL`: PostgreSQL connection string
    ///
    /// Optional:
    /// - `APPSTORE_DB_MAX_CONNECTIONS`: Pool size (default: 10)
    /// - `APPSTORE_INTEGRATION_MODE`: `full` or `helm` (default: full)
    /// - `GITOPS_PROVIDER`: `github`, `gitlab`, `bitbucket` or `azure` (unset: GitOps off)
    /// - `GITOPS_HOST`, `GITOPS_ORGANIZATION`, `GITOPS_PROJECT`, `GITOPS_TOKEN`
    /// - `GITOPS_USERNAME`, `GITOPS_EMAIL`: Commit author
    /// - `GITOPS_ALLOW_CUSTOM_REPOSITORY`: Custom repository policy (default: false)
    /// - `GITOPS_REPO_PREFIX`: Repository name prefix
    /// - `ENGINE_URL`, `ENGINE_TOKEN`: Deployment engine API
    /// - `ENGINE_AUTO_SYNC_ENABLED`: Automated sync (default: true)
    /// - `ENGINE_READ_TIMEOUT_SECS` / `ENGINE_WRITE_TIMEOUT_SECS` (default: 10 / 60)
    /// - `ORCHESTRATION_TIMEOUT_SECS`: Request deadline (default: 60)
    /// - `HELM_SERVICE_URL`: Helm service (default: http://127.0.0.1:50051)
    /// - `HELM_INSTALL_ASYNC_MODE`: Async helm history closing (default: false)
    /// - `CHART_WORK_DIR`: Chart working directory (default: system temp dir)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a variable lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("APPSTORE_DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingEnvVar("APPSTORE_DATABASE_URL"))?;

        let db_max_connections = parse_or(&lookup, "APPSTORE_DB_MAX_CONNECTIONS", 10u32)?;

        let integration_mode = match lookup("APPSTORE_INTEGRATION_MODE") {
            Some(v) if !v.is_empty() => v.parse()?,
            _ => IntegrationMode::Full,
        };

        let gitops = match lookup("GITOPS_PROVIDER").filter(|v| !v.is_empty()) {
            Some(provider) => {
                let provider: GitProviderKind = provider.parse()?;
                Some(GitOpsConfig {
                    provider,
                    host: lookup("GITOPS_HOST")
                        .filter(|v| !v.is_empty())
                        .unwrap_or_else(|| provider.default_host().to_string()),
                    organization: lookup("GITOPS_ORGANIZATION").unwrap_or_default(),
                    project: lookup("GITOPS_PROJECT").unwrap_or_default(),
                    token: lookup("GITOPS_TOKEN").unwrap_or_default(),
                    username: lookup("GITOPS_USERNAME")
                        .filter(|v| !v.is_empty())
                        .unwrap_or_else(|| "appstore-bot".to_string()),
                    email: lookup("GITOPS_EMAIL")
                        .filter(|v| !v.is_empty())
                        .unwrap_or_else(|| "appstore-bot@localhost".to_string()),
                    allow_custom_repository: parse_bool(
                        lookup("GITOPS_ALLOW_CUSTOM_REPOSITORY"),
                        false,
                    ),
                    repo_prefix: lookup("GITOPS_REPO_PREFIX").unwrap_or_default(),
                })
            }
            None => None,
        };

        let engine = EngineConfig {
            url: lookup("ENGINE_URL").filter(|v| !v.is_empty()),
            token: lookup("ENGINE_TOKEN").unwrap_or_default(),
            auto_sync_enabled: parse_bool(lookup("ENGINE_AUTO_SYNC_ENABLED"), true),
            read_timeout: Duration::from_secs(parse_or(&lookup, "ENGINE_READ_TIMEOUT_SECS", 10)?),
            write_timeout: Duration::from_secs(parse_or(
                &lookup,
                "ENGINE_WRITE_TIMEOUT_SECS",
                60,
            )?),
        };

        let helm = HelmConfig {
            service_url: lookup("HELM_SERVICE_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| HelmConfig::default().service_url),
            install_async_mode: parse_bool(lookup("HELM_INSTALL_ASYNC_MODE"), false),
        };

        let orchestration_timeout =
            Duration::from_secs(parse_or(&lookup, "ORCHESTRATION_TIMEOUT_SECS", 60)?);

        let chart_work_dir = lookup("CHART_WORK_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Ok(Self {
            database_url,
            db_max_connections,
            integration_mode,
            gitops,
            engine,
            helm,
            orchestration_timeout,
            chart_work_dir,
        })
    }

    /// Settings consumed by the orchestrator.
    pub fn deployment_settings(&self) -> DeploymentSettings {
        DeploymentSettings {
            integration_mode: self.integration_mode,
            gitops_configured: self.gitops.is_some() && self.engine.url.is_some(),
            allow_custom_repository: self
                .gitops
                .as_ref()
                .map(|g| g.allow_custom_repository)
                .unwrap_or(false),
            auto_sync_enabled: self.engine.auto_sync_enabled,
            helm_install_async_mode: self.helm.install_async_mode,
            orchestration_timeout: self.orchestration_timeout,
        }
    }
}

/// Policy switches the orchestrator runs with.
#[derive(Debug, Clone)]
pub struct DeploymentSettings {
    /// Which backends are available.
    pub integration_mode: IntegrationMode,
    /// Whether a GitOps provider and engine are configured.
    pub gitops_configured: bool,
    /// Whether users supply their own repository URLs.
    pub allow_custom_repository: bool,
    /// Whether engine apps sync automatically.
    pub auto_sync_enabled: bool,
    /// Leave helm history rows in progress until the release callback arrives.
    pub helm_install_async_mode: bool,
    /// Request-level deadline.
    pub orchestration_timeout: Duration,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            integration_mode: IntegrationMode::Full,
            gitops_configured: true,
            allow_custom_repository: false,
            auto_sync_enabled: true,
            helm_install_async_mode: false,
            orchestration_timeout: Duration::from_secs(60),
        }
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    value
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(default)
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// An environment variable could not be parsed.
    #[error("Invalid value '{value}' for {var}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_database_url_is_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnvVar("APPSTORE_DATABASE_URL")
        ));
    }

    #[test]
    fn test_defaults() {
        let config =
            Config::from_lookup(lookup(&[("APPSTORE_DATABASE_URL", "postgres://db")])).unwrap();
        assert_eq!(config.db_max_connections, 10);
        assert_eq!(config.integration_mode, IntegrationMode::Full);
        assert!(config.gitops.is_none());
        assert!(config.engine.auto_sync_enabled);
        assert_eq!(config.engine.read_timeout, Duration::from_secs(10));
        assert_eq!(config.engine.write_timeout, Duration::from_secs(60));
        assert_eq!(config.orchestration_timeout, Duration::from_secs(60));
        assert_eq!(config.helm.service_url, "http://127.0.0.1:50051");
        assert!(!config.deployment_settings().gitops_configured);
    }

    #[test]
    fn test_gitops_provider_section() {
        let config = Config::from_lookup(lookup(&[
            ("APPSTORE_DATABASE_URL", "postgres://db"),
            ("GITOPS_PROVIDER", "GitLab"),
            ("GITOPS_ORGANIZATION", "platform"),
            ("GITOPS_ALLOW_CUSTOM_REPOSITORY", "1"),
            ("GITOPS_REPO_PREFIX", "dt"),
            ("ENGINE_URL", "https://argocd.local"),
            ("ENGINE_AUTO_SYNC_ENABLED", "false"),
        ]))
        .unwrap();

        let gitops = config.gitops.as_ref().unwrap();
        assert_eq!(gitops.provider, GitProviderKind::GitLab);
        assert_eq!(gitops.host, "https://gitlab.com");
        assert!(gitops.allow_custom_repository);
        assert_eq!(gitops.repo_prefix, "dt");

        let settings = config.deployment_settings();
        assert!(settings.gitops_configured);
        assert!(settings.allow_custom_repository);
        assert!(!settings.auto_sync_enabled);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = Config::from_lookup(lookup(&[
            ("APPSTORE_DATABASE_URL", "postgres://db"),
            ("ENGINE_READ_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("ENGINE_READ_TIMEOUT_SECS"));

        let err = Config::from_lookup(lookup(&[
            ("APPSTORE_DATABASE_URL", "postgres://db"),
            ("GITOPS_PROVIDER", "gitea"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "GITOPS_PROVIDER", .. }));
    }
}
