// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Chart manifest builder.
//!
//! Every installation is deployed through a thin umbrella chart named after the
//! app: its `Chart.yaml`, a `requirements.yaml` with the catalog chart as the
//! single dependency, and a `values.yaml` nesting the user's overrides under the
//! dependency's name. The builder is pure with respect to the database and
//! remote systems; the chart tree lives in a temporary directory that is removed
//! when the [`ChartManifest`] is dropped.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

use crate::catalog::{ChartOrigin, ChartVersion};

/// Version stamped on every generated umbrella chart.
pub const UMBRELLA_CHART_VERSION: &str = "1.0.1";

/// File name of the values file.
pub const VALUES_YAML_FILE: &str = "values.yaml";

/// File name of the requirements file.
pub const REQUIREMENTS_YAML_FILE: &str = "requirements.yaml";

/// File name of the chart metadata file.
pub const CHART_YAML_FILE: &str = "Chart.yaml";

/// Manifest builder errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// User values are not a YAML mapping.
    #[error("invalid values yaml: {0}")]
    InvalidValues(String),

    /// The OCI registry URL could not be parsed.
    #[error("invalid registry url '{0}'")]
    InvalidRegistryUrl(String),

    /// Filesystem error.
    #[error("chart directory error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A file of a chart tree, relative to the chart root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartFile {
    /// Path relative to the chart root, `/`-separated.
    pub path: String,
    /// File content.
    pub content: String,
}

/// Output of [`ManifestBuilder::generate_manifest`].
#[derive(Debug)]
pub struct ChartManifest {
    /// Directory holding the built umbrella chart.
    pub built_chart_path: PathBuf,
    /// Content of `values.yaml`.
    pub values_config: String,
    /// Content of `requirements.yaml`.
    pub requirements_config: String,
    _work_dir: TempDir,
}

impl ChartManifest {
    /// Files of the built chart tree, sorted by path.
    pub fn chart_files(&self) -> Result<Vec<ChartFile>, ManifestError> {
        let mut files = Vec::new();
        collect_files(&self.built_chart_path, &self.built_chart_path, &mut files)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<ChartFile>) -> Result<(), ManifestError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push(ChartFile {
                path: relative,
                content: fs::read_to_string(&path)?,
            });
        }
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChartMetadata<'a> {
    api_version: &'a str,
    name: &'a str,
    version: &'a str,
}

#[derive(Serialize)]
struct Dependencies {
    dependencies: Vec<Dependency>,
}

#[derive(Serialize)]
struct Dependency {
    name: String,
    repository: String,
    version: String,
}

/// Builds umbrella charts for installations.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    work_dir: PathBuf,
}

impl ManifestBuilder {
    /// Create a builder materialising charts under `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Build the umbrella chart of `app_name` for `chart` with the user's values.
    pub fn generate_manifest(
        &self,
        app_name: &str,
        chart: &ChartVersion,
        values_override_yaml: &str,
    ) -> Result<ChartManifest, ManifestError> {
        let values_config = values_string(&chart.chart_name, values_override_yaml)?;
        let requirements_config = requirements_string(chart)?;

        fs::create_dir_all(&self.work_dir)?;
        let work_dir = tempfile::Builder::new()
            .prefix(&format!("{}-", app_name))
            .tempdir_in(&self.work_dir)?;
        let built_chart_path = work_dir.path().join(app_name);
        fs::create_dir_all(&built_chart_path)?;

        let metadata = serde_yaml::to_string(&ChartMetadata {
            api_version: "v1",
            name: app_name,
            version: UMBRELLA_CHART_VERSION,
        })?;
        fs::write(built_chart_path.join(CHART_YAML_FILE), metadata)?;

        debug!(
            app_name = app_name,
            chart = %chart.chart_name,
            path = %built_chart_path.display(),
            "Built umbrella chart"
        );

        Ok(ChartManifest {
            built_chart_path,
            values_config,
            requirements_config,
            _work_dir: work_dir,
        })
    }
}

/// Nest the user's values under the dependency's name, as JSON.
///
/// Empty input yields an empty mapping; anything other than a mapping is rejected.
pub fn values_string(chart_name: &str, values_override_yaml: &str) -> Result<String, ManifestError> {
    let values: serde_json::Value = if values_override_yaml.trim().is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_yaml::from_str(values_override_yaml)
            .map_err(|e| ManifestError::InvalidValues(e.to_string()))?
    };
    let values = match values {
        serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
        v @ serde_json::Value::Object(_) => v,
        other => {
            return Err(ManifestError::InvalidValues(format!(
                "expected a mapping, got {}",
                other
            )));
        }
    };

    let mut wrapped = serde_json::Map::new();
    wrapped.insert(chart_name.to_string(), values);
    Ok(serde_json::to_string(&serde_json::Value::Object(wrapped))?)
}

/// Single-dependency `requirements.yaml` for `chart`.
pub fn requirements_string(chart: &ChartVersion) -> Result<String, ManifestError> {
    let (name, repository) = match &chart.origin {
        ChartOrigin::Repository { url, .. } => (chart.chart_name.clone(), url.clone()),
        ChartOrigin::Oci { registry_url, .. } => {
            normalize_oci_dependency(registry_url, &chart.chart_name)?
        }
    };
    let requirements = Dependencies {
        dependencies: vec![Dependency {
            name,
            repository,
            version: chart.version.clone(),
        }],
    };
    Ok(serde_yaml::to_string(&requirements)?)
}

/// Split an OCI registry URL and chart name into `(name, oci://host/path)`.
///
/// Registry URLs may omit the scheme. Leading path segments of the chart name
/// belong to the repository.
pub fn normalize_oci_dependency(
    registry_url: &str,
    chart_name: &str,
) -> Result<(String, String), ManifestError> {
    let without_scheme = match registry_url.split_once("://") {
        Some((_, rest)) => rest,
        None => registry_url,
    };
    let parsed = url::Url::parse(&format!("oci://{}", without_scheme.trim_start_matches('/')))
        .map_err(|_| ManifestError::InvalidRegistryUrl(registry_url.to_string()))?;
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ManifestError::InvalidRegistryUrl(registry_url.to_string()))?;
    let authority = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let mut segments: Vec<&str> = parsed.path().split('/').filter(|s| !s.is_empty()).collect();
    let mut chart_segments: Vec<&str> = chart_name.split('/').filter(|s| !s.is_empty()).collect();
    let name = chart_segments.pop().unwrap_or(chart_name).to_string();
    segments.extend(chart_segments);

    let mut repository = format!("oci://{}", authority);
    for segment in segments {
        repository.push('/');
        repository.push_str(segment);
    }
    Ok((name, repository))
}

/// Package an umbrella chart with the given values and requirements as `.tgz`.
pub fn build_chart_archive(
    app_name: &str,
    values: &str,
    requirements: &str,
    chart_name: &str,
    chart_version: &str,
) -> Result<Vec<u8>, ManifestError> {
    let metadata = serde_yaml::to_string(&ChartMetadata {
        api_version: "v1",
        name: chart_name,
        version: chart_version,
    })?;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut archive = tar::Builder::new(encoder);
    for (file, content) in [
        (CHART_YAML_FILE, metadata.as_str()),
        (VALUES_YAML_FILE, values),
        (REQUIREMENTS_YAML_FILE, requirements),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        archive.append_data(
            &mut header,
            format!("{}/{}", app_name, file),
            content.as_bytes(),
        )?;
    }
    let mut encoder = archive.into_inner()?;
    encoder.flush()?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn chart(origin: ChartOrigin, name: &str) -> ChartVersion {
        ChartVersion {
            id: 55,
            app_store_id: 3,
            chart_name: name.to_string(),
            version: "1.2.3".to_string(),
            default_values_yaml: String::new(),
            values_schema_json: None,
            origin,
        }
    }

    fn repo() -> ChartOrigin {
        ChartOrigin::Repository {
            name: "bitnami".to_string(),
            url: "https://charts.bitnami.com/bitnami".to_string(),
            username: None,
            password: None,
            active: true,
        }
    }

    fn oci(registry_url: &str) -> ChartOrigin {
        ChartOrigin::Oci {
            registry_id: "ecr".to_string(),
            registry_url: registry_url.to_string(),
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_values_string_wraps_under_chart_name() {
        let values = values_string("nginx", "replicas: 2\nimage:\n  tag: v1\n").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&values).unwrap();
        assert_eq!(parsed["nginx"]["replicas"], 2);
        assert_eq!(parsed["nginx"]["image"]["tag"], "v1");
    }

    #[test]
    fn test_values_string_edge_cases() {
        assert_eq!(values_string("nginx", "").unwrap(), r#"{"nginx":{}}"#);
        assert!(matches!(
            values_string("nginx", "- a\n- b\n"),
            Err(ManifestError::InvalidValues(_))
        ));
        assert!(matches!(
            values_string("nginx", "a: [unclosed"),
            Err(ManifestError::InvalidValues(_))
        ));
    }

    #[test]
    fn test_requirements_for_repository_chart() {
        let requirements = requirements_string(&chart(repo(), "nginx")).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&requirements).unwrap();
        let dependency = &parsed["dependencies"][0];
        assert_eq!(dependency["name"].as_str(), Some("nginx"));
        assert_eq!(
            dependency["repository"].as_str(),
            Some("https://charts.bitnami.com/bitnami")
        );
        assert_eq!(dependency["version"].as_str(), Some("1.2.3"));
        assert_eq!(parsed["dependencies"].as_sequence().map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_oci_normalization() {
        let test_cases = vec![
            ("registry.example.com", "nginx", "nginx", "oci://registry.example.com"),
            (
                "registry.example.com/charts",
                "team/nginx",
                "nginx",
                "oci://registry.example.com/charts/team",
            ),
            (
                "oci://registry.example.com:5000/",
                "nginx",
                "nginx",
                "oci://registry.example.com:5000",
            ),
            (
                "https://123.dkr.ecr.aws.com",
                "a/b/redis",
                "redis",
                "oci://123.dkr.ecr.aws.com/a/b",
            ),
        ];

        for (registry, chart_name, name, repository) in test_cases {
            let (got_name, got_repository) =
                normalize_oci_dependency(registry, chart_name).unwrap();
            assert_eq!(got_name, name, "{}", registry);
            assert_eq!(got_repository, repository, "{}", registry);
        }

        assert!(normalize_oci_dependency("", "nginx").is_err());
    }

    #[test]
    fn test_requirements_for_oci_chart() {
        let requirements =
            requirements_string(&chart(oci("registry.example.com/charts"), "team/nginx")).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&requirements).unwrap();
        let dependency = &parsed["dependencies"][0];
        assert_eq!(dependency["name"].as_str(), Some("nginx"));
        assert_eq!(
            dependency["repository"].as_str(),
            Some("oci://registry.example.com/charts/team")
        );
    }

    #[test]
    fn test_generate_manifest_builds_chart_tree() {
        let work_dir = tempfile::tempdir().unwrap();
        let builder = ManifestBuilder::new(work_dir.path());

        let manifest = builder
            .generate_manifest("svc-a", &chart(repo(), "nginx"), "replicas: 2\n")
            .unwrap();
        assert!(manifest.built_chart_path.ends_with("svc-a"));

        let files = manifest.chart_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "Chart.yaml");
        assert!(files[0].content.contains("name: svc-a"));
        assert!(files[0].content.contains("version: 1.0.1"));

        let path = manifest.built_chart_path.clone();
        drop(manifest);
        assert!(!path.exists());
    }

    #[test]
    fn test_generate_manifest_rejects_bad_values_without_side_effects() {
        let work_dir = tempfile::tempdir().unwrap();
        let builder = ManifestBuilder::new(work_dir.path());

        let err = builder
            .generate_manifest("svc-a", &chart(repo(), "nginx"), "- not\n- a map\n")
            .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidValues(_)));
        assert_eq!(fs::read_dir(work_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_build_chart_archive_contents() {
        let archive = build_chart_archive(
            "svc-a",
            r#"{"nginx":{}}"#,
            "dependencies: []\n",
            "nginx",
            "1.2.3",
        )
        .unwrap();

        let mut tar = tar::Archive::new(GzDecoder::new(archive.as_slice()));
        let mut entries = Vec::new();
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            entries.push((path, content));
        }

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0, "svc-a/Chart.yaml");
        assert!(entries[0].1.contains("name: nginx"));
        assert_eq!(entries[1], ("svc-a/values.yaml".to_string(), r#"{"nginx":{}}"#.to_string()));
        assert_eq!(entries[2].0, "svc-a/requirements.yaml");
    }
}
