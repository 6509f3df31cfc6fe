//! Host configuration and service manifest loading.
//!
//! A host directory contains a `config.yml` declaring the desired service
//! set plus optional pre/post hooks and shared networks/volumes. Each
//! service subdirectory carries a `manifest.yml` describing its container,
//! and optionally a `manifest.sops.yml` overlay with encrypted values that
//! is decrypted with the `sops` binary and merged into the container
//! section.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::{SyncerError, SyncerResult};
use crate::shell::{self, RunEnv, SOPS_CMD};

/// Host configuration file name, relative to the host directory.
pub const CONFIG_FILE_NAME: &str = "config.yml";

/// Service manifest file name, relative to the service directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.yml";

/// Encrypted manifest overlay file name, relative to the service directory.
pub const MANIFEST_SOPS_FILE_NAME: &str = "manifest.sops.yml";

/// A section of unit-file fields: field name to one or more values.
pub type SectionFields = BTreeMap<String, Vec<String>>;

/// A pre or post hook script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HookSpec {
    /// The script body, run through `bash -c --` in the host directory.
    pub script: String,
}

/// Per-service configuration from `config.yml`.
///
/// Most services need nothing beyond their directory, so every field is
/// optional and an empty (or null) entry is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceSpec {
    /// Extra `${KEY}` template values substituted into the manifest.
    pub template: BTreeMap<String, String>,
}

/// The declared state for one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Hook run before any service is created or restarted.
    pub pre: Option<HookSpec>,
    /// Hook run after every service converged.
    pub post: Option<HookSpec>,
    /// Shared network definitions, rendered as `.network` quadlet units.
    pub networks: BTreeMap<String, SectionFields>,
    /// Shared volume definitions, rendered as `.volume` quadlet units.
    pub volumes: BTreeMap<String, SectionFields>,
    /// Declared services, keyed by name.
    #[serde(deserialize_with = "services_map")]
    pub services: BTreeMap<String, ServiceSpec>,
}

/// Accepts both `name: {}` and bare `name:` entries in the services map.
fn services_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, ServiceSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Option<ServiceSpec>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, spec)| (name, spec.unwrap_or_default()))
        .collect())
}

impl HostConfig {
    /// Loads `config.yml` from the host directory.
    pub fn load(host_dir: &Path) -> SyncerResult<Self> {
        let path = host_dir.join(CONFIG_FILE_NAME);
        let raw = fs::read_to_string(&path)
            .map_err(|e| SyncerError::io(path.display().to_string(), e))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| SyncerError::config(format!("failed to parse {}: {e}", path.display())))
    }
}

/// A service manifest: the sections of its quadlet container unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Fields of the `[Container]` section.
    #[serde(rename = "Container")]
    pub container: SectionFields,
    /// Fields of the `[Unit]` section.
    #[serde(rename = "Unit")]
    pub unit: SectionFields,
    /// Fields of the `[Service]` section.
    #[serde(rename = "Service")]
    pub service: SectionFields,
}

impl Manifest {
    /// Loads `manifest.yml` from the service directory.
    pub fn load(service_dir: &Path) -> SyncerResult<Self> {
        let path = service_dir.join(MANIFEST_FILE_NAME);
        let raw = fs::read_to_string(&path)
            .map_err(|e| SyncerError::io(path.display().to_string(), e))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| SyncerError::config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Loads the manifest and, when a `manifest.sops.yml` overlay exists,
    /// decrypts it and merges its container fields.
    pub async fn load_with_overlay(service_dir: &Path, env: &RunEnv) -> SyncerResult<Self> {
        let mut manifest = Self::load(service_dir)?;

        let sops_path = service_dir.join(MANIFEST_SOPS_FILE_NAME);
        if sops_path.exists() {
            let sops_arg = sops_path.display().to_string();
            tracing::debug!(path = %sops_arg, "decrypting manifest overlay");
            let decrypted = shell::exec_ok(SOPS_CMD, &["--decrypt", &sops_arg], None, env).await?;
            let overlay: Manifest = serde_yaml::from_str(&decrypted).map_err(|e| {
                SyncerError::config(format!("failed to parse decrypted {sops_arg}: {e}"))
            })?;
            manifest.merge_container_overlay(overlay);
        }

        Ok(manifest)
    }

    /// Appends the overlay's container fields to this manifest.
    ///
    /// Values for a field already present are appended after the plain
    /// ones; unit and service sections of the overlay are ignored.
    pub fn merge_container_overlay(&mut self, overlay: Manifest) {
        for (field, values) in overlay.container {
            self.container.entry(field).or_default().extend(values);
        }
    }
}
