//! The quadlet/systemd service control backend.
//!
//! Services are materialized as quadlet `.container` units under the
//! user's systemd generator directory, started and stopped with
//! `systemctl --user`, and observed through `podman ps` labels.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use gitops_sync_common::shell::{self, BASH_CMD, PODMAN_CMD, SYSTEMCTL_CMD};
use gitops_sync_common::{
    hash, DesiredState, HookKind, HostConfig, Manifest, ObservedState, RunEnv, ServiceSpec,
    ServiceSyncer, SyncerError, SyncerResult,
};

use crate::unit::{self, HASH_LABEL, SERVICE_LABEL};

/// Prefix of every unit this backend manages.
pub const UNIT_PREFIX: &str = "gitops-";

/// Quadlet generator directory, relative to `$HOME`.
pub const UNIT_DIR_RELATIVE: &str = ".config/containers/systemd";

/// Mode of written unit files.
const UNIT_FILE_MODE: u32 = 0o640;

/// Service control backend driving quadlet units.
pub struct QuadletSyncer {
    host_dir: Option<PathBuf>,
    unit_dir: PathBuf,
    env: RunEnv,
}

impl QuadletSyncer {
    /// Creates a backend for a host configuration directory.
    pub fn new(host_dir: PathBuf) -> SyncerResult<Self> {
        Ok(Self {
            host_dir: Some(host_dir),
            unit_dir: Self::default_unit_dir()?,
            env: RunEnv::new(),
        })
    }

    /// Creates a backend with no host configuration, for operations that
    /// only touch observed state (full teardown).
    pub fn detached() -> SyncerResult<Self> {
        Ok(Self {
            host_dir: None,
            unit_dir: Self::default_unit_dir()?,
            env: RunEnv::new(),
        })
    }

    /// Replaces the run-scoped environment overrides.
    pub fn with_env(mut self, env: RunEnv) -> Self {
        self.env = env;
        self
    }

    /// Overrides the quadlet generator directory.
    pub fn with_unit_dir(mut self, unit_dir: PathBuf) -> Self {
        self.unit_dir = unit_dir;
        self
    }

    fn default_unit_dir() -> SyncerResult<PathBuf> {
        let home =
            std::env::var("HOME").map_err(|_| SyncerError::config("HOME is not set"))?;
        Ok(PathBuf::from(home).join(UNIT_DIR_RELATIVE))
    }

    fn host_dir(&self) -> SyncerResult<&Path> {
        self.host_dir
            .as_deref()
            .ok_or_else(|| SyncerError::config("no host configuration directory"))
    }

    /// systemd unit name of a managed service.
    pub fn service_unit_name(service: &str) -> String {
        format!("{UNIT_PREFIX}{service}.service")
    }

    /// Quadlet file name of a managed service.
    pub fn container_file_name(service: &str) -> String {
        format!("{UNIT_PREFIX}{service}.container")
    }

    fn container_file_path(&self, service: &str) -> PathBuf {
        self.unit_dir.join(Self::container_file_name(service))
    }

    async fn daemon_reload(&self) -> SyncerResult<()> {
        shell::exec_ok(SYSTEMCTL_CMD, &["--user", "daemon-reload"], None, &self.env).await?;
        Ok(())
    }

    /// Writes `.network` and `.volume` units for the shared resources
    /// declared in the host configuration, then reloads systemd.
    pub async fn write_host_units(&self) -> SyncerResult<()> {
        let config = HostConfig::load(self.host_dir()?)?;
        if self.write_host_unit_files(&config)? {
            self.daemon_reload().await?;
        }
        Ok(())
    }

    /// Writes the shared-resource unit files; returns whether any were
    /// written.
    fn write_host_unit_files(&self, config: &HostConfig) -> SyncerResult<bool> {
        let mut written = false;

        for (network, fields) in &config.networks {
            let path = self.unit_dir.join(format!("{UNIT_PREFIX}{network}.network"));
            write_unit_file(&path, &unit::network_unit(fields, network))?;
            debug!(network = %network, path = %path.display(), "wrote network unit");
            written = true;
        }

        for (volume, fields) in &config.volumes {
            let path = self.unit_dir.join(format!("{UNIT_PREFIX}{volume}.volume"));
            write_unit_file(&path, &unit::volume_unit(fields, volume))?;
            debug!(volume = %volume, path = %path.display(), "wrote volume unit");
            written = true;
        }

        Ok(written)
    }

    async fn write_container_unit(&self, service: &str, spec: &ServiceSpec) -> SyncerResult<String> {
        let host_dir = self.host_dir()?;
        let service_dir = host_dir.join(service);

        let content_hash = hash::hash_dir(&service_dir)?;
        info!(service = %service, hash = %content_hash, "updating service");

        let manifest = Manifest::load_with_overlay(&service_dir, &self.env).await?;

        let mut template = BTreeMap::new();
        template.insert("HOST_DIR".to_string(), host_dir.display().to_string());
        template.insert("SERVICE_DIR".to_string(), service_dir.display().to_string());
        template.insert("SERVICE".to_string(), service.to_string());
        template.insert("HASH".to_string(), content_hash.clone());
        for (key, value) in &spec.template {
            template.insert(key.clone(), value.clone());
        }

        let content = unit::container_unit(&manifest, service, &content_hash, &template);
        write_unit_file(&self.container_file_path(service), &content)?;

        self.daemon_reload().await?;

        Ok(content_hash)
    }

    async fn run_hook(&self, kind: HookKind, script: &str) -> SyncerResult<()> {
        let host_dir = self.host_dir()?;
        shell::exec_ok(BASH_CMD, &["-c", "--", script], Some(host_dir), &self.env)
            .await
            .map_err(|e| SyncerError::hook(kind, e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ServiceSyncer for QuadletSyncer {
    async fn desired_state(&self) -> SyncerResult<DesiredState> {
        let config = HostConfig::load(self.host_dir()?)?;
        Ok(DesiredState {
            services: config.services,
            pre: config.pre,
            post: config.post,
        })
    }

    async fn observed_state(&self) -> SyncerResult<ObservedState> {
        let output = shell::exec_ok(PODMAN_CMD, &["ps", "--format", "json"], None, &self.env)
            .await
            .map_err(|e| SyncerError::inspection(e.to_string()))?;
        Ok(parse_running_services(&output))
    }

    async fn create_or_update(&self, service: &str, spec: &ServiceSpec) -> SyncerResult<String> {
        self.write_container_unit(service, spec)
            .await
            .map_err(|e| SyncerError::create(service, e.to_string()))
    }

    async fn restart(&self, service: &str) -> SyncerResult<()> {
        let unit_name = Self::service_unit_name(service);
        shell::exec_ok(SYSTEMCTL_CMD, &["--user", "restart", &unit_name], None, &self.env)
            .await
            .map_err(|e| SyncerError::restart(service, e.to_string()))?;
        Ok(())
    }

    async fn stop(&self, service: &str) -> SyncerResult<()> {
        let unit_name = Self::service_unit_name(service);
        shell::exec_ok(SYSTEMCTL_CMD, &["--user", "stop", &unit_name], None, &self.env)
            .await
            .map_err(|e| SyncerError::stop(service, e.to_string()))?;

        // Unit file removal is best-effort: the service is already down.
        let _ = fs::remove_file(self.container_file_path(service));
        Ok(())
    }

    async fn run_pre(&self, script: &str) -> SyncerResult<()> {
        self.run_hook(HookKind::Pre, script).await
    }

    async fn run_post(&self, script: &str) -> SyncerResult<()> {
        self.run_hook(HookKind::Post, script).await
    }
}

/// One container entry from `podman ps --format json`.
#[derive(Debug, Deserialize)]
struct PsContainer {
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

/// Extracts the managed-service map from `podman ps` JSON output.
///
/// Containers without a service label are not managed by this tool and
/// are ignored; unparseable output is treated as no running services.
fn parse_running_services(raw: &str) -> ObservedState {
    let containers: Vec<PsContainer> = serde_json::from_str(raw).unwrap_or_default();

    let mut services = ObservedState::new();
    for container in containers {
        let Some(labels) = container.labels else {
            continue;
        };
        if let Some(service) = labels.get(SERVICE_LABEL) {
            if !service.is_empty() {
                let content_hash = labels.get(HASH_LABEL).cloned().unwrap_or_default();
                services.insert(service.clone(), content_hash);
            }
        }
    }
    services
}

fn write_unit_file(path: &Path, content: &str) -> SyncerResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SyncerError::io(parent.display().to_string(), e))?;
    }
    fs::write(path, content).map_err(|e| SyncerError::io(path.display().to_string(), e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(UNIT_FILE_MODE))
        .map_err(|e| SyncerError::io(path.display().to_string(), e))?;
    Ok(())
}
