//! The service control capability consumed by the reconciliation engine.
//!
//! The engine only ever talks to a [`ServiceSyncer`]; a concrete backend
//! (quadlet/systemd in production, a stub in tests) is injected at
//! construction time.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::{HookSpec, ServiceSpec};
use crate::error::SyncerResult;

/// Point-in-time snapshot of running services: name to content hash.
///
/// Never cached by the engine; re-fetched in full after every batch of
/// mutations, since restarting one service can start or stop others.
pub type ObservedState = BTreeMap<String, String>;

/// The declared state a host should converge to.
#[derive(Debug, Clone, Default)]
pub struct DesiredState {
    /// Declared services, keyed by name.
    pub services: BTreeMap<String, ServiceSpec>,
    /// Hook run before any service is created or restarted.
    pub pre: Option<HookSpec>,
    /// Hook run after every service converged.
    pub post: Option<HookSpec>,
}

/// Capability boundary between the reconciliation engine and the backend
/// that actually manages services.
#[async_trait]
pub trait ServiceSyncer: Send + Sync {
    /// Loads the declared state for this host.
    async fn desired_state(&self) -> SyncerResult<DesiredState>;

    /// Inspects the currently running services and their content hashes.
    async fn observed_state(&self) -> SyncerResult<ObservedState>;

    /// Materializes (creates or updates) a service definition and returns
    /// its content hash.
    async fn create_or_update(&self, service: &str, spec: &ServiceSpec) -> SyncerResult<String>;

    /// Restarts a service so it picks up its latest definition.
    async fn restart(&self, service: &str) -> SyncerResult<()>;

    /// Stops a service and removes its definition.
    async fn stop(&self, service: &str) -> SyncerResult<()>;

    /// Runs the pre hook script.
    async fn run_pre(&self, script: &str) -> SyncerResult<()>;

    /// Runs the post hook script.
    async fn run_post(&self, script: &str) -> SyncerResult<()>;
}
