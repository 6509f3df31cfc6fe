//! Scriptable in-memory `ServiceSyncer` for engine tests.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use gitops_sync_common::{
    DesiredState, HookKind, HookSpec, ObservedState, ServiceSpec, ServiceSyncer, SyncerError,
    SyncerResult,
};

/// Stub backend: services materialize with hash `h-<name>`, restarts mark
/// the service running with that hash, stops remove it. Failure sets and
/// call recorders let tests script partial failures and assert exactly
/// what the engine did.
#[derive(Default)]
pub(crate) struct StubSyncer {
    pub desired: DesiredState,
    pub running: Mutex<ObservedState>,

    pub fail_create: BTreeSet<String>,
    pub fail_restart: BTreeSet<String>,
    pub fail_stop: BTreeSet<String>,
    pub fail_pre: bool,
    pub fail_post: bool,
    pub fail_inspection: bool,

    /// When non-empty, observations are served from this script instead
    /// of the live `running` map.
    pub scripted_observations: Mutex<VecDeque<ObservedState>>,

    pub create_calls: Mutex<Vec<String>>,
    pub restart_calls: Mutex<Vec<String>>,
    pub stop_calls: Mutex<Vec<String>>,
    pub pre_calls: Mutex<Vec<String>>,
    pub post_calls: Mutex<Vec<String>>,
}

/// The hash a stubbed service materializes and runs with.
pub(crate) fn stub_hash(service: &str) -> String {
    format!("h-{service}")
}

impl StubSyncer {
    pub fn with_services(names: &[&str]) -> Self {
        let mut stub = Self::default();
        stub.desired.services = names
            .iter()
            .map(|name| (name.to_string(), ServiceSpec::default()))
            .collect();
        stub
    }

    pub fn with_running(self, entries: &[(&str, &str)]) -> Self {
        *self.running.lock().unwrap() = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn with_hooks(mut self) -> Self {
        self.desired.pre = Some(HookSpec {
            script: "echo pre".to_string(),
        });
        self.desired.post = Some(HookSpec {
            script: "echo post".to_string(),
        });
        self
    }

    pub fn with_scripted_observations(self, script: &[&[(&str, &str)]]) -> Self {
        *self.scripted_observations.lock().unwrap() = script
            .iter()
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .collect();
        self
    }

    pub fn restart_count(&self, service: &str) -> usize {
        self.restart_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|s| *s == service)
            .count()
    }
}

#[async_trait]
impl ServiceSyncer for StubSyncer {
    async fn desired_state(&self) -> SyncerResult<DesiredState> {
        Ok(self.desired.clone())
    }

    async fn observed_state(&self) -> SyncerResult<ObservedState> {
        if self.fail_inspection {
            return Err(SyncerError::inspection("podman unavailable"));
        }
        if let Some(scripted) = self.scripted_observations.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        Ok(self.running.lock().unwrap().clone())
    }

    async fn create_or_update(&self, service: &str, _spec: &ServiceSpec) -> SyncerResult<String> {
        self.create_calls.lock().unwrap().push(service.to_string());
        if self.fail_create.contains(service) {
            return Err(SyncerError::create(service, "manifest rejected"));
        }
        Ok(stub_hash(service))
    }

    async fn restart(&self, service: &str) -> SyncerResult<()> {
        self.restart_calls.lock().unwrap().push(service.to_string());
        if self.fail_restart.contains(service) {
            return Err(SyncerError::restart(service, "unit failed"));
        }
        self.running
            .lock()
            .unwrap()
            .insert(service.to_string(), stub_hash(service));
        Ok(())
    }

    async fn stop(&self, service: &str) -> SyncerResult<()> {
        self.stop_calls.lock().unwrap().push(service.to_string());
        if self.fail_stop.contains(service) {
            return Err(SyncerError::stop(service, "unit busy"));
        }
        self.running.lock().unwrap().remove(service);
        Ok(())
    }

    async fn run_pre(&self, script: &str) -> SyncerResult<()> {
        self.pre_calls.lock().unwrap().push(script.to_string());
        if self.fail_pre {
            return Err(SyncerError::hook(HookKind::Pre, "exit code 1"));
        }
        Ok(())
    }

    async fn run_post(&self, script: &str) -> SyncerResult<()> {
        self.post_calls.lock().unwrap().push(script.to_string());
        if self.fail_post {
            return Err(SyncerError::hook(HookKind::Post, "exit code 1"));
        }
        Ok(())
    }
}
