//! Sync orchestration: create every desired service, restart what
//! changed, and verify convergence.
//!
//! The backend's state is only eventually consistent with respect to
//! control commands and offers no readiness notification, so the engine
//! mutates strictly sequentially and polls with fixed settle delays.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use tracing::{error, info, warn};

use gitops_sync_common::{ObservedState, ServiceSyncer, SyncError};

use crate::diff::{restart_candidates, HashState};

/// Pause after each restart before re-observing.
const RESTART_SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Longer pause before the final stability check.
const CONVERGE_SETTLE_DELAY: Duration = Duration::from_secs(4);

/// Brings the declared services up: pre hook, create all, restart what
/// changed, verify convergence, post hook.
///
/// Hook and inspection failures abort the run; per-service failures are
/// collected and reported together while sibling services continue.
pub async fn services_up<S: ServiceSyncer + ?Sized>(syncer: &S) -> Result<(), SyncError> {
    let desired = syncer
        .desired_state()
        .await
        .map_err(|e| SyncError::fatal(format!("failed to load desired state: {e}")))?;

    if let Some(pre) = &desired.pre {
        info!("running pre hook");
        syncer
            .run_pre(&pre.script)
            .await
            .map_err(|e| SyncError::fatal(e.to_string()))?;
    }

    let observed = fetch_observed(syncer).await?;

    info!("creating services");
    let mut materialized: BTreeMap<String, HashState> = desired
        .services
        .keys()
        .map(|service| (service.clone(), HashState::NotCreated))
        .collect();
    let mut failed: BTreeSet<String> = BTreeSet::new();

    for (service, spec) in &desired.services {
        match syncer.create_or_update(service, spec).await {
            Ok(new_hash) => {
                let old_hash = observed.get(service).map(String::as_str).unwrap_or("");
                info!(service = %service, old_hash = %old_hash, new_hash = %new_hash, "service created");
                if old_hash != new_hash {
                    info!(service = %service, "service changed");
                }
                materialized.insert(service.clone(), HashState::Created(new_hash));
            }
            Err(e) => {
                // The definition could not be materialized, so there is
                // nothing to restart; siblings are still attempted.
                error!(service = %service, error = %e, "failed to create service");
                materialized.insert(service.clone(), HashState::CreateFailed);
                failed.insert(service.clone());
            }
        }
    }

    info!("starting services");
    failed.extend(restart_changed(syncer, &materialized, observed).await?);

    if !failed.is_empty() {
        return Err(SyncError::partial(
            "some services failed to converge",
            failed,
        ));
    }

    if let Some(post) = &desired.post {
        info!("running post hook");
        syncer
            .run_post(&post.script)
            .await
            .map_err(|e| SyncError::fatal(e.to_string()))?;
    }

    info!("services up ok");
    Ok(())
}

/// Restarts every service whose materialized hash differs from the
/// observed one, until the candidate set drains or the retry budget is
/// spent. Returns the names that did not converge.
async fn restart_changed<S: ServiceSyncer + ?Sized>(
    syncer: &S,
    desired: &BTreeMap<String, HashState>,
    mut observed: ObservedState,
) -> Result<BTreeSet<String>, SyncError> {
    let mut attempts: HashMap<String, u32> = HashMap::new();
    let mut pending = restart_candidates(desired, &observed);

    while !pending.is_empty() {
        // Least-attempted first: every pending service gets one attempt
        // before any gets a second.
        pending.sort_by_key(|service| attempts.get(service).copied().unwrap_or(0));
        let service = pending[0].clone();

        if attempts.get(&service).copied().unwrap_or(0) > 0 {
            // One retry per service per run; a second failure anywhere
            // stops restart work for the whole batch.
            warn!(service = %service, "restart budget exhausted, aborting batch");
            return Ok(pending.into_iter().collect());
        }
        *attempts.entry(service.clone()).or_insert(0) += 1;

        let new_hash = desired
            .get(&service)
            .and_then(HashState::created)
            .unwrap_or("");
        let old_hash = observed.get(&service).map(String::as_str).unwrap_or("");
        info!(service = %service, old_hash = %old_hash, new_hash = %new_hash, "restarting service");

        if let Err(e) = syncer.restart(&service).await {
            // Not immediately fatal: the next iteration re-observes and
            // the attempt count decides.
            error!(service = %service, error = %e, "failed to restart service");
        }

        // Restarting one service may start or stop dependencies, so wait
        // for the backend to settle and re-observe everything.
        tokio::time::sleep(RESTART_SETTLE_DELAY).await;
        observed = fetch_observed(syncer).await?;
        pending = restart_candidates(desired, &observed);
    }

    // One more look after a longer pause, catching services that report
    // started and then fall over.
    tokio::time::sleep(CONVERGE_SETTLE_DELAY).await;
    observed = fetch_observed(syncer).await?;
    let unstable = restart_candidates(desired, &observed);
    if !unstable.is_empty() {
        warn!(services = ?unstable, "services did not stay converged");
    }
    Ok(unstable.into_iter().collect())
}

async fn fetch_observed<S: ServiceSyncer + ?Sized>(
    syncer: &S,
) -> Result<ObservedState, SyncError> {
    syncer
        .observed_state()
        .await
        .map_err(|e| SyncError::fatal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{stub_hash, StubSyncer};
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_deploy() {
        let stub = StubSyncer::with_services(&["a", "b"]);

        services_up(&stub).await.unwrap();

        assert_eq!(*stub.restart_calls.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(
            *stub.running.lock().unwrap(),
            ObservedState::from([
                ("a".to_string(), stub_hash("a")),
                ("b".to_string(), stub_hash("b")),
            ])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_noop_when_converged() {
        let hash_a = stub_hash("a");
        let stub = StubSyncer::with_services(&["a"]).with_running(&[("a", hash_a.as_str())]);

        services_up(&stub).await.unwrap();

        assert!(stub.restart_calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_idempotent() {
        let stub = StubSyncer::with_services(&["a", "b"]);

        services_up(&stub).await.unwrap();
        services_up(&stub).await.unwrap();

        // Restarted during the first run only.
        assert_eq!(stub.restart_count("a"), 1);
        assert_eq!(stub.restart_count("b"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_create_failure() {
        let mut stub = StubSyncer::with_services(&["a", "c"]).with_hooks();
        stub.fail_create.insert("c".to_string());

        let err = services_up(&stub).await.unwrap_err();

        let failed: Vec<&str> = err.failed_services().iter().map(String::as_str).collect();
        assert_eq!(failed, vec!["c"]);

        // The sibling was still created, restarted and converged.
        assert_eq!(*stub.restart_calls.lock().unwrap(), vec!["a"]);
        assert_eq!(stub.running.lock().unwrap()["a"], stub_hash("a"));

        // A failed run never reaches the post hook.
        assert_eq!(stub.pre_calls.lock().unwrap().len(), 1);
        assert!(stub.post_calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_cascade_abort() {
        let mut stub = StubSyncer::with_services(&["a", "b", "c", "d", "e"]);
        stub.fail_restart.insert("c".to_string());
        stub.fail_restart.insert("d".to_string());

        let err = services_up(&stub).await.unwrap_err();

        let failed: Vec<&str> = err.failed_services().iter().map(String::as_str).collect();
        assert_eq!(failed, vec!["c", "d"]);

        // Every service was attempted exactly once: after c fails, the
        // untried d and e go before c's retry, and the budget check
        // aborts before anything is attempted twice.
        assert_eq!(
            *stub.restart_calls.lock().unwrap(),
            vec!["a", "b", "c", "d", "e"]
        );

        // Healthy siblings converged despite the abort.
        let running = stub.running.lock().unwrap();
        assert_eq!(running["a"], stub_hash("a"));
        assert_eq!(running["b"], stub_hash("b"));
        assert_eq!(running["e"], stub_hash("e"));
        assert!(!running.contains_key("c"));
        assert!(!running.contains_key("d"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_error_is_tolerated_if_converged() {
        // The restart command errors but the service comes up anyway;
        // the engine trusts observation, not the command's exit code.
        let hash_a = stub_hash("a");
        let mut stub = StubSyncer::with_services(&["a"]).with_scripted_observations(&[
            &[],
            &[("a", hash_a.as_str())],
            &[("a", hash_a.as_str())],
        ]);
        stub.fail_restart.insert("a".to_string());

        services_up(&stub).await.unwrap();

        assert_eq!(stub.restart_count("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_looping_service_reported() {
        // Converges during the loop, gone again at the stability check.
        let hash_a = stub_hash("a");
        let mut stub = StubSyncer::with_services(&["a"]).with_scripted_observations(&[
            &[],
            &[("a", hash_a.as_str())],
            &[],
        ]);
        stub.fail_restart.insert("a".to_string());

        let err = services_up(&stub).await.unwrap_err();

        let failed: Vec<&str> = err.failed_services().iter().map(String::as_str).collect();
        assert_eq!(failed, vec!["a"]);
        assert_eq!(stub.restart_count("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_hook_failure_is_fatal() {
        let mut stub = StubSyncer::with_services(&["a"]).with_hooks();
        stub.fail_pre = true;

        let err = services_up(&stub).await.unwrap_err();

        assert!(err.failed_services().is_empty());
        assert!(err.summary().contains("pre hook"));

        // Nothing was mutated.
        assert!(stub.create_calls.lock().unwrap().is_empty());
        assert!(stub.restart_calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_hook_failure_fails_run() {
        let hash_a = stub_hash("a");
        let mut stub = StubSyncer::with_services(&["a"])
            .with_running(&[("a", hash_a.as_str())])
            .with_hooks();
        stub.fail_post = true;

        let err = services_up(&stub).await.unwrap_err();

        assert!(err.summary().contains("post hook"));
        assert_eq!(stub.post_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hooks_run_on_success() {
        let stub = StubSyncer::with_services(&["a"]).with_hooks();

        services_up(&stub).await.unwrap();

        assert_eq!(*stub.pre_calls.lock().unwrap(), vec!["echo pre"]);
        assert_eq!(*stub.post_calls.lock().unwrap(), vec!["echo post"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspection_failure_is_fatal() {
        let mut stub = StubSyncer::with_services(&["a"]);
        stub.fail_inspection = true;

        let err = services_up(&stub).await.unwrap_err();

        assert!(err.failed_services().is_empty());
        assert!(stub.create_calls.lock().unwrap().is_empty());
    }
}
