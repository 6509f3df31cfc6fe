//! Orphan cleanup and full teardown.
//!
//! Both operations stop services and collect every failure instead of
//! aborting on the first, so one wedged unit never blocks cleanup of the
//! rest.

use std::collections::BTreeSet;

use tracing::{error, info};

use gitops_sync_common::{ServiceSyncer, SyncError};

use crate::diff::orphans;

/// Stops every service that is running but no longer declared.
pub async fn orphans_down<S: ServiceSyncer + ?Sized>(syncer: &S) -> Result<(), SyncError> {
    let desired = syncer
        .desired_state()
        .await
        .map_err(|e| SyncError::fatal(format!("failed to load desired state: {e}")))?;
    let observed = syncer
        .observed_state()
        .await
        .map_err(|e| SyncError::fatal(e.to_string()))?;

    let mut failed = BTreeSet::new();

    for service in orphans(&desired.services, &observed) {
        match syncer.stop(&service).await {
            Ok(()) => info!(service = %service, "stopped orphaned service"),
            Err(e) => {
                error!(service = %service, error = %e, "failed to stop orphaned service");
                failed.insert(service);
            }
        }
    }

    if !failed.is_empty() {
        return Err(SyncError::partial(
            "failed to stop some orphaned services",
            failed,
        ));
    }

    info!("orphaned services cleaned up");
    Ok(())
}

/// Stops every running managed service, regardless of desired state.
pub async fn all_down<S: ServiceSyncer + ?Sized>(syncer: &S) -> Result<(), SyncError> {
    let observed = syncer
        .observed_state()
        .await
        .map_err(|e| SyncError::fatal(e.to_string()))?;

    let mut failed = BTreeSet::new();

    for service in observed.keys() {
        match syncer.stop(service).await {
            Ok(()) => info!(service = %service, "stopped service"),
            Err(e) => {
                error!(service = %service, error = %e, "failed to stop service");
                failed.insert(service.clone());
            }
        }
    }

    if !failed.is_empty() {
        return Err(SyncError::partial("failed to stop some services", failed));
    }

    info!("services stopped");
    Ok(())
}
