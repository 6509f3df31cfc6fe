//! Pure diff computation between desired and observed state.

use std::collections::BTreeMap;

use gitops_sync_common::ObservedState;

/// Per-run materialization state of a desired service's definition.
///
/// Assigned by the sync orchestrator as it creates services; only a
/// successfully materialized definition ever participates in restart
/// comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashState {
    /// Not materialized yet this run.
    NotCreated,
    /// Materialization failed this run; ineligible for restart.
    CreateFailed,
    /// Materialized with this content hash.
    Created(String),
}

impl HashState {
    /// The content hash, when the definition was materialized.
    pub fn created(&self) -> Option<&str> {
        match self {
            HashState::Created(content_hash) => Some(content_hash),
            _ => None,
        }
    }
}

/// Services present in observed state but not declared.
pub fn orphans<V>(desired: &BTreeMap<String, V>, observed: &ObservedState) -> Vec<String> {
    observed
        .keys()
        .filter(|service| !desired.contains_key(*service))
        .cloned()
        .collect()
}

/// Declared services whose materialized hash differs from the hash they
/// are observed running with.
///
/// A service missing from observed state compares as different; a
/// service without a materialized hash is never a candidate.
pub fn restart_candidates(
    desired: &BTreeMap<String, HashState>,
    observed: &ObservedState,
) -> Vec<String> {
    desired
        .iter()
        .filter_map(|(service, state)| {
            let content_hash = state.created()?;
            (observed.get(service).map(String::as_str) != Some(content_hash))
                .then(|| service.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn observed(entries: &[(&str, &str)]) -> ObservedState {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn materialized(entries: &[(&str, HashState)]) -> BTreeMap<String, HashState> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_orphans_is_key_difference() {
        let desired = materialized(&[
            ("a", HashState::Created("h1".into())),
            ("b", HashState::NotCreated),
        ]);
        let observed = observed(&[("a", "h1"), ("c", "h3"), ("d", "h4")]);

        assert_eq!(orphans(&desired, &observed), vec!["c", "d"]);
    }

    #[test]
    fn test_orphans_ignores_hash_values() {
        // Membership alone decides orphanhood; a failed create is still desired.
        let desired = materialized(&[("a", HashState::CreateFailed)]);
        let observed = observed(&[("a", "stale")]);

        assert!(orphans(&desired, &observed).is_empty());
    }

    #[test]
    fn test_orphans_empty_inputs() {
        let empty = materialized(&[]);
        assert!(orphans(&empty, &ObservedState::new()).is_empty());
        assert_eq!(orphans(&empty, &observed(&[("x", "h")])), vec!["x"]);
    }

    #[test]
    fn test_restart_candidates_detects_drift() {
        let desired = materialized(&[
            // Up to date.
            ("a", HashState::Created("h1".into())),
            // Drifted.
            ("b", HashState::Created("h2-new".into())),
            // Not running at all.
            ("c", HashState::Created("h3".into())),
        ]);
        let observed = observed(&[("a", "h1"), ("b", "h2-old")]);

        assert_eq!(restart_candidates(&desired, &observed), vec!["b", "c"]);
    }

    #[test]
    fn test_restart_candidates_excludes_unmaterialized() {
        let desired = materialized(&[
            ("a", HashState::NotCreated),
            ("b", HashState::CreateFailed),
        ]);
        let observed = observed(&[("a", "anything")]);

        assert!(restart_candidates(&desired, &observed).is_empty());
    }

    #[test]
    fn test_restart_candidates_empty_observed_hash_differs() {
        // An observed entry with an empty hash never equals a real hash.
        let desired = materialized(&[("a", HashState::Created("h1".into()))]);
        let observed = observed(&[("a", "")]);

        assert_eq!(restart_candidates(&desired, &observed), vec!["a"]);
    }

    #[test]
    fn test_diff_deterministic_across_insertion_order() {
        let forward = materialized(&[
            ("a", HashState::Created("h1".into())),
            ("b", HashState::Created("h2".into())),
            ("c", HashState::Created("h3".into())),
        ]);
        let reverse = materialized(&[
            ("c", HashState::Created("h3".into())),
            ("b", HashState::Created("h2".into())),
            ("a", HashState::Created("h1".into())),
        ]);
        let observed = observed(&[("b", "h2"), ("d", "h4"), ("e", "h5")]);

        assert_eq!(
            restart_candidates(&forward, &observed),
            restart_candidates(&reverse, &observed)
        );
        assert_eq!(orphans(&forward, &observed), orphans(&reverse, &observed));
    }
}
