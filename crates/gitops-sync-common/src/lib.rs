//! Shared infrastructure for the gitops host service reconciler.
//!
//! - [`config`]: host configuration and service manifest loading
//! - [`error`]: backend and run-level error types
//! - [`hash`]: content hashing for drift detection
//! - [`shell`]: subprocess execution with run-scoped env overrides
//! - [`syncer`]: the [`ServiceSyncer`] capability trait
//!
//! # Architecture
//!
//! The reconciliation engine (the `gitops-syncd` crate) depends only on
//! the [`ServiceSyncer`] trait; the quadlet backend (`gitops-quadlet`)
//! implements it against `systemctl --user` and `podman`. Everything that
//! both sides need (configuration types, errors, hashing, subprocess
//! plumbing) lives here.

pub mod config;
pub mod error;
pub mod hash;
pub mod shell;
pub mod syncer;

// Re-export commonly used items at crate root
pub use config::{HookSpec, HostConfig, Manifest, SectionFields, ServiceSpec};
pub use error::{HookKind, SyncError, SyncerError, SyncerResult};
pub use shell::{ExecResult, RunEnv};
pub use syncer::{DesiredState, ObservedState, ServiceSyncer};
