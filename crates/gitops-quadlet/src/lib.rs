//! Quadlet/systemd service control backend.
//!
//! Implements the [`ServiceSyncer`](gitops_sync_common::ServiceSyncer)
//! capability against a host running podman with systemd user services:
//!
//! - [`unit`]: rendering of `.container`, `.network` and `.volume` units
//! - [`backend`]: the [`QuadletSyncer`] driving `systemctl` and `podman`

pub mod backend;
pub mod unit;

pub use backend::QuadletSyncer;
pub use unit::{HASH_LABEL, NETWORK_LABEL, SERVICE_LABEL, VOLUME_LABEL};
