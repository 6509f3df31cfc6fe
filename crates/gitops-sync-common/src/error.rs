//! Error types for sync operations.
//!
//! Two layers: [`SyncerError`] is returned by the service control backend
//! (one variant per capability operation, plus subprocess plumbing), and
//! [`SyncError`] is the aggregate outcome of a whole reconciliation run,
//! carrying the set of services that failed.

use std::collections::BTreeSet;
use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for backend operations.
pub type SyncerResult<T> = Result<T, SyncerError>;

/// Which hook a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Hook run before any service is created or restarted.
    Pre,
    /// Hook run after every service converged.
    Post,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Pre => write!(f, "pre"),
            HookKind::Post => write!(f, "post"),
        }
    }
}

/// Errors that can occur in the service control backend.
#[derive(Debug, Error)]
pub enum SyncerError {
    /// Failed to spawn a subprocess.
    #[error("failed to execute '{command}': {source}")]
    Spawn {
        /// The command that failed to spawn.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Subprocess returned a non-zero exit code.
    #[error("command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Host configuration could not be loaded or parsed.
    #[error("configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Observed state could not be inspected. Fatal to the caller.
    #[error("failed to inspect running services: {message}")]
    Inspection {
        /// Error message.
        message: String,
    },

    /// A service definition could not be materialized.
    #[error("failed to create service '{service}': {message}")]
    Create {
        /// The service name.
        service: String,
        /// Error message.
        message: String,
    },

    /// A service restart failed.
    #[error("failed to restart service '{service}': {message}")]
    Restart {
        /// The service name.
        service: String,
        /// Error message.
        message: String,
    },

    /// A service stop failed.
    #[error("failed to stop service '{service}': {message}")]
    Stop {
        /// The service name.
        service: String,
        /// Error message.
        message: String,
    },

    /// A pre or post hook failed. Fatal to the run.
    #[error("{kind} hook failed: {message}")]
    Hook {
        /// Which hook failed.
        kind: HookKind,
        /// Error message.
        message: String,
    },

    /// Filesystem operation failed.
    #[error("io error at {path}: {source}")]
    Io {
        /// The path involved.
        path: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl SyncerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an inspection error.
    pub fn inspection(message: impl Into<String>) -> Self {
        Self::Inspection {
            message: message.into(),
        }
    }

    /// Creates a create error for a service.
    pub fn create(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Create {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a restart error for a service.
    pub fn restart(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Restart {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a stop error for a service.
    pub fn stop(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stop {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a hook error.
    pub fn hook(kind: HookKind, message: impl Into<String>) -> Self {
        Self::Hook {
            kind,
            message: message.into(),
        }
    }

    /// Creates an IO error with path context.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Aggregate outcome of a reconciliation run.
///
/// Carries a human-readable summary and the set of services that failed
/// during the run. Fatal failures (hooks, inspection) produce an empty
/// service set; partial failures name every service that did not converge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{summary}")]
pub struct SyncError {
    summary: String,
    failed_services: BTreeSet<String>,
}

impl SyncError {
    /// Creates a fatal error with no per-service attribution.
    pub fn fatal(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            failed_services: BTreeSet::new(),
        }
    }

    /// Creates a partial-failure error naming the services that failed.
    pub fn partial(
        summary: impl Into<String>,
        failed_services: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            summary: summary.into(),
            failed_services: failed_services.into_iter().collect(),
        }
    }

    /// The human-readable summary.
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// The services that failed during the run. Empty for fatal errors.
    pub fn failed_services(&self) -> &BTreeSet<String> {
        &self.failed_services
    }
}
