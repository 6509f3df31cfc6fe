//! Subprocess execution for the reconciler and its backends.
//!
//! Commands are run with an explicit argv, an optional working directory
//! and the run's environment overrides. Nothing is passed through a shell,
//! so arguments never need quoting.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{SyncerError, SyncerResult};

/// Path-resolved name of the `podman` binary.
pub const PODMAN_CMD: &str = "podman";

/// Path-resolved name of the `systemctl` binary.
pub const SYSTEMCTL_CMD: &str = "systemctl";

/// Path-resolved name of the `git` binary.
pub const GIT_CMD: &str = "git";

/// Path-resolved name of the `bash` binary, used for hook scripts.
pub const BASH_CMD: &str = "bash";

/// Path-resolved name of the `sops` binary, used for manifest overlays.
pub const SOPS_CMD: &str = "sops";

/// Path-resolved name of the `ssh-agent` binary.
pub const SSH_AGENT_CMD: &str = "ssh-agent";

/// Path-resolved name of the `ssh-add` binary.
pub const SSH_ADD_CMD: &str = "ssh-add";

/// Run-scoped environment overrides applied to every subprocess.
///
/// Owned by the orchestrating entry point and threaded through each call
/// that executes host tooling, so per-run state (an ssh-agent socket, for
/// example) never leaks into the process-wide environment.
#[derive(Debug, Clone, Default)]
pub struct RunEnv {
    vars: Vec<(String, String)>,
}

impl RunEnv {
    /// Creates an empty set of overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an override.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.vars.retain(|(k, _)| *k != key);
        self.vars.push((key, value.into()));
    }

    /// The overrides as key/value pairs.
    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }
}

/// Result of a subprocess execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// Trimmed stdout.
    pub stdout: String,
    /// Trimmed stderr.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Renders a command line for logging and error messages.
fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Executes a command and captures its output.
///
/// A non-zero exit code is reported through [`ExecResult`], not as an
/// error; only a spawn failure returns `Err`.
pub async fn exec(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: &RunEnv,
) -> SyncerResult<ExecResult> {
    let rendered = render(program, args);
    tracing::debug!(command = %rendered, cwd = ?cwd, "running command");

    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in env.vars() {
        cmd.env(key, value);
    }

    let output = cmd.output().await.map_err(|e| SyncerError::Spawn {
        command: rendered.clone(),
        source: e,
    })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %rendered, "command succeeded");
    } else {
        tracing::warn!(
            command = %rendered,
            exit_code = exit_code,
            stderr = %result.stderr,
            "command failed"
        );
    }

    Ok(result)
}

/// Executes a command and returns its stdout, failing on non-zero exit.
pub async fn exec_ok(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: &RunEnv,
) -> SyncerResult<String> {
    let result = exec(program, args, cwd, env).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(SyncerError::CommandFailed {
            command: render(program, args),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_env_set_replaces() {
        let mut env = RunEnv::new();
        env.set("SSH_AUTH_SOCK", "/tmp/agent.1");
        env.set("SSH_AGENT_PID", "42");
        env.set("SSH_AUTH_SOCK", "/tmp/agent.2");

        assert_eq!(env.vars().len(), 2);
        assert!(env
            .vars()
            .contains(&("SSH_AUTH_SOCK".to_string(), "/tmp/agent.2".to_string())));
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
        };
        assert_eq!(result.combined_output(), "out\nerr");

        let result = ExecResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "err".to_string(),
        };
        assert!(!result.success());
        assert_eq!(result.combined_output(), "err");
    }

    #[test]
    fn test_render() {
        assert_eq!(render("podman", &["ps", "--format", "json"]), "podman ps --format json");
        assert_eq!(render("ssh-agent", &[]), "ssh-agent");
    }

    #[tokio::test]
    async fn test_exec_captures_output() {
        let result = exec("echo", &["hello"], None, &RunEnv::new()).await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit() {
        let result = exec("false", &[], None, &RunEnv::new()).await.unwrap();
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_exec_ok_failure() {
        let err = exec_ok("false", &[], None, &RunEnv::new()).await.unwrap_err();
        match err {
            SyncerError::CommandFailed { exit_code, .. } => assert_eq!(exit_code, 1),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exec_applies_env_overrides() {
        let mut env = RunEnv::new();
        env.set("GITOPS_TEST_VAR", "present");
        let result = exec("sh", &["-c", "echo $GITOPS_TEST_VAR"], None, &env)
            .await
            .unwrap();
        assert_eq!(result.stdout, "present");
    }

    #[tokio::test]
    async fn test_exec_spawn_error() {
        let err = exec("/nonexistent/gitops-test-binary", &[], None, &RunEnv::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncerError::Spawn { .. }));
    }
}
