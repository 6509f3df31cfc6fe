//! Fetch orchestration: sync the configuration repository and resolve the
//! host configuration directory.
//!
//! The checkout is forced to the remote's default branch tip and the tip
//! commit's signature is verified before anything is deployed from it.

use std::path::{Path, PathBuf};

use tracing::info;

use gitops_sync_common::shell::{self, GIT_CMD, SSH_ADD_CMD, SSH_AGENT_CMD};
use gitops_sync_common::{RunEnv, SyncerError, SyncerResult};

/// Ref deployed on every sync.
const DEPLOY_REF: &str = "origin/HEAD";

/// Subdirectory of the repository holding per-host configuration.
const HOSTS_SUBDIR: &str = "gitops";

/// Result of a repository sync.
#[derive(Debug)]
pub struct FetchOutcome {
    /// The commit id being deployed.
    pub head: String,
    /// The host configuration directory for this host.
    pub host_dir: PathBuf,
}

/// Clones or updates the configuration repository, verifies the tip
/// commit, and resolves this host's configuration directory.
///
/// The env overrides are extended with the ssh-agent started for this
/// run, so subsequent backend calls inherit it.
pub async fn fetch(remote: &str, repo_dir: &Path, env: &mut RunEnv) -> SyncerResult<FetchOutcome> {
    info!("setting up ssh env");
    setup_ssh_env(env).await?;

    info!("syncing git repo");
    if !repo_dir.exists() {
        let repo_arg = repo_dir.display().to_string();
        shell::exec_ok(GIT_CMD, &["clone", remote, &repo_arg], None, env).await?;
    }

    let cwd = Some(repo_dir);
    shell::exec_ok(GIT_CMD, &["fetch"], cwd, env).await?;
    shell::exec_ok(GIT_CMD, &["clean", "--force"], cwd, env).await?;
    shell::exec_ok(GIT_CMD, &["reset", "--hard", DEPLOY_REF], cwd, env).await?;

    let head = shell::exec_ok(GIT_CMD, &["rev-parse", "HEAD"], cwd, env).await?;

    // An unsigned tip is never deployed.
    shell::exec_ok(GIT_CMD, &["verify-commit", "-v", "HEAD"], cwd, env).await?;

    let hostname =
        std::env::var("HOSTNAME").map_err(|_| SyncerError::config("HOSTNAME is not set"))?;
    let host_dir = repo_dir.join(HOSTS_SUBDIR).join(&hostname);

    Ok(FetchOutcome { head, host_dir })
}

/// Starts an ssh-agent for this run and loads `$SSH_KEY` when set.
async fn setup_ssh_env(env: &mut RunEnv) -> SyncerResult<()> {
    let output = shell::exec_ok(SSH_AGENT_CMD, &[], None, env).await?;
    for (key, value) in parse_agent_vars(&output) {
        env.set(key, value);
    }

    match std::env::var("SSH_KEY") {
        Ok(key) if !key.is_empty() => {
            shell::exec_ok(SSH_ADD_CMD, &[&key], None, env).await?;
        }
        _ => {}
    }

    Ok(())
}

/// Extracts `SSH_AUTH_SOCK` and `SSH_AGENT_PID` from ssh-agent's
/// `VAR=value; export VAR;` startup output.
fn parse_agent_vars(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let assignment = line.split(';').next()?;
            let (key, value) = assignment.split_once('=')?;
            let key = key.trim();
            matches!(key, "SSH_AUTH_SOCK" | "SSH_AGENT_PID")
                .then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_agent_vars() {
        let output = "SSH_AUTH_SOCK=/tmp/ssh-XYZ/agent.123; export SSH_AUTH_SOCK;\n\
                      SSH_AGENT_PID=124; export SSH_AGENT_PID;\n\
                      echo Agent pid 124;";

        assert_eq!(
            parse_agent_vars(output),
            vec![
                ("SSH_AUTH_SOCK".to_string(), "/tmp/ssh-XYZ/agent.123".to_string()),
                ("SSH_AGENT_PID".to_string(), "124".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_agent_vars_ignores_noise() {
        assert!(parse_agent_vars("").is_empty());
        assert!(parse_agent_vars("no assignments here").is_empty());
        assert!(parse_agent_vars("OTHER_VAR=x; export OTHER_VAR;").is_empty());
    }
}
