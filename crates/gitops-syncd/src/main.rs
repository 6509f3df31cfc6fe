//! gitops-syncd entry point.
//!
//! One-shot reconciliation commands for a single host: `sync` fetches the
//! configuration repository and converges, `up`/`clean` work against a
//! local host directory, `down` stops everything managed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use gitops_quadlet::QuadletSyncer;
use gitops_sync_common::{RunEnv, SyncError, SyncerError};
use gitops_syncd::{cleanup, fetch, reconcile};

#[derive(Parser)]
#[command(name = "gitops-syncd", version, about = "Single-host gitops service reconciler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the configuration repository, bring services up, then clean orphans.
    Sync {
        /// Remote repository URL.
        remote: String,
        /// Local checkout directory.
        repo_dir: PathBuf,
    },
    /// Reconcile services against a host configuration directory.
    Up {
        /// Host configuration directory.
        host_dir: PathBuf,
    },
    /// Stop services that are running but no longer declared.
    Clean {
        /// Host configuration directory.
        host_dir: PathBuf,
    },
    /// Stop every managed service.
    Down,
}

/// Initialize tracing/logging.
fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.failed_services().is_empty() {
                error!(error = %e, "run failed");
            } else {
                error!(error = %e, services = ?e.failed_services(), "run failed");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), SyncError> {
    match command {
        Command::Sync { remote, repo_dir } => {
            let repo_dir = absolutize(repo_dir)?;
            let mut env = RunEnv::new();
            let outcome = fetch::fetch(&remote, &repo_dir, &mut env)
                .await
                .map_err(fatal)?;
            info!(head = %outcome.head, "deploying revision");

            let syncer = QuadletSyncer::new(outcome.host_dir)
                .map_err(fatal)?
                .with_env(env);
            syncer.write_host_units().await.map_err(fatal)?;
            reconcile::services_up(&syncer).await?;
            cleanup::orphans_down(&syncer).await
        }
        Command::Up { host_dir } => {
            let syncer = QuadletSyncer::new(absolutize(host_dir)?).map_err(fatal)?;
            syncer.write_host_units().await.map_err(fatal)?;
            reconcile::services_up(&syncer).await
        }
        Command::Clean { host_dir } => {
            let syncer = QuadletSyncer::new(absolutize(host_dir)?).map_err(fatal)?;
            cleanup::orphans_down(&syncer).await
        }
        Command::Down => {
            let syncer = QuadletSyncer::detached().map_err(fatal)?;
            cleanup::all_down(&syncer).await
        }
    }
}

fn fatal(e: SyncerError) -> SyncError {
    SyncError::fatal(e.to_string())
}

fn absolutize(path: PathBuf) -> Result<PathBuf, SyncError> {
    if path.is_absolute() {
        Ok(path)
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .map_err(|e| SyncError::fatal(format!("cannot resolve working directory: {e}")))
    }
}
