use std::process::ExitStatus;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Args;
use tokio::process::Command;
use tracing::{info, warn};

use quorum_lock::{KeepAlive, QuorumLockManager};

use crate::config::FileConfig;

/// Exit code reported when the lease is lost while the command runs.
const EXIT_LEASE_LOST: i32 = 75;
/// Exit code reported when interrupted by Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Resource to lock.
    pub resource: String,

    /// Lease TTL in milliseconds (defaults to `[lock] default_ttl_ms`).
    #[arg(long)]
    pub ttl_ms: Option<u64>,

    /// Keep-alive interval in milliseconds (defaults to half the TTL).
    #[arg(long)]
    pub extend_interval_ms: Option<u64>,

    /// Command to run while holding the lock.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Lost,
    Interrupted,
}

/// Returns the exit code the CLI should terminate with.
pub async fn run(config: &FileConfig, args: &ExecArgs) -> anyhow::Result<i32> {
    let manager = config.manager()?;
    let resource = config.resource(&args.resource);
    let ttl = args
        .ttl_ms
        .map_or(manager.config().default_ttl, Duration::from_millis);
    let interval = args
        .extend_interval_ms
        .map_or_else(|| config.extend_interval(ttl), Duration::from_millis);

    execute(&manager, &resource, ttl, interval, &args.command).await
}

async fn execute(
    manager: &QuorumLockManager,
    resource: &str,
    ttl: Duration,
    interval: Duration,
    command: &[String],
) -> anyhow::Result<i32> {
    let (program, program_args) = command
        .split_first()
        .context("no command given after --")?;
    if interval.is_zero() || interval >= ttl {
        bail!("extend interval {interval:?} must be positive and shorter than ttl {ttl:?}");
    }

    let lock = manager
        .acquire(resource, ttl)
        .await
        .with_context(|| format!("failed to acquire {resource}"))?;
    info!(
        resource = %resource,
        validity_ms = %lock.remaining().as_millis(),
        "lock acquired"
    );
    if let Err(err) = KeepAlive::check_interval(&lock, interval) {
        if let Err(release_err) = manager.release(lock).await {
            warn!(resource = %resource, error = %release_err, "lock release failed");
        }
        return Err(err.into());
    }
    let keep_alive = manager.keep_alive(lock, interval)?;

    let spawned = Command::new(program)
        .args(program_args)
        .env("QUORUM_LOCK_TOKEN", keep_alive.token().as_str())
        .env("QUORUM_LOCK_RESOURCE", resource)
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            if let Err(release_err) = keep_alive.release().await {
                warn!(resource = %resource, error = %release_err, "lock release failed");
            }
            return Err(err).with_context(|| format!("failed to spawn {program}"));
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        () = keep_alive.lost() => Outcome::Lost,
        _ = tokio::signal::ctrl_c() => Outcome::Interrupted,
    };

    let code = match outcome {
        Outcome::Exited(status) => {
            let status = status.context("failed to wait for command")?;
            info!(resource = %resource, %status, "command finished");
            status.code().unwrap_or(1)
        }
        Outcome::Lost => {
            warn!(resource = %resource, "lease lost, terminating command");
            terminate(&mut child).await;
            EXIT_LEASE_LOST
        }
        Outcome::Interrupted => {
            warn!(resource = %resource, "interrupted, terminating command");
            terminate(&mut child).await;
            EXIT_INTERRUPTED
        }
    };

    if let Err(err) = keep_alive.release().await {
        warn!(resource = %resource, error = %err, "lock release failed");
    }
    Ok(code)
}

async fn terminate(child: &mut tokio::process::Child) {
    if let Err(err) = child.kill().await {
        warn!(error = %err, "failed to kill command");
    }
}
