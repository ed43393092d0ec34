//! Graceful-then-forceful termination of a supervised child.
//!
//! On Unix the child leads its own process group, so signals are delivered
//! with `killpg` and reach anything the agent spawned. Elsewhere the direct
//! child is killed outright.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tracing::{info, warn};

/// Ask the child to exit, escalate to a hard kill after `grace`.
///
/// Returns the exit status when one could be collected.
pub async fn terminate_gracefully(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return child.wait().await.ok();
    };

    request_exit(child, pid);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(pid, ?status, "process exited after termination request");
            return Some(status);
        }
        Ok(Err(err)) => warn!(pid, %err, "wait failed after termination request"),
        Err(_) => warn!(
            pid,
            grace_secs = grace.as_secs(),
            "process ignored termination request, killing"
        ),
    }

    force_kill(child, pid);
    match child.wait().await {
        Ok(status) => Some(status),
        Err(err) => {
            warn!(pid, %err, "wait failed after kill");
            None
        }
    }
}

#[cfg(unix)]
fn request_exit(_child: &mut Child, pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child, pid: u32) {
    if let Err(err) = child.start_kill() {
        warn!(pid, %err, "failed to kill process");
    }
}

#[cfg(unix)]
fn force_kill(child: &mut Child, pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    if let Err(err) = child.start_kill() {
        warn!(pid, %err, "failed to kill process");
    }
}

#[cfg(not(unix))]
fn force_kill(child: &mut Child, pid: u32) {
    if let Err(err) = child.start_kill() {
        warn!(pid, %err, "failed to kill process");
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range for signal delivery");
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(pid, %err, ?signal, "failed to signal process group"),
    }
}
