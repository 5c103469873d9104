//! SIGTERM handling: stop respawning, then optionally unregister the agent.
//!
//! The stop request lives in a [`CancellationToken`] shared with the
//! supervision loop, mirrored to an on-disk marker so other invocations
//! (and a replacement supervisor in the same container) can observe it.

use std::path::{Path, PathBuf};

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::CommandSpec;
use crate::error::{SupervisorError, SupervisorResult};
use crate::paths::container;

/// How a termination request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Planned in-place restart; the agent stays registered.
    SkippedUnregister,
    Unregistered,
    /// Unregistration was attempted and failed. Still a clean exit.
    UnregisterFailed,
}

#[derive(Debug, Clone)]
pub struct ShutdownPlan {
    pub stopping_marker: PathBuf,
    pub skip_unregister_marker: PathBuf,
    pub unregister: CommandSpec,
}

impl ShutdownPlan {
    pub fn new(stopping_marker: PathBuf, unregister: CommandSpec) -> Self {
        Self {
            stopping_marker,
            skip_unregister_marker: PathBuf::from(container::SKIP_UNREGISTER_MARKER),
            unregister,
        }
    }
}

/// Arm the SIGTERM listener. Registration happens before this returns, so a
/// signal delivered right after is not lost.
pub fn listen(
    plan: ShutdownPlan,
    token: CancellationToken,
) -> SupervisorResult<JoinHandle<ShutdownOutcome>> {
    let mut sigterm = signal(SignalKind::terminate()).map_err(SupervisorError::Signal)?;
    Ok(tokio::spawn(async move {
        sigterm.recv().await;
        info!("received SIGTERM, stopping");
        handle_termination(&plan, &token).await
    }))
}

/// Request a stop and run the unregister decision.
///
/// The token is cancelled before the marker is written, so the loop never
/// sees the marker without also seeing the cancellation.
pub async fn handle_termination(plan: &ShutdownPlan, token: &CancellationToken) -> ShutdownOutcome {
    token.cancel();
    if let Err(e) = write_marker(&plan.stopping_marker).await {
        warn!(
            error = %e,
            path = %plan.stopping_marker.display(),
            "failed to write stopping marker"
        );
    }

    if tokio::fs::try_exists(&plan.skip_unregister_marker)
        .await
        .unwrap_or(false)
    {
        info!(
            marker = %plan.skip_unregister_marker.display(),
            "skip-unregister marker present, leaving agent registered"
        );
        return ShutdownOutcome::SkippedUnregister;
    }

    info!(command = %plan.unregister.display(), "unregistering agent");
    match plan.unregister.exec().await {
        Ok(_) => {
            info!("agent unregistered");
            ShutdownOutcome::Unregistered
        }
        Err(e) => {
            warn!(error = %e, "unregister failed, exiting anyway");
            ShutdownOutcome::UnregisterFailed
        }
    }
}

/// Zero-byte marker; creating it again is harmless.
pub async fn write_marker(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .await?;
    Ok(())
}

pub async fn stop_requested(marker: &Path) -> bool {
    tokio::fs::try_exists(marker).await.unwrap_or(false)
}
