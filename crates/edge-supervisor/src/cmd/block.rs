use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{SupervisorError, SupervisorResult};
use crate::paths::HomePaths;
use crate::status::{StatusTracker, SupervisorMode};

/// Idle without ever launching the agent, for manual debugging of the container.
pub async fn run_block(home: &HomePaths) -> SupervisorResult<()> {
    tokio::fs::create_dir_all(home.root()).await?;
    let status = StatusTracker::new(home.status());

    let mut sigterm = signal(SignalKind::terminate()).map_err(SupervisorError::Signal)?;
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        info!("received SIGTERM, leaving block mode");
        trigger.cancel();
    });

    idle(&status, &token).await;
    Ok(())
}

pub async fn idle(status: &StatusTracker, token: &CancellationToken) {
    status.set_mode(SupervisorMode::Blocked).await;
    warn!("block mode: agent will not be started, waiting for manual intervention");
    token.cancelled().await;
    status.set_mode(SupervisorMode::Stopped).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn idle_reports_blocked_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let status = StatusTracker::new(path.clone());
        let token = CancellationToken::new();

        let idle_task = {
            let token = token.clone();
            tokio::spawn(async move { idle(&status, &token).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = crate::status::read(&path).await.unwrap();
        assert_eq!(snapshot.mode, SupervisorMode::Blocked);
        assert!(snapshot.agent_pid.is_none());
        assert_eq!(snapshot.invocations, 0);

        token.cancel();
        idle_task.await.unwrap();
        let snapshot = crate::status::read(&path).await.unwrap();
        assert_eq!(snapshot.mode, SupervisorMode::Stopped);
    }
}
