use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::info;

use super::is_alive;
use crate::error::{SupervisorError, SupervisorResult};
use crate::paths::HomePaths;
use crate::status::{self, SupervisorMode, SupervisorStatus};

/// Terminate the running agent; the supervisor's loop starts a fresh one.
pub async fn run_restart(home: &HomePaths) -> SupervisorResult<()> {
    let snapshot = status::read(&home.status()).await?;
    let pid = running_agent_pid(&snapshot)?;
    signal_agent(pid)?;
    info!(pid, "sent SIGTERM to agent, supervisor will respawn it");
    Ok(())
}

/// The agent pid to signal. A status file left behind by a supervisor that is
/// gone says nothing about who owns that pid now.
pub fn running_agent_pid(snapshot: &SupervisorStatus) -> SupervisorResult<u32> {
    if !is_alive(snapshot.supervisor_pid) {
        return Err(SupervisorError::NotRunning(format!(
            "supervisor {} is not running; status file is stale",
            snapshot.supervisor_pid
        )));
    }
    match (snapshot.mode, snapshot.agent_pid) {
        (SupervisorMode::Running, Some(pid)) => Ok(pid),
        (mode, _) => Err(SupervisorError::NotRunning(format!(
            "supervisor {} reports mode {mode:?} with no live agent",
            snapshot.supervisor_pid
        ))),
    }
}

fn signal_agent(pid: u32) -> SupervisorResult<()> {
    let raw = i32::try_from(pid)
        .map_err(|_| SupervisorError::NotRunning(format!("invalid agent pid {pid}")))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .map_err(|e| SupervisorError::NotRunning(format!("signal agent pid {pid}: {e}")))
}
