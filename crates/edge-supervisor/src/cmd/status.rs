use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Serialize;

use crate::error::{SupervisorError, SupervisorResult};
use crate::paths::HomePaths;
use crate::status::{self, SupervisorStatus};

#[derive(Debug, Serialize)]
struct StatusReport {
    #[serde(flatten)]
    status: SupervisorStatus,
    agent_alive: bool,
}

/// Print the supervisor snapshot. Returns whether the agent process is alive.
pub async fn run_status(home: &HomePaths) -> SupervisorResult<bool> {
    let snapshot = status::read(&home.status()).await?;
    let alive = snapshot.agent_pid.is_some_and(is_alive);
    let report = StatusReport {
        status: snapshot,
        agent_alive: alive,
    };
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| SupervisorError::Status(format!("serialize status: {e}")))?;
    println!("{json}");
    Ok(alive)
}

/// Signal-0 probe; EPERM still means the process exists.
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    matches!(kill(Pid::from_raw(raw), None::<Signal>), Ok(()) | Err(Errno::EPERM))
}
