use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{SupervisorError, SupervisorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorMode {
    Starting,
    Running,
    Respawning,
    Stopping,
    Stopped,
    Blocked,
}

/// On-disk snapshot read by `status` and `restart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub mode: SupervisorMode,
    pub supervisor_pid: u32,
    pub agent_pid: Option<u32>,
    pub invocations: u32,
    pub last_exit_code: Option<i32>,
    #[serde(serialize_with = "serialize_iso")]
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_iso")]
    pub updated_at: DateTime<Utc>,
}

/// Serialize as ISO 8601 with millisecond precision.
fn serialize_iso<S: serde::Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

/// Status tracker that persists supervisor state to a JSON file atomically.
///
/// Write failures are logged and never interrupt supervision.
pub struct StatusTracker {
    started_at: DateTime<Utc>,
    path: PathBuf,
    state: Mutex<MutableState>,
}

struct MutableState {
    mode: SupervisorMode,
    agent_pid: Option<u32>,
    invocations: u32,
    last_exit_code: Option<i32>,
}

impl StatusTracker {
    pub fn new(path: PathBuf) -> Self {
        Self {
            started_at: Utc::now(),
            path,
            state: Mutex::new(MutableState {
                mode: SupervisorMode::Starting,
                agent_pid: None,
                invocations: 0,
                last_exit_code: None,
            }),
        }
    }

    /// Write the initial status file.
    pub async fn write_initial(&self) {
        let state = self.state.lock().await;
        self.write_status(&state).await;
    }

    pub async fn set_mode(&self, mode: SupervisorMode) {
        let mut state = self.state.lock().await;
        state.mode = mode;
        self.write_status(&state).await;
    }

    pub async fn agent_started(&self, pid: Option<u32>, invocations: u32) {
        let mut state = self.state.lock().await;
        state.mode = SupervisorMode::Running;
        state.agent_pid = pid;
        state.invocations = invocations;
        self.write_status(&state).await;
    }

    pub async fn agent_exited(&self, code: Option<i32>) {
        let mut state = self.state.lock().await;
        state.agent_pid = None;
        state.last_exit_code = code;
        self.write_status(&state).await;
    }

    /// Atomic write: write to a temp file in the same directory, then rename.
    async fn write_status(&self, state: &MutableState) {
        let status = SupervisorStatus {
            mode: state.mode,
            supervisor_pid: std::process::id(),
            agent_pid: state.agent_pid,
            invocations: state.invocations,
            last_exit_code: state.last_exit_code,
            started_at: self.started_at,
            updated_at: Utc::now(),
        };

        let json = match serde_json::to_string_pretty(&status) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize status");
                return;
            }
        };

        let tmp = self.path.with_extension("tmp");
        if let Err(e) = tokio::fs::write(&tmp, json.as_bytes()).await {
            warn!(error = %e, path = %tmp.display(), "failed to write status temp file");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!(error = %e, "failed to rename status file");
        }
    }
}

/// Read the snapshot written by a running supervisor.
pub async fn read(path: &Path) -> SupervisorResult<SupervisorStatus> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SupervisorError::Status(format!(
                "no status file at {}; is the supervisor running?",
                path.display()
            ))
        } else {
            SupervisorError::Status(format!("read {}: {e}", path.display()))
        }
    })?;
    serde_json::from_str(&content)
        .map_err(|e| SupervisorError::Status(format!("parse {}: {e}", path.display())))
}
