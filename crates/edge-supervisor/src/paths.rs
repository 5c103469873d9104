use std::path::{Path, PathBuf};

use crate::error::{SupervisorError, SupervisorResult};

/// Container paths (must match the image layout).
pub mod container {
    pub const CONFIG_FILE: &str = "/etc/edge-agent/agent.json";
    pub const ENV_FILE: &str = "/etc/edge-agent/supervisor.env";
    pub const AGENT_BIN: &str = "/usr/local/bin/edge-agent";
    pub const UNREGISTER_BIN: &str = "/usr/local/bin/edge-ctl";
    pub const SKIP_UNREGISTER_MARKER: &str = "/var/run/edge-agent/skip-unregister";
    pub const DATA_ROOT: &str = "/var/lib/edge-agent";
    /// Where Docker Desktop on macOS exposes `DATA_ROOT` inside the container.
    pub const MAC_DATA_ROOT: &str = "/private/var/lib/edge-agent";
}

const STATE_DIR: &str = ".edge-supervisor";

/// Per-user supervisor state, rooted at `~/.edge-supervisor`.
#[derive(Debug, Clone)]
pub struct HomePaths {
    root: PathBuf,
}

impl HomePaths {
    /// Resolve from `HOME`, falling back to the passwd entry of the current uid.
    pub fn new() -> SupervisorResult<Self> {
        let home = match std::env::var_os("HOME").filter(|h| !h.is_empty()) {
            Some(home) => PathBuf::from(home),
            None => passwd_home()?,
        };
        Ok(Self::from_root(home.join(STATE_DIR)))
    }

    pub fn from_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stopping_marker(&self) -> PathBuf {
        self.root.join("stopping")
    }

    pub fn status(&self) -> PathBuf {
        self.root.join("status.json")
    }
}

fn passwd_home() -> SupervisorResult<PathBuf> {
    let uid = nix::unistd::getuid();
    let user = nix::unistd::User::from_uid(uid)
        .map_err(|e| SupervisorError::Config(format!("lookup uid {uid}: {e}")))?
        .ok_or_else(|| SupervisorError::Config(format!("no home directory for uid {uid}")))?;
    Ok(user.dir)
}
