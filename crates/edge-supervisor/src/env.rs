//! Environment-driven settings.
//!
//! Everything the supervisor reads from its environment is parsed once into
//! [`Settings`]. Values from the optional env file take precedence over the
//! process environment and are also exported to the processes it launches.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{SupervisorError, SupervisorResult};

pub const LOG_LEVEL: &str = "EDGE_AGENT_LOG_LEVEL";
pub const DOCKER_ENDPOINT: &str = "EDGE_DOCKER_ENDPOINT";
pub const MAC_HOST: &str = "EDGE_MAC_HOST";
pub const CONTAINER_NAME: &str = "EDGE_CONTAINER_NAME";
pub const HOST_OS: &str = "EDGE_HOST_OS";
pub const KEEP_CONFIG: &str = "EDGE_KEEP_CONFIG";
pub const MAX_INVOCATIONS: &str = "EDGE_MAX_INVOCATIONS";

pub(crate) const DEFAULT_LOG_LEVEL: &str = "2";
pub(crate) const DEFAULT_CONTAINER_NAME: &str = "edge-agent";
/// Docker daemon port on the legacy mac host.
const MAC_DOCKER_PORT: u16 = 2375;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub log_level: String,
    pub docker_endpoint: Option<String>,
    pub mac_host: Option<String>,
    pub container_name: String,
    pub host_os: Option<String>,
    pub keep_config: bool,
    pub max_invocations: Option<u32>,
}

impl Settings {
    /// Build settings from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> SupervisorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_invocations = match get(MAX_INVOCATIONS) {
            None => None,
            Some(raw) => {
                let n: u32 = raw.trim().parse().map_err(|_| {
                    SupervisorError::Config(format!("{MAX_INVOCATIONS} must be a number, got {raw:?}"))
                })?;
                // 0 means no ceiling
                (n > 0).then_some(n)
            }
        };

        Ok(Self {
            log_level: get(LOG_LEVEL).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            docker_endpoint: get(DOCKER_ENDPOINT),
            mac_host: get(MAC_HOST),
            container_name: get(CONTAINER_NAME)
                .unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string()),
            host_os: get(HOST_OS),
            keep_config: get(KEEP_CONFIG).is_some_and(|v| is_truthy(&v)),
            max_invocations,
        })
    }

    /// Settings from the process environment overlaid with `overrides`.
    pub fn from_env(overrides: &HashMap<String, String>) -> SupervisorResult<Self> {
        Self::from_lookup(|key| {
            overrides
                .get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
        })
    }

    /// Explicit override wins; otherwise derive one from the legacy mac host.
    pub fn docker_endpoint(&self) -> Option<String> {
        self.docker_endpoint.clone().or_else(|| {
            self.mac_host
                .as_ref()
                .map(|host| format!("tcp://{host}:{MAC_DOCKER_PORT}"))
        })
    }

    pub fn is_mac_host(&self) -> bool {
        self.host_os.as_deref().is_some_and(|os| {
            ["mac", "macos", "darwin"]
                .iter()
                .any(|name| os.trim().eq_ignore_ascii_case(name))
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Load `KEY=VALUE` pairs from an env file with shell-style quoting and
/// comments. A missing file yields no variables.
pub fn load_env_file(path: &Path) -> SupervisorResult<HashMap<String, String>> {
    let env_file_err = |e: dotenvy::Error| SupervisorError::EnvFile {
        path: path.display().to_string(),
        detail: e.to_string(),
    };
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) if e.not_found() => return Ok(HashMap::new()),
        Err(e) => return Err(env_file_err(e)),
    };
    iter.collect::<Result<HashMap<_, _>, _>>().map_err(env_file_err)
}
