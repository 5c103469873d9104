//! Container-specific patching of the agent's JSON config.
//!
//! The agent itself knows nothing about containers; the handful of values
//! that differ inside one are injected here before the first launch.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::info;

use crate::env::Settings;
use crate::paths::container;

pub const LISTEN_ADDRESS_KEY: &str = "api.listen_address";
pub const LISTEN_ADDRESS: &str = "0.0.0.0:8484";
pub const ALLOW_MULTIPLE_KEY: &str = "instances.allow_multiple";
pub const DOCKER_ENDPOINT_KEY: &str = "docker.endpoint";
pub const AUTH_DIR_KEY: &str = "sync.auth_dir";
pub const SOCKET_PATH_KEY: &str = "sync.socket_path";
pub const SECRETS_PATH_KEY: &str = "secrets.path";

const SOCKET_FILE: &str = "sync.sock";

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("config document is not a JSON object")]
    NotAnObject,

    #[error("set {key}: {reason}")]
    Mutation { key: String, reason: String },

    #[error("alias {link} -> {target}: {source}")]
    Alias {
        link: String,
        target: String,
        source: std::io::Error,
    },

    #[error("write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Symlink making `link` resolve to `target` (macOS hosts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAlias {
    pub link: PathBuf,
    pub target: PathBuf,
}

/// Everything [`patch`] needs, resolved up front from settings and paths.
#[derive(Debug, Clone)]
pub struct PatchPlan {
    pub config_path: PathBuf,
    pub docker_endpoint: Option<String>,
    pub instance_dir: PathBuf,
    pub alias: Option<PathAlias>,
}

impl PatchPlan {
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_roots(
            settings,
            Path::new(container::CONFIG_FILE),
            Path::new(container::DATA_ROOT),
            Path::new(container::MAC_DATA_ROOT),
        )
    }

    pub fn with_roots(
        settings: &Settings,
        config_path: &Path,
        data_root: &Path,
        mac_data_root: &Path,
    ) -> Self {
        let alias = settings.is_mac_host().then(|| PathAlias {
            link: data_root.to_path_buf(),
            target: mac_data_root.to_path_buf(),
        });
        Self {
            config_path: config_path.to_path_buf(),
            docker_endpoint: settings.docker_endpoint(),
            instance_dir: data_root.join(&settings.container_name),
            alias,
        }
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.config_path.clone().into_os_string();
        name.push(".orig");
        PathBuf::from(name)
    }
}

/// Keys written by a successful [`patch`], in application order.
#[derive(Debug, Default)]
pub struct PatchReport {
    pub applied: Vec<&'static str>,
}

impl PatchReport {
    pub fn contains(&self, key: &str) -> bool {
        self.applied.contains(&key)
    }
}

/// Patch the config document in place.
///
/// The original bytes are kept as `<config>.orig` the first time around; the
/// patched document replaces the config atomically.
pub async fn patch(plan: &PatchPlan) -> Result<PatchReport, PatchError> {
    let path = &plan.config_path;
    let raw = tokio::fs::read(path).await.map_err(|source| PatchError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut doc: Value = serde_json::from_slice(&raw).map_err(|source| PatchError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    if !doc.is_object() {
        return Err(PatchError::NotAnObject);
    }

    let mut report = PatchReport::default();
    let mut apply = |doc: &mut Value, key: &'static str, value: Value| {
        set_path(doc, key, value)?;
        info!(key, "config patched");
        report.applied.push(key);
        Ok::<(), PatchError>(())
    };

    apply(&mut doc, LISTEN_ADDRESS_KEY, Value::from(LISTEN_ADDRESS))?;
    apply(&mut doc, ALLOW_MULTIPLE_KEY, Value::Bool(true))?;
    if let Some(endpoint) = &plan.docker_endpoint {
        apply(&mut doc, DOCKER_ENDPOINT_KEY, Value::from(endpoint.as_str()))?;
    }

    if let Some(alias) = &plan.alias {
        ensure_alias(alias).await?;
    }

    let base = &plan.instance_dir;
    if is_dir(&base.join("auth")).await {
        apply(&mut doc, AUTH_DIR_KEY, path_value(&base.join("auth")))?;
    }
    if is_dir(&base.join("sock")).await {
        apply(
            &mut doc,
            SOCKET_PATH_KEY,
            path_value(&base.join("sock").join(SOCKET_FILE)),
        )?;
    }
    if is_dir(&base.join("secrets")).await {
        apply(&mut doc, SECRETS_PATH_KEY, path_value(&base.join("secrets")))?;
    }

    write_backup(plan, &raw).await?;
    write_atomic(path, &doc).await?;
    Ok(report)
}

/// Set a dotted key path, creating intermediate objects as needed.
pub fn set_path(doc: &mut Value, key: &str, value: Value) -> Result<(), PatchError> {
    let mutation_err = |reason: String| PatchError::Mutation {
        key: key.to_string(),
        reason,
    };

    let mut segments = key.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        if segment.is_empty() {
            return Err(mutation_err("empty path segment".into()));
        }
        let Some(object) = current.as_object_mut() else {
            return Err(mutation_err(format!("parent of {segment:?} is not an object")));
        };
        if segments.peek().is_none() {
            object.insert(segment.to_string(), value);
            return Ok(());
        }
        current = object
            .entry(segment)
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Err(mutation_err("empty key".into()))
}

fn path_value(path: &Path) -> Value {
    Value::from(path.display().to_string())
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_dir())
}

async fn ensure_alias(alias: &PathAlias) -> Result<(), PatchError> {
    let alias_err = |source| PatchError::Alias {
        link: alias.link.display().to_string(),
        target: alias.target.display().to_string(),
        source,
    };

    // Anything already at the link path (directory, mount, earlier symlink) is kept.
    if tokio::fs::symlink_metadata(&alias.link).await.is_ok() {
        return Ok(());
    }
    if let Some(parent) = alias.link.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(alias_err)?;
    }
    tokio::fs::symlink(&alias.target, &alias.link)
        .await
        .map_err(alias_err)?;
    info!(link = %alias.link.display(), target = %alias.target.display(), "data root aliased");
    Ok(())
}

async fn write_backup(plan: &PatchPlan, raw: &[u8]) -> Result<(), PatchError> {
    let backup = plan.backup_path();
    if tokio::fs::try_exists(&backup).await.unwrap_or(false) {
        return Ok(());
    }
    tokio::fs::write(&backup, raw)
        .await
        .map_err(|source| PatchError::Write {
            path: backup.display().to_string(),
            source,
        })
}

/// Atomic write: write to a temp file in the same directory, then rename.
async fn write_atomic(path: &Path, doc: &Value) -> Result<(), PatchError> {
    let write_err = |source| PatchError::Write {
        path: path.display().to_string(),
        source,
    };

    let mut json = serde_json::to_vec_pretty(doc)
        .map_err(|e| write_err(std::io::Error::other(e)))?;
    json.push(b'\n');

    let mut tmp = path.to_path_buf().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = async {
        tokio::fs::write(&tmp, &json).await?;
        // The replacement keeps the original file's mode rather than the umask default.
        if let Ok(meta) = tokio::fs::metadata(path).await {
            tokio::fs::set_permissions(&tmp, meta.permissions()).await?;
        }
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result.map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut doc = json!({});
        set_path(&mut doc, "a.b.c", json!(1)).unwrap();
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_path_overwrites_leaf_and_keeps_siblings() {
        let mut doc = json!({"api": {"listen_address": "127.0.0.1:1", "tls": true}});
        set_path(&mut doc, LISTEN_ADDRESS_KEY, json!(LISTEN_ADDRESS)).unwrap();
        assert_eq!(doc["api"]["listen_address"], LISTEN_ADDRESS);
        assert_eq!(doc["api"]["tls"], true);
    }

    #[test]
    fn set_path_rejects_non_object_parent() {
        let mut doc = json!({"api": 5});
        let err = set_path(&mut doc, LISTEN_ADDRESS_KEY, json!("x")).unwrap_err();
        assert!(matches!(err, PatchError::Mutation { .. }), "got: {err}");
        assert_eq!(doc, json!({"api": 5}));
    }

    #[test]
    fn set_path_rejects_empty_segment() {
        let mut doc = json!({});
        assert!(set_path(&mut doc, "a..b", json!(1)).is_err());
    }

    #[test]
    fn backup_path_appends_orig() {
        let plan = PatchPlan {
            config_path: PathBuf::from("/etc/edge-agent/agent.json"),
            docker_endpoint: None,
            instance_dir: PathBuf::from("/var/lib/edge-agent/edge-agent"),
            alias: None,
        };
        assert_eq!(
            plan.backup_path(),
            PathBuf::from("/etc/edge-agent/agent.json.orig")
        );
    }

    #[tokio::test]
    async fn alias_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("private/var/lib/edge-agent");
        tokio::fs::create_dir_all(&target).await.unwrap();
        let alias = PathAlias {
            link: dir.path().join("var/lib/edge-agent"),
            target: target.clone(),
        };

        ensure_alias(&alias).await.unwrap();
        ensure_alias(&alias).await.unwrap();

        let resolved = tokio::fs::read_link(&alias.link).await.unwrap();
        assert_eq!(resolved, target);
    }
}
