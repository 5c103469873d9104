use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::trace;

use crate::paths::container;

/// Error from a failed command.
#[derive(Debug, thiserror::Error)]
#[error("command failed: {command}\n{detail}")]
pub struct CommandError {
    pub command: String,
    pub detail: String,
}

/// A program invocation with a fixed argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra variables layered on top of the inherited environment.
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            envs: Vec::new(),
        }
    }

    /// `edge-agent --v=<level> --logtostderr --config=<path>`
    pub fn agent(log_level: &str, config_path: &Path) -> Self {
        Self {
            program: PathBuf::from(container::AGENT_BIN),
            args: vec![
                format!("--v={log_level}"),
                "--logtostderr".to_string(),
                format!("--config={}", config_path.display()),
            ],
            envs: Vec::new(),
        }
    }

    /// `edge-ctl unregister --force`
    pub fn unregister() -> Self {
        Self::new(container::UNREGISTER_BIN, &["unregister", "--force"])
    }

    pub fn with_envs<I>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.envs.extend(envs);
        self
    }

    /// Human-readable display string.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.display().to_string());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd
    }

    /// Start as a background child sharing the supervisor's stdout/stderr.
    pub fn spawn(&self) -> std::io::Result<Child> {
        trace!(command = %self.display(), "spawn");
        self.command()
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
    }

    /// Run to completion. Returns trimmed stdout on success.
    pub async fn exec(&self) -> Result<String, CommandError> {
        let cmd_display = self.display();
        trace!(command = %cmd_display, "exec");

        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CommandError {
                command: cmd_display.clone(),
                detail: e.to_string(),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(CommandError {
                command: cmd_display,
                detail: format!("{} {stderr}", output.status).trim_end().to_string(),
            })
        }
    }
}
