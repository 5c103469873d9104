//! Launch / wait / respawn loop for the agent process.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::command::CommandSpec;
use crate::shutdown;
use crate::status::{StatusTracker, SupervisorMode};

/// Pause between an agent exit and the next launch.
pub const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The shutdown token fired while waiting or pausing.
    Interrupted,
    /// A stop was requested before the last exit was handled.
    StopRequested,
    /// The invocation ceiling was reached.
    LimitReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub launches: u32,
    pub exit: LoopExit,
}

pub struct SupervisorConfig {
    pub agent: CommandSpec,
    pub max_invocations: Option<u32>,
    pub respawn_delay: Duration,
    pub stopping_marker: PathBuf,
    pub status: Arc<StatusTracker>,
    pub shutdown: CancellationToken,
}

pub struct Supervisor {
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    /// Run until a stop is requested or the invocation ceiling is reached.
    ///
    /// Agent failures (crashes, spawn errors) are logged and never end the loop.
    pub async fn run(&self) -> LoopReport {
        let config = &self.config;
        let mut interruptions = Interruptions::register();
        let mut launches: u32 = 0;

        loop {
            if config.shutdown.is_cancelled() {
                return LoopReport {
                    launches,
                    exit: LoopExit::Interrupted,
                };
            }

            launches += 1;
            let exit = match config.agent.spawn() {
                Ok(child) => {
                    let pid = child.id();
                    info!(
                        pid,
                        invocation = launches,
                        command = %config.agent.display(),
                        "agent started"
                    );
                    config.status.agent_started(pid, launches).await;
                    match wait_for_exit(child, &config.shutdown, &mut interruptions).await {
                        Some(exit) => exit,
                        None => {
                            info!("stop requested while agent running");
                            return LoopReport {
                                launches,
                                exit: LoopExit::Interrupted,
                            };
                        }
                    }
                }
                Err(e) => {
                    error!(
                        error = %e,
                        invocation = launches,
                        command = %config.agent.display(),
                        "agent failed to start"
                    );
                    AgentExit::SpawnFailed
                }
            };

            let code = exit.log();
            config.status.agent_exited(code).await;

            if config.shutdown.is_cancelled()
                || shutdown::stop_requested(&config.stopping_marker).await
            {
                info!(launches, "stop requested, not respawning");
                return LoopReport {
                    launches,
                    exit: LoopExit::StopRequested,
                };
            }

            if let Some(max) = config.max_invocations
                && launches >= max
            {
                info!(launches, max, "invocation limit reached, not respawning");
                return LoopReport {
                    launches,
                    exit: LoopExit::LimitReached,
                };
            }

            config.status.set_mode(SupervisorMode::Respawning).await;
            info!(
                delay_ms = config.respawn_delay.as_millis() as u64,
                "respawning agent"
            );
            tokio::select! {
                () = tokio::time::sleep(config.respawn_delay) => {}
                () = config.shutdown.cancelled() => {}
            }
        }
    }
}

enum AgentExit {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    SpawnFailed,
}

impl AgentExit {
    /// Log the exit and return its code, if any.
    fn log(&self) -> Option<i32> {
        match self {
            Self::Exited(status) => {
                let code = status.code();
                if status.success() {
                    info!(status = %status, "agent exited");
                } else {
                    warn!(status = %status, "agent exited");
                }
                code
            }
            Self::WaitFailed(e) => {
                error!(error = %e, "failed to wait for agent");
                None
            }
            Self::SpawnFailed => None,
        }
    }
}

/// Block until the child exits. `None` means the shutdown token fired first.
///
/// Unrelated signals only interrupt the wait; it resumes on the same child
/// for as long as it takes.
async fn wait_for_exit(
    mut child: Child,
    shutdown: &CancellationToken,
    interruptions: &mut Interruptions,
) -> Option<AgentExit> {
    loop {
        tokio::select! {
            result = child.wait() => {
                return Some(match result {
                    Ok(status) => AgentExit::Exited(status),
                    Err(e) => AgentExit::WaitFailed(e),
                });
            }
            () = shutdown.cancelled() => return None,
            name = interruptions.next() => {
                info!(signal = name, "wait interrupted, still waiting on agent");
            }
        }
    }
}

/// Signals that may interrupt a wait without meaning "shut down".
struct Interruptions {
    hangup: Option<Signal>,
    interrupt: Option<Signal>,
    user1: Option<Signal>,
}

impl Interruptions {
    fn register() -> Self {
        Self {
            hangup: signal(SignalKind::hangup()).ok(),
            interrupt: signal(SignalKind::interrupt()).ok(),
            user1: signal(SignalKind::user_defined1()).ok(),
        }
    }

    async fn next(&mut self) -> &'static str {
        tokio::select! {
            () = recv_signal(&mut self.hangup) => "SIGHUP",
            () = recv_signal(&mut self.interrupt) => "SIGINT",
            () = recv_signal(&mut self.user1) => "SIGUSR1",
        }
    }
}

/// Await a signal if registered, or pend forever if registration failed.
async fn recv_signal(sig: &mut Option<Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: Duration = Duration::from_millis(10);

    fn config(dir: &std::path::Path, agent: CommandSpec, max: Option<u32>) -> SupervisorConfig {
        SupervisorConfig {
            agent,
            max_invocations: max,
            respawn_delay: FAST,
            stopping_marker: dir.join("stopping"),
            status: Arc::new(StatusTracker::new(dir.join("status.json"))),
            shutdown: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn ceiling_limits_launches_regardless_of_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let agent = CommandSpec::new("sh", &["-c", "exit 7"]);
        let supervisor = Supervisor::new(config(dir.path(), agent, Some(3)));

        let report = supervisor.run().await;

        assert_eq!(
            report,
            LoopReport {
                launches: 3,
                exit: LoopExit::LimitReached
            }
        );
    }

    #[tokio::test]
    async fn marker_written_by_agent_stops_respawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("stopping");
        let agent = CommandSpec::new("sh", &["-c", "touch \"$0\"", marker.to_str().unwrap()]);
        let supervisor = Supervisor::new(config(dir.path(), agent, None));

        let report = supervisor.run().await;

        assert_eq!(report.launches, 1);
        assert_eq!(report.exit, LoopExit::StopRequested);
    }

    #[tokio::test]
    async fn spawn_failures_count_as_launches() {
        let dir = tempfile::tempdir().unwrap();
        let agent = CommandSpec::new("/nonexistent/edge-agent", &[]);
        let supervisor = Supervisor::new(config(dir.path(), agent, Some(2)));

        let report = supervisor.run().await;

        assert_eq!(report.launches, 2);
        assert_eq!(report.exit, LoopExit::LimitReached);
    }

    #[tokio::test]
    async fn cancellation_interrupts_running_agent() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), CommandSpec::new("sleep", &["5"]), None);
        let token = cfg.shutdown.clone();
        let supervisor = Supervisor::new(cfg);

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
        let report = tokio::time::timeout(Duration::from_secs(5), supervisor.run())
            .await
            .unwrap();
        cancel.await.unwrap();

        assert_eq!(report.launches, 1);
        assert_eq!(report.exit, LoopExit::Interrupted);
    }

    #[tokio::test]
    async fn unrelated_signals_keep_waiting_on_same_agent() {
        use nix::sys::signal::{Signal as NixSignal, kill};
        use nix::unistd::Pid;

        let dir = tempfile::tempdir().unwrap();
        let agent = CommandSpec::new("sh", &["-c", "sleep 1; exit 9"]);
        let supervisor = Supervisor::new(config(dir.path(), agent, Some(1)));

        // run() registers its handlers on first poll, before the first SIGHUP goes out.
        let hangups = tokio::spawn(async {
            let me = Pid::from_raw(i32::try_from(std::process::id()).unwrap());
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(200)).await;
                kill(me, NixSignal::SIGHUP).unwrap();
            }
        });
        let report = tokio::time::timeout(Duration::from_secs(10), supervisor.run())
            .await
            .unwrap();
        hangups.await.unwrap();

        assert_eq!(
            report,
            LoopReport {
                launches: 1,
                exit: LoopExit::LimitReached
            }
        );
        let status = crate::status::read(&dir.path().join("status.json"))
            .await
            .unwrap();
        assert_eq!(status.last_exit_code, Some(9));
    }

    #[tokio::test]
    async fn status_tracks_last_exit() {
        let dir = tempfile::tempdir().unwrap();
        let agent = CommandSpec::new("sh", &["-c", "exit 4"]);
        let supervisor = Supervisor::new(config(dir.path(), agent, Some(1)));

        supervisor.run().await;

        let status = crate::status::read(&dir.path().join("status.json"))
            .await
            .unwrap();
        assert_eq!(status.invocations, 1);
        assert_eq!(status.last_exit_code, Some(4));
        assert!(status.agent_pid.is_none());
    }
}
