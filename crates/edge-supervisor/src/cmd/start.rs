use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::CommandSpec;
use crate::env::{self, Settings};
use crate::error::SupervisorResult;
use crate::patch::{self, PatchPlan};
use crate::paths::{HomePaths, container};
use crate::shutdown::{self, ShutdownOutcome, ShutdownPlan};
use crate::status::{StatusTracker, SupervisorMode};
use crate::supervisor::{LoopReport, RESPAWN_DELAY, Supervisor, SupervisorConfig};

/// Everything `start` needs, resolved before any side effect.
pub struct StartContext {
    pub settings: Settings,
    pub home: HomePaths,
    pub patch: PatchPlan,
    pub agent: CommandSpec,
    pub shutdown: ShutdownPlan,
    pub respawn_delay: Duration,
}

impl StartContext {
    /// Resolve from the process environment and the optional env file.
    pub async fn from_environment(home: HomePaths) -> SupervisorResult<Self> {
        let exported = env::load_env_file(Path::new(container::ENV_FILE))?;
        if !exported.is_empty() {
            info!(path = container::ENV_FILE, vars = exported.len(), "env file loaded");
        }
        let settings = Settings::from_env(&exported)?;

        let patch = PatchPlan::from_settings(&settings);
        let agent = CommandSpec::agent(&settings.log_level, &patch.config_path)
            .with_envs(exported.clone());
        let unregister = CommandSpec::unregister().with_envs(exported);

        Ok(Self {
            shutdown: ShutdownPlan::new(home.stopping_marker(), unregister),
            settings,
            home,
            patch,
            agent,
            respawn_delay: RESPAWN_DELAY,
        })
    }
}

/// Load settings and supervise the agent until stopped.
pub async fn run_start() -> SupervisorResult<()> {
    let ctx = StartContext::from_environment(HomePaths::new()?).await?;
    supervise(ctx).await.map(|_| ())
}

/// Patch config, arm SIGTERM handling and run the respawn loop.
pub async fn supervise(ctx: StartContext) -> SupervisorResult<LoopReport> {
    tokio::fs::create_dir_all(ctx.home.root()).await?;

    // A marker left by a previous container lifetime must not block this one.
    let marker = ctx.home.stopping_marker();
    if shutdown::stop_requested(&marker).await {
        info!(path = %marker.display(), "removing stale stopping marker");
        tokio::fs::remove_file(&marker).await?;
    }

    // Armed before patching so a SIGTERM during setup still takes the handler path.
    let token = CancellationToken::new();
    let listener = shutdown::listen(ctx.shutdown, token.clone())?;

    if ctx.settings.keep_config {
        info!(path = %ctx.patch.config_path.display(), "keeping existing agent config");
    } else {
        match patch::patch(&ctx.patch).await {
            Ok(report) => info!(keys = report.applied.len(), "agent config patched"),
            Err(e) => {
                settle(listener, &token).await;
                return Err(e.into());
            }
        }
    }

    let status = Arc::new(StatusTracker::new(ctx.home.status()));
    status.write_initial().await;

    info!(
        max_invocations = ctx.settings.max_invocations,
        "supervisor started"
    );
    let supervisor = Supervisor::new(SupervisorConfig {
        agent: ctx.agent,
        max_invocations: ctx.settings.max_invocations,
        respawn_delay: ctx.respawn_delay,
        stopping_marker: marker,
        status: Arc::clone(&status),
        shutdown: token.clone(),
    });
    let report = supervisor.run().await;

    if token.is_cancelled() {
        status.set_mode(SupervisorMode::Stopping).await;
    }
    settle(listener, &token).await;

    status.set_mode(SupervisorMode::Stopped).await;
    info!(launches = report.launches, exit = ?report.exit, "supervisor stopped");
    Ok(report)
}

/// Once the token fired, the listener owns the exit: let unregistration finish.
async fn settle(listener: JoinHandle<ShutdownOutcome>, token: &CancellationToken) {
    if token.is_cancelled() {
        match listener.await {
            Ok(outcome) => info!(?outcome, "shutdown handled"),
            Err(e) => warn!(error = %e, "shutdown task failed"),
        }
    } else {
        listener.abort();
    }
}
