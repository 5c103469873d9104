//! Container entrypoint for the edge agent.
//!
//! `start` patches the agent config for the container, launches the agent and
//! respawns it whenever it exits. SIGTERM stops respawning and unregisters the
//! agent unless an orchestrator marked the shutdown as a planned restart.

use std::fmt;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use edge_supervisor::cmd;
use edge_supervisor::error::SupervisorResult;
use edge_supervisor::paths::HomePaths;
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "edge-supervisor", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Patch the agent config and keep the agent running
    Start {
        /// `block` idles without starting the agent
        mode: Option<StartMode>,
    },
    /// Terminate the running agent so the supervisor respawns it
    Restart,
    /// Print supervisor state; exits non-zero if the agent is not alive
    Status,
    /// Idle without starting the agent (same as `start block`)
    Block,
}

#[derive(Clone, Copy, ValueEnum)]
enum StartMode {
    Block,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help / --version print to stdout and succeed; usage errors exit 1
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Start { mode: None } => cmd::run_start().await.map(|()| ExitCode::SUCCESS),
        Command::Start {
            mode: Some(StartMode::Block),
        }
        | Command::Block => block().await.map(|()| ExitCode::SUCCESS),
        Command::Restart => restart().await.map(|()| ExitCode::SUCCESS),
        Command::Status => status().await.map(|alive| {
            if alive {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn block() -> SupervisorResult<()> {
    cmd::run_block(&HomePaths::new()?).await
}

async fn restart() -> SupervisorResult<()> {
    cmd::run_restart(&HomePaths::new()?).await
}

async fn status() -> SupervisorResult<bool> {
    cmd::run_status(&HomePaths::new()?).await
}
