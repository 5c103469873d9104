//! SIGTERM delivered while `start` is still patching the agent config.
//!
//! Kept in its own test binary: the signal goes to the whole process and
//! would cancel any other supervisor running alongside it.

use std::process::Command;
use std::time::Duration;

use edge_supervisor::cmd::{self, StartContext};
use edge_supervisor::command::CommandSpec;
use edge_supervisor::env::Settings;
use edge_supervisor::patch::{self, PatchPlan};
use edge_supervisor::paths::HomePaths;
use edge_supervisor::shutdown::ShutdownPlan;
use edge_supervisor::supervisor::LoopExit;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

fn recorder(path: &std::path::Path, line: &str) -> CommandSpec {
    let script = format!("echo {line} >> \"$0\"");
    CommandSpec::new("sh", &["-c", &script, path.to_str().unwrap()])
}

fn count_lines(path: &std::path::Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn sigterm_during_config_patch_stops_before_first_launch() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("agent.json");
    // Reading a FIFO blocks until a writer opens it, which holds `start` inside the patch.
    let mkfifo = Command::new("mkfifo").arg(&config).status().unwrap();
    assert!(mkfifo.success());

    let settings = Settings::from_lookup(|_| None).unwrap();
    let home = HomePaths::from_root(dir.path().join("home/.edge-supervisor"));
    let marker = home.stopping_marker();
    let launches = dir.path().join("launches");
    let unregisters = dir.path().join("unregisters");
    let ctx = StartContext {
        patch: PatchPlan::with_roots(
            &settings,
            &config,
            &dir.path().join("var/lib/edge-agent"),
            &dir.path().join("private/var/lib/edge-agent"),
        ),
        settings,
        agent: recorder(&launches, "launch"),
        shutdown: ShutdownPlan {
            stopping_marker: marker.clone(),
            skip_unregister_marker: dir.path().join("skip-unregister"),
            unregister: recorder(&unregisters, "call"),
        },
        home,
        respawn_delay: Duration::from_millis(10),
    };

    let fifo = config.clone();
    let feeder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let me = Pid::from_raw(i32::try_from(std::process::id()).unwrap());
        kill(me, Signal::SIGTERM).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        tokio::task::spawn_blocking(move || std::fs::write(fifo, b"{\"api\": {}}\n"))
            .await
            .unwrap()
            .unwrap();
    });

    let report = tokio::time::timeout(Duration::from_secs(10), cmd::supervise(ctx))
        .await
        .unwrap()
        .unwrap();
    feeder.await.unwrap();

    assert_eq!(report.launches, 0);
    assert_eq!(report.exit, LoopExit::Interrupted);
    assert_eq!(count_lines(&launches), 0);
    assert_eq!(count_lines(&unregisters), 1);
    assert!(marker.exists());

    let raw = std::fs::read(&config).unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(doc["api"]["listen_address"], patch::LISTEN_ADDRESS);
}
