//! Signal forwarding end-to-end: a supervised child (and, in group-kill
//! mode, its forked grandchild) trap a signal and write sentinel files.
//!
//! These tests deliver real signals to the test process and rely on the
//! collector's relay to forward them. They live in their own test binary so
//! the process-wide signal traffic never overlaps the other suites, and the
//! two tests use different signals (USR1 vs USR2) with both trapped or
//! ignored in every scripted process, so they can run on parallel threads.

mod common;

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::sink_with_capture;
use mpld_server::{Collector, CollectorConfig};
use nix::sys::signal::{raise, Signal};
use tokio::signal::unix::{signal, SignalKind};

struct SignalFixture {
    _dir: tempfile::TempDir,
    parent_file: PathBuf,
    grandchild_file: PathBuf,
    script: String,
}

/// Builds a `sh` script whose parent traps `signame` and writes a sentinel
/// file, with a forked grandchild doing the same. Both ignore `other` so
/// stray deliveries of the sibling test's signal are harmless. Ready files
/// mark that the traps are installed; the bounded sleep loops keep `wait`
/// interruptible and guarantee every process dies on its own within a few
/// seconds even if no signal ever arrives.
fn fixture(signame: &str, other: &str, grandchild_rounds: u32) -> SignalFixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let parent_file = dir.path().join("parent-signal");
    let grandchild_file = dir.path().join("grandchild-signal");
    let script = format!(
        "trap 'echo {signame} > {parent}; exit 0' {signame}
trap '' {other}
(
  trap 'echo {signame} > {grandchild}; exit 0' {signame}
  trap '' {other}
  : > {ready_grandchild}
  n=0
  while [ $n -lt {grandchild_rounds} ]; do n=$((n+1)); sleep 0.2 & wait $!; done
) &
: > {ready_parent}
n=0
while [ $n -lt 40 ]; do n=$((n+1)); sleep 0.2 & wait $!; done",
        parent = parent_file.display(),
        grandchild = grandchild_file.display(),
        ready_parent = dir.path().join("ready-parent").display(),
        ready_grandchild = dir.path().join("ready-grandchild").display(),
    );
    SignalFixture {
        _dir: dir,
        parent_file,
        grandchild_file,
        script,
    }
}

async fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    path.exists()
}

/// Raises `sig` at the collector process until the child's trap has fired.
async fn raise_until(sig: Signal, written: &Path) {
    for _ in 0..200 {
        raise(sig).expect("raise signal");
        tokio::time::sleep(Duration::from_millis(25)).await;
        if written.exists() {
            return;
        }
    }
    panic!("child never reacted to {sig:?}");
}

#[tokio::test]
async fn test_kill_pgroup_forwards_to_child_and_grandchild() {
    // A handler must exist before the first raise; the relay installs its
    // own a moment later.
    let _usr1_guard = signal(SignalKind::user_defined1()).expect("install USR1 handler");

    let fx = fixture("USR1", "USR2", 40);
    let mut cfg = CollectorConfig::new(["sh", "-c", fx.script.as_str()]);
    cfg.kill_pgroup = true;
    let (sink, _capture) = sink_with_capture("none");
    let run = tokio::spawn(Collector::new(cfg, sink).run());

    let ready_parent = fx._dir.path().join("ready-parent");
    let ready_grandchild = fx._dir.path().join("ready-grandchild");
    assert!(wait_for_file(&ready_parent, Duration::from_secs(5)).await);
    assert!(wait_for_file(&ready_grandchild, Duration::from_secs(5)).await);

    raise_until(Signal::SIGUSR1, &fx.parent_file).await;

    let status = run.await.expect("join").expect("collector run");
    assert_eq!(status.code(), Some(0));
    assert!(fx.parent_file.exists(), "child's trap did not run");
    // The grandchild holds an inherited stream connection, so the run only
    // returns once it has exited; its trap ran before that.
    assert!(
        fx.grandchild_file.exists(),
        "group-kill mode should reach the grandchild too"
    );
}

#[tokio::test]
async fn test_default_mode_forwards_to_the_child_only() {
    let _usr2_guard = signal(SignalKind::user_defined2()).expect("install USR2 handler");

    // Short grandchild lifetime: it must exit on its own, unsignalled.
    let fx = fixture("USR2", "USR1", 10);
    let cfg = CollectorConfig::new(["sh", "-c", fx.script.as_str()]);
    let (sink, _capture) = sink_with_capture("none");
    let run = tokio::spawn(Collector::new(cfg, sink).run());

    let ready_parent = fx._dir.path().join("ready-parent");
    let ready_grandchild = fx._dir.path().join("ready-grandchild");
    assert!(wait_for_file(&ready_parent, Duration::from_secs(5)).await);
    assert!(wait_for_file(&ready_grandchild, Duration::from_secs(5)).await);

    raise_until(Signal::SIGUSR2, &fx.parent_file).await;

    let status = run.await.expect("join").expect("collector run");
    assert_eq!(status.code(), Some(0));
    assert!(fx.parent_file.exists(), "child's trap did not run");
    assert!(
        !fx.grandchild_file.exists(),
        "without --kill-pgroup the grandchild must not be signalled"
    );
}
