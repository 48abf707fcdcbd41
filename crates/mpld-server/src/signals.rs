//! Signal relay: OS signal → channel → forward to the child.
//!
//! Handlers go through tokio's signal driver (the platform's self-pipe
//! equivalent); the channel consumer does the forwarding cooperatively, so
//! nothing non-trivial runs in handler context.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Signals relayed to the child. SIGCHLD stays with the supervisor and
/// untrappable signals are skipped at installation.
const FORWARDED_SIGNALS: &[i32] = &[
    libc::SIGHUP,
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTERM,
    libc::SIGUSR1,
    libc::SIGUSR2,
    libc::SIGWINCH,
    libc::SIGCONT,
];

pub(crate) struct SignalRelay {
    tasks: Vec<JoinHandle<()>>,
}

impl SignalRelay {
    /// Installs handlers and starts forwarding to `child_pid` (or the
    /// child's process group when `kill_pgroup` is set).
    pub(crate) fn start(child_pid: u32, kill_pgroup: bool) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<i32>();
        let mut tasks = Vec::new();

        for &signo in FORWARDED_SIGNALS {
            match signal(SignalKind::from_raw(signo)) {
                Ok(mut sig) => {
                    let tx = tx.clone();
                    tasks.push(tokio::spawn(async move {
                        while sig.recv().await.is_some() {
                            if tx.send(signo).is_err() {
                                break;
                            }
                        }
                    }));
                }
                Err(e) => {
                    debug!(signal = signo, error = %e, "signal handler not installed");
                }
            }
        }
        drop(tx);

        let target = forward_target(child_pid, kill_pgroup);
        tasks.push(tokio::spawn(async move {
            while let Some(signo) = rx.recv().await {
                let Ok(sig) = Signal::try_from(signo) else {
                    continue;
                };
                match kill(target, sig) {
                    Ok(()) => debug!(signal = signo, dest = %target, "signal forwarded"),
                    Err(e) => {
                        debug!(signal = signo, dest = %target, error = %e, "signal forward failed")
                    }
                }
            }
        }));

        Self { tasks }
    }

    /// Stops relaying. Installed process dispositions stay in place; they
    /// simply stop being forwarded.
    pub(crate) fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Where a forwarded signal goes: the child itself, or its whole process
/// group when group-kill mode is on.
fn forward_target(child_pid: u32, kill_pgroup: bool) -> Pid {
    if kill_pgroup {
        Pid::from_raw(-(child_pid as i32))
    } else {
        Pid::from_raw(child_pid as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_target_default_hits_the_child_only() {
        assert_eq!(forward_target(4321, false), Pid::from_raw(4321));
    }

    #[test]
    fn test_forward_target_pgroup_mode_hits_the_process_group() {
        assert_eq!(forward_target(4321, true), Pid::from_raw(-4321));
    }

    #[test]
    fn test_forwarded_set_excludes_reserved_signals() {
        assert!(!FORWARDED_SIGNALS.contains(&libc::SIGCHLD));
        assert!(!FORWARDED_SIGNALS.contains(&libc::SIGKILL));
        assert!(!FORWARDED_SIGNALS.contains(&libc::SIGSTOP));
    }
}
