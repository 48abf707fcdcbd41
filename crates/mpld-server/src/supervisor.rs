//! Child process spawning and lifecycle.
//!
//! The child becomes a session leader (detaching any controlling terminal)
//! and has its stdout/stderr replaced by stream-device connections whose
//! handshakes carry the child's own pid. The connections are made on the
//! child side of the fork because the pid does not exist before it.

use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use mpld_common::{Error, Result};
use mpld_device::{StreamDevice, ENV_DGRAM_SOCKET, ENV_STREAM_SOCKET};
use mpld_protocol::{StreamHello, StreamType};

use crate::config::CollectorConfig;

/// A spawned, supervised child.
pub(crate) struct ChildHandle {
    pid: u32,
    child: Child,
}

impl ChildHandle {
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Waits for the child to exit.
    pub(crate) async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Kills the child with SIGKILL and reaps it. Used when the control path
    /// aborts before steady state.
    pub(crate) async fn kill_and_reap(&mut self) {
        if let Err(e) = kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
            warn!(pid = self.pid, error = %e, "SIGKILL failed");
        }
        let _ = self.child.wait().await;
    }
}

/// Forks and execs the configured argv.
pub(crate) fn spawn_supervised(
    config: &CollectorConfig,
    stream_path: &Path,
    dgram_path: &Path,
) -> Result<ChildHandle> {
    let (program, args) = config
        .command
        .split_first()
        .ok_or_else(|| Error::spawn("<none>", "empty command"))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env(ENV_STREAM_SOCKET, stream_path)
        .env(ENV_DGRAM_SOCKET, dgram_path)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let stream_path = stream_path.to_path_buf();
    let capture_stderr = config.capture_stderr;
    unsafe {
        cmd.pre_exec(move || child_setup(&stream_path, capture_stderr));
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::spawn(program, e.to_string()))?;
    let pid = child
        .id()
        .ok_or_else(|| Error::spawn(program, "spawned child has no pid"))?;
    debug!(pid, command = %program, "child spawned");
    Ok(ChildHandle { pid, child })
}

/// Runs in the child between fork and exec.
fn child_setup(stream_path: &Path, capture_stderr: bool) -> std::io::Result<()> {
    // New session: no controlling terminal from here on.
    if unsafe { libc::setsid() } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    redirect_stream(stream_path, libc::STDOUT_FILENO, StreamType::Stdout)?;
    if capture_stderr {
        redirect_stream(stream_path, libc::STDERR_FILENO, StreamType::Stderr)?;
    }
    // Everything else the parent had open is close-on-exec; the two dup'ed
    // stdio fds survive because dup2 clears the flag on the target.
    Ok(())
}

fn redirect_stream(
    stream_path: &Path,
    target_fd: RawFd,
    stream_type: StreamType,
) -> std::io::Result<()> {
    let pid = unsafe { libc::getpid() } as u32;
    let hello = StreamHello::for_stream(pid, stream_type);
    let device =
        StreamDevice::connect(stream_path, &hello).map_err(std::io::Error::other)?;
    if unsafe { libc::dup2(device.as_raw_fd(), target_fd) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    // Dropping the device closes the original descriptor; the dup on the
    // stdio fd keeps the connection open.
    Ok(())
}
