//! Collector configuration.

use std::time::Duration;

/// Drain bound applied while waiting for stream connections to close after
/// the child exits.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Stream-endpoint socket file name inside the runtime directory.
pub const STREAM_SOCKET_NAME: &str = "multiproc_log_device_stream.sock";

/// Datagram-endpoint socket file name inside the runtime directory.
pub const DGRAM_SOCKET_NAME: &str = "multiproc_log_device_dgram.sock";

/// Configuration for one collector run.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// The subcommand argv (program first).
    pub command: Vec<String>,
    /// Replace the child's stderr with a stream-device connection too.
    pub capture_stderr: bool,
    /// Forward signals to the child's process group instead of the child.
    pub kill_pgroup: bool,
    /// Max bytes buffered per stream line; `0` means unbounded.
    pub max_line_length: usize,
    /// Bound on the post-exit drain phase.
    pub shutdown_timeout: Duration,
}

impl CollectorConfig {
    /// A configuration with defaults for everything but the command.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            capture_stderr: true,
            kill_pgroup: false,
            max_line_length: 0,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}
