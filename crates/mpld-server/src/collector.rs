//! The server loop: startup, steady state, shutdown.

use std::process::ExitStatus;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{UnixDatagram, UnixListener};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use mpld_common::{Error, Result};
use mpld_framing::BoxedFramingSink;

use crate::config::{CollectorConfig, DGRAM_SOCKET_NAME, STREAM_SOCKET_NAME};
use crate::dgram::run_dgram_receiver;
use crate::signals::SignalRelay;
use crate::stream::run_stream_acceptor;
use crate::supervisor::spawn_supervised;
use crate::SharedSink;

/// Hook invoked with the child's pid once it has been spawned.
///
/// An error here kills the child with SIGKILL, reaps it, and propagates.
pub type StartHook = Box<dyn FnOnce(u32) -> Result<()> + Send>;

/// One supervised collector run.
pub struct Collector {
    config: CollectorConfig,
    sink: SharedSink,
    start_hook: Option<StartHook>,
}

impl Collector {
    /// Builds a collector around a framing sink.
    pub fn new(config: CollectorConfig, sink: BoxedFramingSink) -> Self {
        Self {
            config,
            sink: Arc::new(Mutex::new(sink)),
            start_hook: None,
        }
    }

    /// Registers a hook to run once the child is up.
    pub fn on_child_start(mut self, hook: StartHook) -> Self {
        self.start_hook = Some(hook);
        self
    }

    /// Runs the full lifecycle and returns the child's exit status.
    ///
    /// Both endpoints are bound before the fork so the child inherits live
    /// advertised socket paths through the environment. Shutdown begins when
    /// the child exits (a relayed terminating signal normally ends in the
    /// same place).
    pub async fn run(mut self) -> Result<ExitStatus> {
        // Startup: runtime dir, both endpoints, ingest tasks, then the child.
        let runtime_dir = tempfile::Builder::new()
            .prefix("multiproc-log-device-")
            .tempdir()?;
        let stream_path = runtime_dir.path().join(STREAM_SOCKET_NAME);
        let dgram_path = runtime_dir.path().join(DGRAM_SOCKET_NAME);

        let listener = UnixListener::bind(&stream_path)?;
        let dgram_sock = UnixDatagram::bind(&dgram_path)?;
        debug!(dir = %runtime_dir.path().display(), "endpoints bound");

        let conn_tracker = TaskTracker::new();
        let conn_cancel = CancellationToken::new();
        let acceptor = tokio::spawn(run_stream_acceptor(
            listener,
            self.sink.clone(),
            conn_tracker.clone(),
            conn_cancel.clone(),
            self.config.max_line_length,
        ));

        let dgram_cancel = CancellationToken::new();
        let receiver = tokio::spawn(run_dgram_receiver(
            dgram_sock,
            self.sink.clone(),
            dgram_cancel.clone(),
        ));

        let mut child = match spawn_supervised(&self.config, &stream_path, &dgram_path) {
            Ok(child) => child,
            Err(e) => {
                acceptor.abort();
                dgram_cancel.cancel();
                let _ = receiver.await;
                return Err(e);
            }
        };
        info!(pid = child.pid(), "child started");

        // Child is ready: run the caller's post-start hook, if any.
        if let Some(hook) = self.start_hook.take() {
            if let Err(e) = hook(child.pid()) {
                warn!(error = %e, "child-start hook failed; killing child");
                child.kill_and_reap().await;
                acceptor.abort();
                dgram_cancel.cancel();
                let _ = receiver.await;
                return Err(Error::startup_hook(e.to_string()));
            }
        }

        let relay = SignalRelay::start(child.pid(), self.config.kill_pgroup);

        // Steady state ends when the child exits.
        let status = child.wait().await?;
        info!(?status, "child exited");
        relay.shutdown();

        // Shutdown, stream side first: stop accepting, close the listening
        // socket, then wait for connected writers (grandchildren included)
        // to drain.
        acceptor.abort();
        let _ = acceptor.await;
        let _ = std::fs::remove_file(&stream_path);

        conn_tracker.close();
        if tokio::time::timeout(self.config.shutdown_timeout, conn_tracker.wait())
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.config.shutdown_timeout,
                "drain timed out; force-closing remaining stream connections"
            );
            conn_cancel.cancel();
            conn_tracker.wait().await;
        }

        // Only now the datagram side: streams closing is the signal that the
        // process tree is gone, and a just-forked grandchild may send
        // datagrams up to that point.
        dgram_cancel.cancel();
        let _ = receiver.await;
        let _ = std::fs::remove_file(&dgram_path);

        if let Err(e) = self.sink.lock().flush() {
            warn!(error = %e, "output flush failed");
        }

        runtime_dir.close()?;
        Ok(status)
    }
}
