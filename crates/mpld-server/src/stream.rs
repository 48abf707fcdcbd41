//! Stream endpoint: accept connections, read the handshake, then chunk raw
//! bytes into per-line messages.

use bytes::{Buf, Bytes, BytesMut};
use mpld_common::{Error, Result};
use mpld_protocol::{decode_message_prefix, StreamHello, WireMessage};
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::SharedSink;

/// Accepts stream connections until the task is aborted.
///
/// Each accepted connection gets its own task in `tracker`; those tasks
/// outlive the acceptor so late writers (typically grandchildren holding an
/// inherited connection) drain during shutdown.
pub async fn run_stream_acceptor(
    listener: UnixListener,
    sink: SharedSink,
    tracker: TaskTracker,
    cancel: CancellationToken,
    max_line_length: usize,
) {
    loop {
        match listener.accept().await {
            Ok((conn, _)) => {
                debug!("accepted stream connection");
                let sink = sink.clone();
                let cancel = cancel.child_token();
                tracker.spawn(async move {
                    if let Err(e) = handle_connection(conn, sink, cancel, max_line_length).await {
                        debug!(error = %e, "stream connection closed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "stream accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }
    }
}

/// One connection: handshake, then the raw phase.
async fn handle_connection(
    mut conn: UnixStream,
    sink: SharedSink,
    cancel: CancellationToken,
    max_line_length: usize,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(8 * 1024);

    // Handshake phase. Bytes decoded past the handshake are the first bytes
    // of the raw phase.
    let hello = loop {
        match decode_message_prefix(&buf)? {
            Some((WireMessage::Hello(hello), consumed)) => {
                buf.advance(consumed);
                break hello;
            }
            Some((_, _)) => {
                return Err(Error::handshake("first frame is not a stream handshake"))
            }
            None => {}
        }
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = conn.read_buf(&mut buf) => read?,
        };
        if n == 0 {
            if buf.is_empty() {
                return Ok(());
            }
            return Err(Error::handshake("connection closed mid-handshake"));
        }
    };

    // Raw phase: newline-delimited chunks, bounded by max_line_length.
    let mut chunker = LineChunker::new(max_line_length, buf);
    loop {
        while let Some(chunk) = chunker.next_chunk(false) {
            emit(&sink, &hello, chunk);
        }
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = conn.read_buf(chunker.buf_mut()) => read?,
        };
        if n == 0 {
            break;
        }
    }
    while let Some(chunk) = chunker.next_chunk(true) {
        emit(&sink, &hello, chunk);
    }
    Ok(())
}

fn emit(sink: &SharedSink, hello: &StreamHello, chunk: Bytes) {
    let msg = hello.message_for_chunk(chunk.to_vec());
    if let Err(e) = sink.lock().on_message(&msg) {
        warn!(error = %e, "framing sink write failed");
    }
}

/// Splits a byte stream into newline-terminated chunks.
///
/// A chunk ends at the first newline (inclusive) or at `max` bytes,
/// whichever comes first; `max == 0` means unbounded. After a long line is
/// split at the limit, its eventual newline comes through as a chunk of its
/// own so downstream framings can re-synchronize.
pub(crate) struct LineChunker {
    buf: BytesMut,
    max: usize,
}

impl LineChunker {
    pub(crate) fn new(max: usize, initial: BytesMut) -> Self {
        Self { buf: initial, max }
    }

    pub(crate) fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub(crate) fn next_chunk(&mut self, eof: bool) -> Option<Bytes> {
        if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            if self.max == 0 || pos < self.max {
                return Some(self.buf.split_to(pos + 1).freeze());
            }
        }
        if self.max > 0 && self.buf.len() >= self.max {
            return Some(self.buf.split_to(self.max).freeze());
        }
        if eof && !self.buf.is_empty() {
            return Some(self.buf.split().freeze());
        }
        None
    }
}
