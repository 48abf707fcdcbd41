//! Datagram endpoint: structured messages, one per datagram, with an
//! attached-file fallback for oversize payloads.

use std::io::{IoSliceMut, Read};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
use tokio::io::Interest;
use tokio::net::UnixDatagram;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mpld_common::Result;
use mpld_device::MAX_DATAGRAM_SIZE;
use mpld_protocol::{decode_message, StructuredLogMessage, WireMessage};

use crate::SharedSink;

/// Receives datagrams until cancelled.
///
/// Cancellation performs a final non-blocking drain so datagrams queued
/// while the stream side was draining are not lost. A malformed datagram is
/// discarded; it never stops the receiver.
pub async fn run_dgram_receiver(sock: UnixDatagram, sink: SharedSink, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 8 * 1024];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                drain_pending(&sock, &mut buf, &sink);
                return;
            }
            ready = sock.readable() => {
                if ready.is_err() {
                    return;
                }
                match sock.try_io(Interest::READABLE, || recv_datagram(sock.as_raw_fd(), &mut buf)) {
                    Ok((n, fds)) => handle_datagram(&buf[..n], fds, &sink),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        warn!(error = %e, "datagram receive failed");
                        return;
                    }
                }
            }
        }
    }
}

fn drain_pending(sock: &UnixDatagram, buf: &mut [u8], sink: &SharedSink) {
    loop {
        match sock.try_io(Interest::READABLE, || recv_datagram(sock.as_raw_fd(), buf)) {
            Ok((n, fds)) => handle_datagram(&buf[..n], fds, sink),
            Err(_) => return,
        }
    }
}

/// One `recvmsg` with room for SCM_RIGHTS ancillary data.
fn recv_datagram(fd: RawFd, buf: &mut [u8]) -> std::io::Result<(usize, Vec<OwnedFd>)> {
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 8]);
    let mut iov = [IoSliceMut::new(buf)];
    let msg = recvmsg::<()>(fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::MSG_CMSG_CLOEXEC)
        .map_err(std::io::Error::from)?;
    let mut fds = Vec::new();
    for cmsg in msg.cmsgs().map_err(std::io::Error::from)? {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            for fd in received {
                fds.push(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }
    Ok((msg.bytes, fds))
}

/// Dispatches one datagram. Received fds are closed when `fds` drops,
/// whether or not they were used.
fn handle_datagram(body: &[u8], fds: Vec<OwnedFd>, sink: &SharedSink) {
    match decode_message(body) {
        Ok(WireMessage::Structured(msg)) => forward(sink, &msg),
        Ok(WireMessage::FileProxy) => match read_attached(fds) {
            Ok(msg) => forward(sink, &msg),
            Err(e) => warn!(error = %e, "discarding attached-file datagram"),
        },
        Ok(WireMessage::Hello(_)) => {
            warn!("discarding handshake sent to the datagram endpoint")
        }
        Err(e) => warn!(error = %e, "discarding malformed datagram"),
    }
}

/// Reads the real payload from the first attached fd.
fn read_attached(fds: Vec<OwnedFd>) -> Result<StructuredLogMessage> {
    let fd = fds
        .into_iter()
        .next()
        .ok_or_else(|| mpld_common::Error::decode("file proxy carried no fd"))?;
    let mut file = std::fs::File::from(fd);
    let mut encoded = Vec::new();
    file.read_to_end(&mut encoded)?;
    match decode_message(&encoded)? {
        WireMessage::Structured(msg) => Ok(msg),
        _ => Err(mpld_common::Error::decode(
            "attached file does not hold a structured message",
        )),
    }
}

fn forward(sink: &SharedSink, msg: &StructuredLogMessage) {
    debug!(pid = ?msg.pid, "structured message received");
    if let Err(e) = sink.lock().on_message(msg) {
        warn!(error = %e, "framing sink write failed");
    }
}
