//! The structured device: one datagram per message, with fd-passing for
//! oversize payloads.

use std::io::{IoSlice, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::path::Path;

use nix::sys::socket::{self, sockopt, ControlMessage, MsgFlags};

use mpld_common::{Error, Result};
use mpld_protocol::{
    encode_file_proxy, encode_structured, AttrMap, StreamType, StructuredLogMessage,
};

use crate::{socket_path_from_env, ENV_DGRAM_SOCKET};

/// Largest payload sent as an inline datagram. Anything bigger goes through
/// the attached-file proxy.
pub const MAX_DATAGRAM_SIZE: usize = 512 * 1024;

/// A connected datagram-endpoint client.
pub struct StructuredDevice {
    sock: UnixDatagram,
}

impl StructuredDevice {
    /// Connects to the datagram socket at `path`.
    ///
    /// `SO_SNDBUF` is raised to [`MAX_DATAGRAM_SIZE`] best-effort; the
    /// fd-passing fallback makes the exact value non-critical.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let sock = UnixDatagram::unbound()?;
        sock.connect(path)?;
        let _ = socket::setsockopt(&sock, sockopt::SndBuf, &MAX_DATAGRAM_SIZE);
        Ok(Self { sock })
    }

    /// Connects via the `MULTIPROC_LOG_DEVICE_DGRAM` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::connect(socket_path_from_env(ENV_DGRAM_SOCKET)?)
    }

    /// Sends one message, exactly as given.
    pub fn send(&self, msg: &StructuredLogMessage) -> Result<()> {
        let bytes = encode_structured(msg)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return self.send_via_fd(&bytes);
        }
        match self.sock.send(&bytes) {
            Ok(_) => Ok(()),
            Err(e) if is_oversize(&e) => self.send_via_fd(&bytes),
            Err(e) => Err(e.into()),
        }
    }

    /// Sends message text plus attributes, filling `pid`, `tid`, and
    /// `stream_type = structured` from the calling process.
    pub fn write_message(
        &self,
        text: impl Into<Vec<u8>>,
        attributes: AttrMap,
    ) -> Result<()> {
        let msg = StructuredLogMessage {
            message_text: Some(text.into()),
            attributes,
            pid: Some(std::process::id()),
            tid: current_tid(),
            stream_type: Some(StreamType::Structured),
        };
        self.send(&msg)
    }

    /// Oversize fallback: park the encoded message in an unlinked temp file
    /// and send a proxy datagram carrying the fd as SCM_RIGHTS.
    fn send_via_fd(&self, encoded: &[u8]) -> Result<()> {
        let mut file = tempfile::tempfile()?;
        file.write_all(encoded)?;
        file.seek(SeekFrom::Start(0))?;

        let proxy = encode_file_proxy()?;
        let iov = [IoSlice::new(&proxy)];
        let fds = [file.as_raw_fd()];
        let cmsgs = [ControlMessage::ScmRights(&fds)];
        socket::sendmsg::<()>(
            self.sock.as_raw_fd(),
            &iov,
            &cmsgs,
            MsgFlags::empty(),
            None,
        )
        .map_err(|e| Error::Io(std::io::Error::from(e)))?;
        Ok(())
    }
}

fn is_oversize(err: &std::io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::EMSGSIZE || code == libc::ENOBUFS
    )
}

#[cfg(target_os = "linux")]
fn current_tid() -> Option<u64> {
    Some(unsafe { libc::gettid() } as u64)
}

#[cfg(not(target_os = "linux"))]
fn current_tid() -> Option<u64> {
    None
}
