//! The stream device: handshake once, then a transparent byte sink.

use std::io::Write;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;

use mpld_common::Result;
use mpld_protocol::{encode_hello, StreamHello};

use crate::{socket_path_from_env, ENV_STREAM_SOCKET};

/// A connected stream-endpoint client.
///
/// The handshake is sent during [`StreamDevice::connect`]; afterwards the
/// device is a plain [`Write`] passthrough. The raw fd is exposed so a
/// supervisor can `dup2` the connection onto a child's stdout or stderr.
pub struct StreamDevice {
    stream: UnixStream,
}

impl StreamDevice {
    /// Connects to the stream socket at `path` and sends `hello`.
    pub fn connect(path: impl AsRef<Path>, hello: &StreamHello) -> Result<Self> {
        let mut stream = UnixStream::connect(path)?;
        stream.write_all(&encode_hello(hello)?)?;
        Ok(Self { stream })
    }

    /// Connects via the `MULTIPROC_LOG_DEVICE_STREAM` environment variable.
    pub fn from_env(hello: &StreamHello) -> Result<Self> {
        Self::connect(socket_path_from_env(ENV_STREAM_SOCKET)?, hello)
    }

    /// Consumes the device, returning the connection's raw fd.
    pub fn into_raw_fd(self) -> RawFd {
        self.stream.into_raw_fd()
    }
}

impl Write for StreamDevice {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl AsRawFd for StreamDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
