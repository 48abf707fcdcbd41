//! Client-side emitters for the collector's two endpoints.
//!
//! A producer process finds the endpoints through the environment variables
//! the supervisor exports, then either streams raw bytes (one handshake, then
//! a transparent byte sink) or sends structured messages one datagram at a
//! time.

mod stream;
mod structured;

pub use stream::StreamDevice;
pub use structured::{StructuredDevice, MAX_DATAGRAM_SIZE};

/// Environment variable carrying the absolute stream-socket path.
pub const ENV_STREAM_SOCKET: &str = "MULTIPROC_LOG_DEVICE_STREAM";

/// Environment variable carrying the absolute datagram-socket path.
pub const ENV_DGRAM_SOCKET: &str = "MULTIPROC_LOG_DEVICE_DGRAM";

pub(crate) fn socket_path_from_env(var: &str) -> mpld_common::Result<std::path::PathBuf> {
    match std::env::var_os(var) {
        Some(path) => Ok(std::path::PathBuf::from(path)),
        None => Err(mpld_common::Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{var} is not set; not running under a collector"),
        ))),
    }
}
