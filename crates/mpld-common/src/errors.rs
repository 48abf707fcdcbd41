//! Error types shared across the mpld crates.

use thiserror::Error;

/// Result type alias for mpld operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for collector, device, and codec operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A wire message could not be decoded.
    #[error("Decode error: {reason}")]
    Decode { reason: String },

    /// A value could not be encoded for the wire.
    #[error("Encode error: {reason}")]
    Encode { reason: String },

    /// The first frame on a stream connection was not a valid handshake.
    #[error("Handshake rejected: {reason}")]
    Handshake { reason: String },

    /// No framing is registered under the requested name.
    #[error("Unknown framing: {name}")]
    UnknownFraming { name: String },

    /// The child process could not be spawned.
    #[error("Spawn failed: {command}: {reason}")]
    Spawn { command: String, reason: String },

    /// The caller-supplied child-start hook failed.
    #[error("Child-start hook failed: {reason}")]
    StartupHook { reason: String },
}

impl Error {
    /// Creates a Decode error.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Creates an Encode error.
    pub fn encode(reason: impl Into<String>) -> Self {
        Self::Encode {
            reason: reason.into(),
        }
    }

    /// Creates a Handshake error.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake {
            reason: reason.into(),
        }
    }

    /// Creates an UnknownFraming error.
    pub fn unknown_framing(name: impl Into<String>) -> Self {
        Self::UnknownFraming { name: name.into() }
    }

    /// Creates a Spawn error.
    pub fn spawn(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Spawn {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Creates a StartupHook error.
    pub fn startup_hook(reason: impl Into<String>) -> Self {
        Self::StartupHook {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::decode("truncated payload");
        assert!(matches!(err, Error::Decode { .. }));
        assert_eq!(err.to_string(), "Decode error: truncated payload");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
