//! The collector's wire messages.

use crate::value::{AttrMap, StreamType};

/// The unit that reaches a framing sink.
///
/// Produced either by the stream acceptor (one per line, fields filled from
/// the connection's [`StreamHello`]) or verbatim by a structured-device
/// producer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredLogMessage {
    /// Raw message bytes. May contain newlines; absent only for
    /// pure-attribute messages.
    pub message_text: Option<Vec<u8>>,
    /// Producer-supplied attributes, in insertion order.
    pub attributes: AttrMap,
    /// Producing OS process.
    pub pid: Option<u32>,
    /// Producing thread.
    pub tid: Option<u64>,
    /// Which stream this came from.
    pub stream_type: Option<StreamType>,
}

impl StructuredLogMessage {
    /// The message text as a lossy string, for text-based framings.
    pub fn text_lossy(&self) -> std::borrow::Cow<'_, str> {
        match &self.message_text {
            Some(bytes) => String::from_utf8_lossy(bytes),
            None => std::borrow::Cow::Borrowed(""),
        }
    }
}

/// First frame on every stream connection, exactly once.
///
/// The acceptor remembers these values for the lifetime of the connection
/// and applies them to every line read after the handshake.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamHello {
    pub attributes: AttrMap,
    pub pid: Option<u32>,
    pub stream_type: Option<StreamType>,
}

impl StreamHello {
    /// Builds a hello for one of the well-known stdio streams of `pid`.
    pub fn for_stream(pid: u32, stream_type: StreamType) -> Self {
        Self {
            attributes: AttrMap::new(),
            pid: Some(pid),
            stream_type: Some(stream_type),
        }
    }

    /// Expands one raw chunk into a full message using the remembered fields.
    pub fn message_for_chunk(&self, chunk: Vec<u8>) -> StructuredLogMessage {
        StructuredLogMessage {
            message_text: Some(chunk),
            attributes: self.attributes.clone(),
            pid: self.pid,
            tid: None,
            stream_type: self.stream_type.clone(),
        }
    }
}
