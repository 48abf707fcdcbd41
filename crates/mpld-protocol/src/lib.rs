//! Wire protocol for the mpld log collector.
//!
//! Everything on the wire is MessagePack. The three collector messages are
//! carried as extension values so a reader can dispatch without knowing the
//! payload layout in advance:
//!
//! | Tag    | Message                | Payload |
//! |--------|------------------------|---------|
//! | `0x01` | symbolic atom          | UTF-8 atom name |
//! | `0x02` | [`StructuredLogMessage`] | five consecutive values |
//! | `0x03` | [`StreamHello`]        | three consecutive values |
//! | `0x04` | attached-file proxy    | empty |
//!
//! A stream connection carries exactly one [`StreamHello`] followed by raw
//! bytes; a datagram carries exactly one [`StructuredLogMessage`] or a proxy
//! whose real payload arrives through a passed file descriptor.

mod codec;
mod message;
mod value;

pub use codec::{
    decode_message, decode_message_prefix, encode_file_proxy, encode_hello, encode_structured,
    WireMessage, EXT_ATOM, EXT_FILE_PROXY, EXT_HELLO, EXT_STRUCTURED,
};
pub use message::{StreamHello, StructuredLogMessage};
pub use value::{AttrMap, AttrValue, StreamType};
