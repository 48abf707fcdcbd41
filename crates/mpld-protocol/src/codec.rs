//! MessagePack encoding and decoding of the wire messages.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use mpld_common::{Error, Result};
use rmpv::Value;

use crate::message::{StreamHello, StructuredLogMessage};
use crate::value::{AttrMap, AttrValue, StreamType};

/// Extension tag for a small symbolic atom.
pub const EXT_ATOM: i8 = 0x01;
/// Extension tag for a [`StructuredLogMessage`].
pub const EXT_STRUCTURED: i8 = 0x02;
/// Extension tag for a [`StreamHello`].
pub const EXT_HELLO: i8 = 0x03;
/// Extension tag for the attached-file proxy sentinel.
pub const EXT_FILE_PROXY: i8 = 0x04;

/// The standard MessagePack timestamp extension.
const EXT_TIMESTAMP: i8 = -1;

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Structured(StructuredLogMessage),
    Hello(StreamHello),
    /// The real payload is in the first file descriptor of the datagram's
    /// ancillary data.
    FileProxy,
}

// ===== ENCODING =====

/// Encodes a structured log message as an extension value.
pub fn encode_structured(msg: &StructuredLogMessage) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    write_value(&mut payload, &text_to_value(&msg.message_text))?;
    write_value(&mut payload, &attr_map_to_value(&msg.attributes))?;
    write_value(&mut payload, &opt_uint_to_value(msg.pid.map(u64::from)))?;
    write_value(&mut payload, &opt_uint_to_value(msg.tid))?;
    write_value(&mut payload, &stream_type_to_value(&msg.stream_type))?;
    encode_ext(EXT_STRUCTURED, payload)
}

/// Encodes a stream handshake as an extension value.
pub fn encode_hello(hello: &StreamHello) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    write_value(&mut payload, &attr_map_to_value(&hello.attributes))?;
    write_value(&mut payload, &opt_uint_to_value(hello.pid.map(u64::from)))?;
    write_value(&mut payload, &stream_type_to_value(&hello.stream_type))?;
    encode_ext(EXT_HELLO, payload)
}

/// Encodes the attached-file proxy sentinel (empty payload).
pub fn encode_file_proxy() -> Result<Vec<u8>> {
    encode_ext(EXT_FILE_PROXY, Vec::new())
}

fn encode_ext(tag: i8, payload: Vec<u8>) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(payload.len() + 8);
    write_value(&mut buf, &Value::Ext(tag, payload))?;
    Ok(buf)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    rmpv::encode::write_value(buf, value).map_err(|e| Error::encode(e.to_string()))
}

// ===== DECODING =====

/// Decodes exactly one wire message from `bytes`.
///
/// Trailing bytes are ignored; use [`decode_message_prefix`] when the caller
/// needs to know where the message ended.
pub fn decode_message(bytes: &[u8]) -> Result<WireMessage> {
    match decode_message_prefix(bytes)? {
        Some((msg, _)) => Ok(msg),
        None => Err(Error::decode("truncated wire message")),
    }
}

/// Attempts to decode one wire message from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` holds only a prefix of a message (read more
/// and retry), and `Ok(Some((msg, consumed)))` on success. Bytes past
/// `consumed` belong to whatever follows the message; for a stream
/// connection that is the start of the raw phase.
pub fn decode_message_prefix(buf: &[u8]) -> Result<Option<(WireMessage, usize)>> {
    let mut cursor = Cursor::new(buf);
    let value = match rmpv::decode::read_value(&mut cursor) {
        Ok(value) => value,
        Err(err) => {
            let io: std::io::Error = err.into();
            if io.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(Error::decode(io.to_string()));
        }
    };
    let consumed = cursor.position() as usize;
    let msg = wire_message_from_value(value)?;
    Ok(Some((msg, consumed)))
}

fn wire_message_from_value(value: Value) -> Result<WireMessage> {
    let (tag, data) = match value {
        Value::Ext(tag, data) => (tag, data),
        other => {
            return Err(Error::decode(format!(
                "expected extension value, got {other}"
            )))
        }
    };
    match tag {
        EXT_STRUCTURED => Ok(WireMessage::Structured(structured_from_payload(&data)?)),
        EXT_HELLO => Ok(WireMessage::Hello(hello_from_payload(&data)?)),
        EXT_FILE_PROXY => Ok(WireMessage::FileProxy),
        other => Err(Error::decode(format!("unknown extension tag {other}"))),
    }
}

fn structured_from_payload(data: &[u8]) -> Result<StructuredLogMessage> {
    let values: [Value; 5] = read_payload_values(data, 5)?
        .try_into()
        .map_err(|_| Error::decode("structured message payload arity"))?;
    let [text, attributes, pid, tid, stream_type] = values;
    Ok(StructuredLogMessage {
        message_text: text_from_value(text)?,
        attributes: attr_map_from_value(attributes)?,
        pid: pid_from_value(pid)?,
        tid: uint_from_value(tid, "tid")?,
        stream_type: stream_type_from_value(stream_type)?,
    })
}

fn hello_from_payload(data: &[u8]) -> Result<StreamHello> {
    let values: [Value; 3] = read_payload_values(data, 3)?
        .try_into()
        .map_err(|_| Error::decode("handshake payload arity"))?;
    let [attributes, pid, stream_type] = values;
    Ok(StreamHello {
        attributes: attr_map_from_value(attributes)?,
        pid: pid_from_value(pid)?,
        stream_type: stream_type_from_value(stream_type)?,
    })
}

fn read_payload_values(data: &[u8], count: usize) -> Result<Vec<Value>> {
    let mut cursor = Cursor::new(data);
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let value = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| Error::decode(format!("extension payload: {e}")))?;
        values.push(value);
    }
    Ok(values)
}

// ===== VALUE CONVERSIONS =====

fn text_to_value(text: &Option<Vec<u8>>) -> Value {
    match text {
        None => Value::Nil,
        Some(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Value::from(s),
            Err(_) => Value::Binary(bytes.clone()),
        },
    }
}

fn text_from_value(value: Value) -> Result<Option<Vec<u8>>> {
    match value {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(Some(s.as_bytes().to_vec())),
        Value::Binary(bytes) => Ok(Some(bytes)),
        other => Err(Error::decode(format!(
            "message_text: expected string or binary, got {other}"
        ))),
    }
}

fn opt_uint_to_value(value: Option<u64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Nil)
}

fn uint_from_value(value: Value, what: &str) -> Result<Option<u64>> {
    match value {
        Value::Nil => Ok(None),
        Value::Integer(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::decode(format!("{what}: negative integer"))),
        other => Err(Error::decode(format!("{what}: expected integer, got {other}"))),
    }
}

fn pid_from_value(value: Value) -> Result<Option<u32>> {
    match uint_from_value(value, "pid")? {
        None => Ok(None),
        Some(n) => u32::try_from(n)
            .map(Some)
            .map_err(|_| Error::decode("pid out of range")),
    }
}

fn stream_type_to_value(stream_type: &Option<StreamType>) -> Value {
    match stream_type {
        None => Value::Nil,
        Some(st) => Value::Ext(EXT_ATOM, st.as_str().as_bytes().to_vec()),
    }
}

fn stream_type_from_value(value: Value) -> Result<Option<StreamType>> {
    match value {
        Value::Nil => Ok(None),
        Value::Ext(EXT_ATOM, data) => Ok(Some(StreamType::from_name(&atom_name(&data)?))),
        Value::String(s) => Ok(Some(StreamType::from_name(&utf8_string(s)))),
        other => Err(Error::decode(format!(
            "stream_type: expected atom, got {other}"
        ))),
    }
}

fn atom_name(data: &[u8]) -> Result<String> {
    std::str::from_utf8(data)
        .map(str::to_string)
        .map_err(|_| Error::decode("atom name is not UTF-8"))
}

fn utf8_string(s: rmpv::Utf8String) -> String {
    match s.into_str() {
        Some(s) => s,
        None => String::new(),
    }
}

fn attr_map_to_value(map: &AttrMap) -> Value {
    Value::Map(
        map.iter()
            .map(|(k, v)| (Value::from(k), attr_value_to_value(v)))
            .collect(),
    )
}

fn attr_map_from_value(value: Value) -> Result<AttrMap> {
    match value {
        Value::Nil => Ok(AttrMap::new()),
        Value::Map(pairs) => {
            let mut map = AttrMap::new();
            for (key, value) in pairs {
                map.insert(attr_key_from_value(key)?, attr_value_from_value(value)?);
            }
            Ok(map)
        }
        other => Err(Error::decode(format!(
            "attributes: expected map, got {other}"
        ))),
    }
}

fn attr_key_from_value(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(utf8_string(s)),
        Value::Ext(EXT_ATOM, data) => atom_name(&data),
        other => Err(Error::decode(format!(
            "attribute key: expected string or atom, got {other}"
        ))),
    }
}

fn attr_value_to_value(value: &AttrValue) -> Value {
    match value {
        AttrValue::Null => Value::Nil,
        AttrValue::Bool(b) => Value::Boolean(*b),
        AttrValue::Int(n) => Value::from(*n),
        AttrValue::Float(f) => Value::F64(*f),
        AttrValue::Str(s) => Value::from(s.as_str()),
        AttrValue::Timestamp(ts) => Value::Ext(EXT_TIMESTAMP, encode_timestamp(ts)),
        AttrValue::List(items) => Value::Array(items.iter().map(attr_value_to_value).collect()),
        AttrValue::Map(map) => attr_map_to_value(map),
    }
}

fn attr_value_from_value(value: Value) -> Result<AttrValue> {
    match value {
        Value::Nil => Ok(AttrValue::Null),
        Value::Boolean(b) => Ok(AttrValue::Bool(b)),
        Value::Integer(n) => n
            .as_i64()
            .map(AttrValue::Int)
            .ok_or_else(|| Error::decode("attribute integer out of range")),
        Value::F32(f) => Ok(AttrValue::Float(f64::from(f))),
        Value::F64(f) => Ok(AttrValue::Float(f)),
        Value::String(s) => Ok(AttrValue::Str(utf8_string(s))),
        Value::Binary(bytes) => Ok(AttrValue::Str(
            String::from_utf8_lossy(&bytes).into_owned(),
        )),
        Value::Array(items) => Ok(AttrValue::List(
            items
                .into_iter()
                .map(attr_value_from_value)
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Map(_) => Ok(AttrValue::Map(attr_map_from_value(value)?)),
        Value::Ext(EXT_TIMESTAMP, data) => Ok(AttrValue::Timestamp(decode_timestamp(&data)?)),
        Value::Ext(EXT_ATOM, data) => Ok(AttrValue::Str(atom_name(&data)?)),
        Value::Ext(tag, _) => Err(Error::decode(format!(
            "unknown extension tag {tag} in attribute value"
        ))),
    }
}

// ===== TIMESTAMPS =====

// Standard MessagePack timestamp extension: 32-bit seconds, 64-bit packed
// nanoseconds+seconds, or 96-bit nanoseconds+signed seconds.

fn encode_timestamp(ts: &DateTime<Utc>) -> Vec<u8> {
    let secs = ts.timestamp();
    let nanos = ts.timestamp_subsec_nanos();
    if nanos == 0 && secs >= 0 && secs <= i64::from(u32::MAX) {
        (secs as u32).to_be_bytes().to_vec()
    } else if secs >= 0 && secs < (1i64 << 34) {
        ((u64::from(nanos) << 34) | secs as u64).to_be_bytes().to_vec()
    } else {
        let mut buf = Vec::with_capacity(12);
        buf.extend_from_slice(&nanos.to_be_bytes());
        buf.extend_from_slice(&secs.to_be_bytes());
        buf
    }
}

fn decode_timestamp(data: &[u8]) -> Result<DateTime<Utc>> {
    let (secs, nanos) = match data.len() {
        4 => (i64::from(be_u32(&data[..4])), 0),
        8 => {
            let packed = be_u64(&data[..8]);
            ((packed & ((1u64 << 34) - 1)) as i64, (packed >> 34) as u32)
        }
        12 => (be_i64(&data[4..12]), be_u32(&data[..4])),
        n => {
            return Err(Error::decode(format!(
                "timestamp payload has invalid length {n}"
            )))
        }
    };
    DateTime::from_timestamp(secs, nanos).ok_or_else(|| Error::decode("timestamp out of range"))
}

fn be_u32(data: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(data);
    u32::from_be_bytes(bytes)
}

fn be_u64(data: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(data);
    u64::from_be_bytes(bytes)
}

fn be_i64(data: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(data);
    i64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_message() -> StructuredLogMessage {
        let mut attributes = AttrMap::new();
        attributes.insert("zebra", "stripes");
        attributes.insert("count", 42i64);
        attributes.insert("enabled", true);
        attributes.insert("ratio", AttrValue::Float(0.5));
        attributes.insert("missing", AttrValue::Null);
        attributes.insert(
            "when",
            Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap(),
        );
        attributes.insert(
            "nested",
            AttrValue::Map(AttrMap::from_iter([("inner", "value")])),
        );
        attributes.insert(
            "tags",
            AttrValue::List(vec![AttrValue::from("a"), AttrValue::from("b")]),
        );
        StructuredLogMessage {
            message_text: Some(b"hello world\n".to_vec()),
            attributes,
            pid: Some(4321),
            tid: Some(7),
            stream_type: Some(StreamType::Structured),
        }
    }

    #[test]
    fn test_structured_roundtrip_preserves_everything() {
        let msg = sample_message();
        let bytes = encode_structured(&msg).unwrap();
        match decode_message(&bytes).unwrap() {
            WireMessage::Structured(decoded) => assert_eq!(decoded, msg),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_structured_roundtrip_preserves_attribute_order() {
        let msg = sample_message();
        let bytes = encode_structured(&msg).unwrap();
        let WireMessage::Structured(decoded) = decode_message(&bytes).unwrap() else {
            panic!("wrong message kind");
        };
        let original: Vec<&str> = msg.attributes.iter().map(|(k, _)| k).collect();
        let roundtripped: Vec<&str> = decoded.attributes.iter().map(|(k, _)| k).collect();
        assert_eq!(original, roundtripped);
    }

    #[test]
    fn test_non_utf8_message_text_roundtrips_as_binary() {
        let msg = StructuredLogMessage {
            message_text: Some(vec![0xff, 0xfe, b'\n']),
            ..Default::default()
        };
        let bytes = encode_structured(&msg).unwrap();
        let WireMessage::Structured(decoded) = decode_message(&bytes).unwrap() else {
            panic!("wrong message kind");
        };
        assert_eq!(decoded.message_text, Some(vec![0xff, 0xfe, b'\n']));
    }

    #[test]
    fn test_hello_roundtrip() {
        let hello = StreamHello {
            attributes: AttrMap::from_iter([("service", "api")]),
            pid: Some(99),
            stream_type: Some(StreamType::Stderr),
        };
        let bytes = encode_hello(&hello).unwrap();
        match decode_message(&bytes).unwrap() {
            WireMessage::Hello(decoded) => assert_eq!(decoded, hello),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_file_proxy_roundtrip() {
        let bytes = encode_file_proxy().unwrap();
        assert!(matches!(
            decode_message(&bytes).unwrap(),
            WireMessage::FileProxy
        ));
    }

    #[test]
    fn test_unknown_extension_tag_is_rejected() {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &Value::Ext(0x7f, vec![1, 2, 3])).unwrap();
        assert!(decode_message(&buf).is_err());
    }

    #[test]
    fn test_non_extension_value_is_rejected() {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &Value::from("plain string")).unwrap();
        assert!(decode_message(&buf).is_err());
    }

    #[test]
    fn test_prefix_decode_reports_consumed_length() {
        let hello = StreamHello::for_stream(10, StreamType::Stdout);
        let mut buf = encode_hello(&hello).unwrap();
        let hello_len = buf.len();
        buf.extend_from_slice(b"first raw bytes");

        let (msg, consumed) = decode_message_prefix(&buf).unwrap().expect("complete");
        assert_eq!(consumed, hello_len);
        assert!(matches!(msg, WireMessage::Hello(_)));
        assert_eq!(&buf[consumed..], b"first raw bytes");
    }

    #[test]
    fn test_prefix_decode_of_partial_message_wants_more() {
        let bytes = encode_structured(&sample_message()).unwrap();
        for cut in [1, 2, bytes.len() / 2, bytes.len() - 1] {
            assert!(
                decode_message_prefix(&bytes[..cut]).unwrap().is_none(),
                "cut at {cut} should be incomplete"
            );
        }
    }

    #[test]
    fn test_timestamp_encoding_forms() {
        // 32-bit: whole seconds in u32 range.
        let t32 = Utc.with_ymd_and_hms(2001, 9, 9, 1, 46, 40).unwrap();
        assert_eq!(encode_timestamp(&t32).len(), 4);
        assert_eq!(decode_timestamp(&encode_timestamp(&t32)).unwrap(), t32);

        // 64-bit: sub-second precision.
        let t64 = DateTime::from_timestamp(1_000_000_000, 123_456_789).unwrap();
        assert_eq!(encode_timestamp(&t64).len(), 8);
        assert_eq!(decode_timestamp(&encode_timestamp(&t64)).unwrap(), t64);

        // 96-bit: pre-epoch.
        let t96 = DateTime::from_timestamp(-1, 500_000_000).unwrap();
        assert_eq!(encode_timestamp(&t96).len(), 12);
        assert_eq!(decode_timestamp(&encode_timestamp(&t96)).unwrap(), t96);
    }
}
