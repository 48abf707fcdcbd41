//! JSON framing: one compact object per line.

use chrono::{DateTime, SecondsFormat, Utc};
use mpld_common::{Error, Result};
use mpld_protocol::{AttrMap, AttrValue, StructuredLogMessage};

use crate::{FramingSink, SinkOutput};

/// Writes one compact JSON object per message.
///
/// Built-in fields live under a nested `"_mpld"` object, user attributes at
/// the top level, the message text under `"message"`. Absent built-ins are
/// omitted entirely.
pub struct JsonFraming {
    out: SinkOutput,
}

impl JsonFraming {
    pub fn new(out: SinkOutput) -> Self {
        Self { out }
    }
}

impl FramingSink for JsonFraming {
    fn on_message(&mut self, msg: &StructuredLogMessage) -> Result<()> {
        let mut object = serde_json::Map::new();

        let mut builtin = serde_json::Map::new();
        if let Some(stream_type) = &msg.stream_type {
            builtin.insert(
                "stream_type".to_string(),
                serde_json::Value::from(stream_type.as_str()),
            );
        }
        if let Some(pid) = msg.pid {
            builtin.insert("pid".to_string(), serde_json::Value::from(pid));
        }
        if let Some(tid) = msg.tid {
            builtin.insert("tid".to_string(), serde_json::Value::from(tid));
        }
        if !builtin.is_empty() {
            object.insert("_mpld".to_string(), serde_json::Value::Object(builtin));
        }

        for (key, value) in msg.attributes.iter() {
            object.insert(key.to_string(), attr_to_json(value));
        }

        if msg.message_text.is_some() {
            object.insert(
                "message".to_string(),
                serde_json::Value::from(msg.text_lossy().into_owned()),
            );
        }

        serde_json::to_writer(&mut self.out, &serde_json::Value::Object(object))
            .map_err(|e| Error::encode(e.to_string()))?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Renders a timestamp the way both structured framings do: ISO-8601 UTC.
pub(crate) fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn attr_to_json(value: &AttrValue) -> serde_json::Value {
    match value {
        AttrValue::Null => serde_json::Value::Null,
        AttrValue::Bool(b) => serde_json::Value::from(*b),
        AttrValue::Int(n) => serde_json::Value::from(*n),
        AttrValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        AttrValue::Str(s) => serde_json::Value::from(s.as_str()),
        AttrValue::Timestamp(ts) => serde_json::Value::from(iso8601(ts)),
        AttrValue::List(items) => {
            serde_json::Value::Array(items.iter().map(attr_to_json).collect())
        }
        AttrValue::Map(map) => attr_map_to_json(map),
    }
}

pub(crate) fn attr_map_to_json(map: &AttrMap) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for (key, value) in map.iter() {
        object.insert(key.to_string(), attr_to_json(value));
    }
    serde_json::Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CaptureOutput;
    use chrono::TimeZone;
    use mpld_protocol::StreamType;

    fn framed(msg: &StructuredLogMessage) -> String {
        let capture = CaptureOutput::default();
        let mut sink = JsonFraming::new(Box::new(capture.clone()));
        sink.on_message(msg).unwrap();
        capture.string()
    }

    #[test]
    fn test_stdout_line_layout() {
        let msg = StructuredLogMessage {
            message_text: Some(b"hello\n".to_vec()),
            pid: Some(1234),
            stream_type: Some(StreamType::Stdout),
            ..Default::default()
        };
        assert_eq!(
            framed(&msg),
            "{\"_mpld\":{\"stream_type\":\"stdout\",\"pid\":1234},\"message\":\"hello\\n\"}\n"
        );
    }

    #[test]
    fn test_builtin_object_omitted_when_empty() {
        let msg = StructuredLogMessage {
            message_text: Some(b"bare\n".to_vec()),
            ..Default::default()
        };
        assert_eq!(framed(&msg), "{\"message\":\"bare\\n\"}\n");
    }

    #[test]
    fn test_user_attributes_precede_message_in_insertion_order() {
        let mut attributes = AttrMap::new();
        attributes.insert("zulu", "z");
        attributes.insert("alpha", 1i64);
        let msg = StructuredLogMessage {
            message_text: Some(b"m".to_vec()),
            attributes,
            ..Default::default()
        };
        assert_eq!(framed(&msg), "{\"zulu\":\"z\",\"alpha\":1,\"message\":\"m\"}\n");
    }

    #[test]
    fn test_timestamp_renders_iso8601_utc() {
        let mut attributes = AttrMap::new();
        attributes.insert("at", Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        let msg = StructuredLogMessage {
            message_text: Some(b"t".to_vec()),
            attributes,
            ..Default::default()
        };
        assert_eq!(
            framed(&msg),
            "{\"at\":\"2024-01-02T03:04:05Z\",\"message\":\"t\"}\n"
        );
    }

    #[test]
    fn test_nested_map_becomes_nested_object() {
        let mut attributes = AttrMap::new();
        attributes.insert(
            "ctx",
            AttrValue::Map(AttrMap::from_iter([("request_id", "r-1")])),
        );
        let msg = StructuredLogMessage {
            message_text: Some(b"n".to_vec()),
            attributes,
            ..Default::default()
        };
        assert_eq!(
            framed(&msg),
            "{\"ctx\":{\"request_id\":\"r-1\"},\"message\":\"n\"}\n"
        );
    }
}
