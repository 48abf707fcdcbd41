//! logfmt framing: one `key=value` line per message.

use mpld_common::Result;
use mpld_protocol::{AttrValue, StructuredLogMessage};

use crate::json::{attr_map_to_json, attr_to_json, iso8601};
use crate::{FramingSink, SinkOutput};

/// Writes one logfmt line per message.
///
/// Built-in keys are prefixed `_mpld.`, user keys are unprefixed, and the
/// `message` key comes last with any trailing newline stripped. Values
/// containing whitespace or control characters are double-quoted with
/// standard escapes.
pub struct LogfmtFraming {
    out: SinkOutput,
}

impl LogfmtFraming {
    pub fn new(out: SinkOutput) -> Self {
        Self { out }
    }
}

impl FramingSink for LogfmtFraming {
    fn on_message(&mut self, msg: &StructuredLogMessage) -> Result<()> {
        let mut line = String::new();

        if let Some(stream_type) = &msg.stream_type {
            push_pair(&mut line, "_mpld.stream_type", stream_type.as_str());
        }
        if let Some(pid) = msg.pid {
            push_pair(&mut line, "_mpld.pid", &pid.to_string());
        }
        if let Some(tid) = msg.tid {
            push_pair(&mut line, "_mpld.tid", &tid.to_string());
        }

        for (key, value) in msg.attributes.iter() {
            push_pair(&mut line, key, &render_value(value));
        }

        if msg.message_text.is_some() {
            let text = msg.text_lossy();
            let text = text.strip_suffix('\n').unwrap_or(&text);
            push_pair(&mut line, "message", text);
        }

        line.push('\n');
        self.out.write_all(line.as_bytes())?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

fn push_pair(line: &mut String, key: &str, value: &str) {
    if !line.is_empty() {
        line.push(' ');
    }
    line.push_str(key);
    line.push('=');
    push_value(line, value);
}

fn push_value(line: &mut String, value: &str) {
    if !needs_quoting(value) {
        line.push_str(value);
        return;
    }
    line.push('"');
    for c in value.chars() {
        match c {
            '\\' => line.push_str("\\\\"),
            '"' => line.push_str("\\\""),
            '\n' => line.push_str("\\n"),
            '\r' => line.push_str("\\r"),
            '\t' => line.push_str("\\t"),
            c if c.is_control() => {
                line.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => line.push(c),
        }
    }
    line.push('"');
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '"' || c == '=')
}

fn render_value(value: &AttrValue) -> String {
    match value {
        AttrValue::Null => String::new(),
        AttrValue::Bool(b) => b.to_string(),
        AttrValue::Int(n) => n.to_string(),
        AttrValue::Float(f) => f.to_string(),
        AttrValue::Str(s) => s.clone(),
        AttrValue::Timestamp(ts) => iso8601(ts),
        // Nested structures render as their canonical compact-JSON string.
        AttrValue::List(_) => serde_json::to_string(&attr_to_json(value)).unwrap_or_default(),
        AttrValue::Map(map) => serde_json::to_string(&attr_map_to_json(map)).unwrap_or_default(),
    }
}
