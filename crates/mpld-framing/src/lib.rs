//! Framing sinks: the pluggable formatters that turn a
//! [`StructuredLogMessage`] into bytes on the output stream.
//!
//! The server serializes `on_message` calls under a single lock, so each
//! invocation may assume exclusive access to the output.

use std::collections::HashMap;
use std::io::Write;

use mpld_common::{Error, Result};
use mpld_protocol::StructuredLogMessage;

mod json;
mod logfmt;

pub use json::JsonFraming;
pub use logfmt::LogfmtFraming;

/// Output stream a framing writes into (typically the parent's stdout).
pub type SinkOutput = Box<dyn Write + Send>;

/// A boxed framing sink, as held by the server.
pub type BoxedFramingSink = Box<dyn FramingSink>;

/// Constructor signature for a registered framing.
pub type FramingCtor = fn(SinkOutput) -> BoxedFramingSink;

/// Trait for turning structured log messages into output bytes.
pub trait FramingSink: Send {
    /// Write one framed record.
    fn on_message(&mut self, msg: &StructuredLogMessage) -> Result<()>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<()>;
}

/// Passes `message_text` through verbatim.
pub struct NoneFraming {
    out: SinkOutput,
}

impl NoneFraming {
    pub fn new(out: SinkOutput) -> Self {
        Self { out }
    }
}

impl FramingSink for NoneFraming {
    fn on_message(&mut self, msg: &StructuredLogMessage) -> Result<()> {
        if let Some(text) = &msg.message_text {
            self.out.write_all(text)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Writes `message_text`, appending a newline when the text lacks one.
pub struct LineFraming {
    out: SinkOutput,
}

impl LineFraming {
    pub fn new(out: SinkOutput) -> Self {
        Self { out }
    }
}

impl FramingSink for LineFraming {
    fn on_message(&mut self, msg: &StructuredLogMessage) -> Result<()> {
        match &msg.message_text {
            Some(text) if text.ends_with(b"\n") => self.out.write_all(text)?,
            Some(text) => {
                self.out.write_all(text)?;
                self.out.write_all(b"\n")?;
            }
            None => self.out.write_all(b"\n")?,
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Name → constructor registry for framings.
///
/// Custom framings are supplied by calling [`FramingRegistry::register`]
/// before the server starts; the built-ins are pre-registered under the
/// names the CLI accepts.
pub struct FramingRegistry {
    ctors: HashMap<String, FramingCtor>,
}

impl FramingRegistry {
    /// A registry holding the four built-in framings.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            ctors: HashMap::new(),
        };
        registry.register("none", |out| Box::new(NoneFraming::new(out)));
        registry.register("line", |out| Box::new(LineFraming::new(out)));
        registry.register("json", |out| Box::new(JsonFraming::new(out)));
        registry.register("logfmt", |out| Box::new(LogfmtFraming::new(out)));
        registry
    }

    /// Registers a framing constructor, replacing any previous registration
    /// under the same name.
    pub fn register(&mut self, name: impl Into<String>, ctor: FramingCtor) {
        self.ctors.insert(name.into(), ctor);
    }

    /// Instantiates the framing registered under `name`.
    pub fn create(&self, name: &str, output: SinkOutput) -> Result<BoxedFramingSink> {
        let ctor = self
            .ctors
            .get(name)
            .ok_or_else(|| Error::unknown_framing(name))?;
        Ok(ctor(output))
    }

    /// Registered framing names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ctors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FramingRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
