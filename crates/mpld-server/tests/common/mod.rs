//! Shared helpers for the collector integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use mpld_framing::{BoxedFramingSink, FramingRegistry};

/// An output target the test can inspect after (or during) a run.
#[derive(Clone, Default)]
pub struct CaptureOutput(Arc<Mutex<Vec<u8>>>);

impl CaptureOutput {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    pub fn string(&self) -> String {
        String::from_utf8(self.contents()).expect("captured output is not UTF-8")
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl Write for CaptureOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Builds a named framing sink writing into a capturable buffer.
pub fn sink_with_capture(framing: &str) -> (BoxedFramingSink, CaptureOutput) {
    let capture = CaptureOutput::default();
    let sink = FramingRegistry::with_builtins()
        .create(framing, Box::new(capture.clone()))
        .expect("builtin framing");
    (sink, capture)
}
