//! The mpld supervisor engine.
//!
//! A [`Collector`](collector::Collector) binds the two listening endpoints,
//! spawns the configured subcommand as a session leader with its stdio wired
//! to stream-device connections, multiplexes everything the process tree
//! emits into a single framing sink, and propagates the child's exit status.

pub mod collector;
pub mod config;
pub mod dgram;
pub mod stream;

mod signals;
mod supervisor;

use std::sync::Arc;

use mpld_framing::BoxedFramingSink;
use parking_lot::Mutex;

pub use collector::{Collector, StartHook};
pub use config::CollectorConfig;

/// The output lock shared by every ingest path.
///
/// Each `on_message` call writes its framed bytes while holding this mutex,
/// so whole records never interleave.
pub type SharedSink = Arc<Mutex<BoxedFramingSink>>;
