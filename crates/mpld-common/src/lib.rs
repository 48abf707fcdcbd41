//! Shared error type for the mpld log collector crates.

mod errors;

pub use errors::{Error, Result};
