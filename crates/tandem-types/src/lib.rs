//! Tandem Types - Pure type definitions for the message transport
//!
//! This crate contains only data types with no async runtime dependencies,
//! so UI glue and backends can share them without pulling in the core.

pub mod content;
pub mod envelope;
pub mod message;

pub use content::*;
pub use envelope::*;
pub use message::*;

/// Current time as epoch milliseconds, the unit used by content timestamps.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
