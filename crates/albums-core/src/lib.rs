//! # Albums Core
//!
//! Shared domain types for the vrchat-albums log engine.
//!
//! This crate defines the event model extracted from the client log
//! (world joins, player joins/leaves), the month-bucket partition key
//! used by the log store, and the bidirectional line extractor that
//! turns raw log text into structured events and back.
//!
//! The extractor is exact and symmetric: for every persisted event kind,
//! `parse(format(event)) == event`.

pub mod error;
pub mod event;
pub mod extract;
pub mod time;

// Re-exports
pub use error::ParseError;
pub use event::{
    LogEvent, LogLine, PlayerJoinEvent, PlayerLeaveEvent, WorldId, WorldJoinEvent,
};
pub use extract::{Extraction, format_event, parse_lines};
pub use time::MonthKey;
