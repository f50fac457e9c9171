//! Error types for albums-core
//!
//! Parse failures are hard errors by design: a malformed world id or a
//! world join with no matching room-name line aborts extraction instead
//! of being silently dropped.

use chrono::NaiveDateTime;
use thiserror::Error;

/// Errors that can occur while extracting events from log text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// World id did not match `wrld_[a-f0-9-]+`
    #[error("invalid world id: {0}")]
    InvalidWorldId(String),

    /// A `Joining wrld_…` line was never followed by a
    /// `Joining or Creating Room:` line
    #[error("world join at {0} has no matching room name line")]
    UnterminatedWorldJoin(NaiveDateTime),

    /// A line matched an event pattern but carried no usable payload
    #[error("malformed log line: {0}")]
    MalformedLine(String),
}

impl ParseError {
    /// Create a new InvalidWorldId error
    pub fn invalid_world_id(id: impl Into<String>) -> Self {
        Self::InvalidWorldId(id.into())
    }

    /// Create a new MalformedLine error
    pub fn malformed_line(line: impl Into<String>) -> Self {
        Self::MalformedLine(line.into())
    }
}
