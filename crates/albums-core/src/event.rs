//! Event model for the client log
//!
//! Three event kinds are persisted: world joins, player joins, and
//! player leaves. World leaves exist only as raw-text markers and are
//! never written to the database.

use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::time::MonthKey;

/// Timestamp layout used by every log line: `2023.10.08 15:30:45`
pub const TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

/// Length of the timestamp prefix in a raw line
const TIMESTAMP_LEN: usize = 19;

/// Marker separating the line header from the event message
const BEHAVIOUR_TAG: &str = "[Behaviour] ";

static WORLD_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^wrld_[a-f0-9-]+$").expect("world id regex"));

/// Validated world identifier (`wrld_<uuid>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorldId(String);

impl WorldId {
    /// Validate and wrap a raw world id.
    ///
    /// Malformed ids are a hard parse error, never silently dropped.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        if WORLD_ID_RE.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ParseError::invalid_world_id(raw))
        }
    }

    /// The raw id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A completed world join: `Joining <id>:<instance>` plus its room name line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldJoinEvent {
    /// When the join started
    pub joined_at: NaiveDateTime,
    /// Validated world id
    pub world_id: WorldId,
    /// Instance portion after the `:` (opaque, may carry access tags)
    pub instance_id: String,
    /// Human-readable world name from the room line
    pub world_name: String,
}

/// A player joining the current instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerJoinEvent {
    /// When the player joined
    pub joined_at: NaiveDateTime,
    /// Display name
    pub player_name: String,
    /// `usr_…` id, absent in the live-log form
    pub player_id: Option<String>,
}

/// A player leaving the current instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLeaveEvent {
    /// When the player left
    pub left_at: NaiveDateTime,
    /// Display name
    pub player_name: String,
    /// `usr_…` id, absent in the live-log form
    pub player_id: Option<String>,
}

/// Any event extracted from the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEvent {
    /// Completed world join
    WorldJoin(WorldJoinEvent),
    /// Player join
    PlayerJoin(PlayerJoinEvent),
    /// Player leave
    PlayerLeave(PlayerLeaveEvent),
    /// World leave marker — raw text only, never persisted
    WorldLeave {
        /// When the instance was left
        left_at: NaiveDateTime,
    },
}

impl LogEvent {
    /// The event's embedded timestamp
    pub fn timestamp(&self) -> NaiveDateTime {
        match self {
            Self::WorldJoin(e) => e.joined_at,
            Self::PlayerJoin(e) => e.joined_at,
            Self::PlayerLeave(e) => e.left_at,
            Self::WorldLeave { left_at } => *left_at,
        }
    }

    /// Month bucket of the event
    pub fn month(&self) -> MonthKey {
        MonthKey::of(self.timestamp())
    }
}

/// A single raw log line, immutable once read
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogLine {
    raw: String,
}

impl LogLine {
    /// Wrap a raw line
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The raw text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Consume the line, returning the raw text
    pub fn into_string(self) -> String {
        self.raw
    }

    /// Timestamp embedded at the start of the line, if well-formed
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        let prefix = self.raw.get(..TIMESTAMP_LEN)?;
        NaiveDateTime::parse_from_str(prefix, TIMESTAMP_FORMAT).ok()
    }

    /// Month bucket of the embedded timestamp
    pub fn month(&self) -> Option<MonthKey> {
        self.timestamp().map(MonthKey::of)
    }

    /// The event message after the `[Behaviour]` tag, if present
    pub fn message(&self) -> Option<&str> {
        let idx = self.raw.find(BEHAVIOUR_TAG)?;
        Some(&self.raw[idx + BEHAVIOUR_TAG.len()..])
    }

    /// Whether the line has both a timestamp and a behaviour message
    pub fn is_well_formed(&self) -> bool {
        self.timestamp().is_some() && self.message().is_some()
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_id_validation() {
        assert!(WorldId::parse("wrld_6caf5200-70e1-46c2-b043-e3c4abe69e40").is_ok());
        assert!(WorldId::parse("wrld_abc").is_ok());
        assert!(WorldId::parse("wrld_ABC").is_err());
        assert!(WorldId::parse("world_abc").is_err());
        assert!(WorldId::parse("wrld_").is_err());
    }

    #[test]
    fn line_timestamp_and_message() {
        let line = LogLine::new("2023.10.08 15:30:45 Log        -  [Behaviour] OnLeftRoom");
        assert_eq!(
            line.timestamp().unwrap().to_string(),
            "2023-10-08 15:30:45"
        );
        assert_eq!(line.message(), Some("OnLeftRoom"));
        assert_eq!(line.month().unwrap().to_string(), "2023-10");
        assert!(line.is_well_formed());
    }

    #[test]
    fn malformed_line_yields_nothing() {
        let line = LogLine::new("not a log line");
        assert_eq!(line.timestamp(), None);
        assert_eq!(line.message(), None);
        assert!(!line.is_well_formed());
    }
}
