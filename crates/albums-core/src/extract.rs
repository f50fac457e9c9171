//! Log event extraction and its inverse
//!
//! `parse_lines` turns raw log lines into structured [`LogEvent`]s;
//! `format_event` renders an event back into the exact line(s) it was
//! parsed from. The two are symmetric: `parse(format(e)) == e` for every
//! persisted event kind.
//!
//! A world join spans two lines: `Joining <id>:<instance>` opens a
//! pending join and the first subsequent `Joining or Creating Room:`
//! line closes it with the world name. A pending join that never sees
//! its room line is a hard parse error.

use chrono::NaiveDateTime;

use crate::error::ParseError;
use crate::event::{
    LogEvent, LogLine, PlayerJoinEvent, PlayerLeaveEvent, TIMESTAMP_FORMAT, WorldId,
    WorldJoinEvent,
};

const ROOM_NAME_PREFIX: &str = "Joining or Creating Room: ";
const WORLD_JOIN_PREFIX: &str = "Joining ";
const PLAYER_JOIN_LIVE_PREFIX: &str = "OnPlayerJoinComplete ";
const PLAYER_JOIN_PREFIX: &str = "OnPlayerJoined ";
const PLAYER_LEAVE_PREFIX: &str = "OnPlayerLeft ";
const WORLD_LEAVE_MARKER: &str = "OnLeftRoom";

/// Result of extracting events from a batch of lines
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Structured events, in line order
    pub events: Vec<LogEvent>,
    /// Lines without a timestamp or behaviour message
    pub skipped_lines: usize,
}

/// A world join whose room-name line has not arrived yet
struct PendingJoin {
    joined_at: NaiveDateTime,
    world_id: WorldId,
    instance_id: String,
}

/// Extract structured events from raw log lines.
///
/// Lines that are not well-formed log lines are counted and skipped;
/// well-formed lines whose message matches no known pattern are ignored.
/// Malformed world ids and unterminated world joins are hard errors.
pub fn parse_lines(lines: &[LogLine]) -> Result<Extraction, ParseError> {
    let mut extraction = Extraction::default();
    let mut pending: Option<PendingJoin> = None;

    for line in lines {
        let (Some(at), Some(message)) = (line.timestamp(), line.message()) else {
            extraction.skipped_lines += 1;
            continue;
        };

        if let Some(name) = message.strip_prefix(ROOM_NAME_PREFIX) {
            if let Some(open) = pending.take() {
                extraction.events.push(LogEvent::WorldJoin(WorldJoinEvent {
                    joined_at: open.joined_at,
                    world_id: open.world_id,
                    instance_id: open.instance_id,
                    world_name: name.to_string(),
                }));
            }
            continue;
        }

        if let Some(target) = message.strip_prefix(WORLD_JOIN_PREFIX) {
            if !target.starts_with("wrld_") {
                continue;
            }
            if let Some(open) = pending.take() {
                return Err(ParseError::UnterminatedWorldJoin(open.joined_at));
            }
            let (id, instance) = target
                .split_once(':')
                .ok_or_else(|| ParseError::malformed_line(line.as_str()))?;
            pending = Some(PendingJoin {
                joined_at: at,
                world_id: WorldId::parse(id)?,
                instance_id: instance.to_string(),
            });
            continue;
        }

        if let Some(name) = message.strip_prefix(PLAYER_JOIN_LIVE_PREFIX) {
            let name = require_name(name, line)?;
            extraction.events.push(LogEvent::PlayerJoin(PlayerJoinEvent {
                joined_at: at,
                player_name: name,
                player_id: None,
            }));
            continue;
        }

        if let Some(rest) = message.strip_prefix(PLAYER_JOIN_PREFIX) {
            let (name, id) = split_player(rest);
            let name = require_name(&name, line)?;
            extraction.events.push(LogEvent::PlayerJoin(PlayerJoinEvent {
                joined_at: at,
                player_name: name,
                player_id: id,
            }));
            continue;
        }

        if let Some(rest) = message.strip_prefix(PLAYER_LEAVE_PREFIX) {
            let (name, id) = split_player(rest);
            let name = require_name(&name, line)?;
            extraction.events.push(LogEvent::PlayerLeave(PlayerLeaveEvent {
                left_at: at,
                player_name: name,
                player_id: id,
            }));
            continue;
        }

        if message.starts_with(WORLD_LEAVE_MARKER) {
            extraction.events.push(LogEvent::WorldLeave { left_at: at });
        }
    }

    if let Some(open) = pending {
        return Err(ParseError::UnterminatedWorldJoin(open.joined_at));
    }

    Ok(extraction)
}

/// Render an event back into raw log line(s).
///
/// World joins produce two lines; everything else produces one.
pub fn format_event(event: &LogEvent) -> Vec<LogLine> {
    match event {
        LogEvent::WorldJoin(e) => vec![
            format_line(
                e.joined_at,
                &format!("{WORLD_JOIN_PREFIX}{}:{}", e.world_id, e.instance_id),
            ),
            format_line(e.joined_at, &format!("{ROOM_NAME_PREFIX}{}", e.world_name)),
        ],
        LogEvent::PlayerJoin(e) => vec![format_line(
            e.joined_at,
            &player_message(PLAYER_JOIN_PREFIX, &e.player_name, e.player_id.as_deref()),
        )],
        LogEvent::PlayerLeave(e) => vec![format_line(
            e.left_at,
            &player_message(PLAYER_LEAVE_PREFIX, &e.player_name, e.player_id.as_deref()),
        )],
        LogEvent::WorldLeave { left_at } => vec![format_line(*left_at, WORLD_LEAVE_MARKER)],
    }
}

fn format_line(at: NaiveDateTime, message: &str) -> LogLine {
    LogLine::new(format!(
        "{} Log        -  [Behaviour] {message}",
        at.format(TIMESTAMP_FORMAT)
    ))
}

fn player_message(prefix: &str, name: &str, id: Option<&str>) -> String {
    match id {
        Some(id) => format!("{prefix}{name} ({id})"),
        None => format!("{prefix}{name}"),
    }
}

/// Split `<name>[ (<usr_id>)]` into name and optional id.
///
/// Only `usr_`-prefixed tokens count as ids: the suffix grammar is
/// ambiguous for display names that themselves end in a parenthesized
/// token (`"Mr (VR)"`), so anything else stays part of the name.
fn split_player(rest: &str) -> (String, Option<String>) {
    if rest.ends_with(')')
        && let Some(idx) = rest.rfind(" (")
    {
        let id = &rest[idx + 2..rest.len() - 1];
        if id.strip_prefix("usr_").is_some_and(|tail| !tail.is_empty()) {
            return (rest[..idx].to_string(), Some(id.to_string()));
        }
    }
    (rest.to_string(), None)
}

fn require_name(name: &str, line: &LogLine) -> Result<String, ParseError> {
    if name.trim().is_empty() {
        return Err(ParseError::malformed_line(line.as_str()));
    }
    Ok(name.to_string())
}
