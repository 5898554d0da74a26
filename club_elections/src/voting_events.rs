//! The voting event state machine: draft -> active -> closed -> archived.
//!
//! A club has at most one event in draft or active state, and no event may
//! be opened or edited while the club's nomination is still running.
//! Closing an event is the single point where winners are computed.

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use snafu::{ensure, OptionExt, ResultExt};

use crate::clubs;
use crate::config::ElectionRules;
use crate::error::*;
use crate::model::*;
use crate::nominations;
use crate::store::*;
use crate::winners;

const OPEN_EVENT_EXISTS: &str = "This club already has an active or draft voting event";
const NOMINATION_RUNNING: &str =
    "This club has an active nomination; close it before opening a voting event";

pub fn find_event(
    conn: &Connection,
    event_id: VotingEventId,
) -> ElectionResult<Option<VotingEvent>> {
    conn.query_row(
        &format!("SELECT {} FROM voting_events WHERE id = ?1", EVENT_COLUMNS),
        [event_id],
        event_from_row,
    )
    .optional()
    .context(StorageSnafu {})
}

pub fn require_event(conn: &Connection, event_id: VotingEventId) -> ElectionResult<VotingEvent> {
    find_event(conn, event_id)?.context(NotFoundSnafu {
        entity: "voting event",
        id: event_id,
    })
}

pub fn list_events(conn: &Connection, club_id: ClubId) -> ElectionResult<Vec<VotingEvent>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM voting_events WHERE club_id = ?1 ORDER BY id",
            EVENT_COLUMNS
        ))
        .context(StorageSnafu {})?;
    let rows = stmt
        .query_map([club_id], event_from_row)
        .context(StorageSnafu {})?
        .collect::<rusqlite::Result<Vec<VotingEvent>>>()
        .context(StorageSnafu {})?;
    Ok(rows)
}

/// The club's draft or active event, ignoring `exclude`.
pub fn find_open(
    conn: &Connection,
    club_id: ClubId,
    exclude: Option<VotingEventId>,
) -> ElectionResult<Option<VotingEvent>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM voting_events \
             WHERE club_id = ?1 AND status IN ('active', 'draft') AND id != ?2",
            EVENT_COLUMNS
        ),
        params![club_id, exclude.unwrap_or(-1)],
        event_from_row,
    )
    .optional()
    .context(StorageSnafu {})
}

fn ensure_club_free(
    conn: &Connection,
    club_id: ClubId,
    exclude: Option<VotingEventId>,
) -> ElectionResult<()> {
    ensure!(
        nominations::find_active(conn, club_id)?.is_none(),
        ConflictSnafu {
            reason: NOMINATION_RUNNING
        }
    );
    ensure!(
        find_open(conn, club_id, exclude)?.is_none(),
        ConflictSnafu {
            reason: OPEN_EVENT_EXISTS
        }
    );
    Ok(())
}

fn ballot_for(conn: &Connection, club_id: ClubId) -> ElectionResult<Option<NominationId>> {
    Ok(nominations::latest_closed(conn, club_id)?.map(|n| n.id))
}

pub fn create(
    conn: &Connection,
    club_id: ClubId,
    title: &str,
    window: Window,
    status: EventStatus,
    now: DateTime<Utc>,
) -> ElectionResult<VotingEvent> {
    clubs::require_club(conn, club_id)?;
    let title = title.trim();
    ensure!(
        !title.is_empty(),
        ValidationSnafu {
            reason: "The voting event title is required"
        }
    );
    ensure!(
        status.is_open(),
        ValidationSnafu {
            reason: format!("A voting event cannot be created as {}", status)
        }
    );
    ensure_club_free(conn, club_id, None)?;
    let ballot = ballot_for(conn, club_id)?;
    debug!("create: club {} ballot nomination {:?}", club_id, ballot);

    conn.execute(
        "INSERT INTO voting_events \
         (club_id, nomination_id, title, start_date, end_date, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![club_id, ballot, title, window.start, window.end, status, now],
    )
    .map_err(|e| unique_or_storage(e, OPEN_EVENT_EXISTS))?;
    let id = conn.last_insert_rowid();
    info!("Created {} voting event {} for club {}", status, id, club_id);
    require_event(conn, id)
}

/// Edits a draft or active event. Moving it to another club re-validates
/// that club's exclusivity, ignoring the event's own row. A draft, or an
/// event moving to another club, re-captures its ballot.
pub fn update(
    conn: &Connection,
    event_id: VotingEventId,
    changes: &VotingEventUpdate,
) -> ElectionResult<VotingEvent> {
    let event = require_event(conn, event_id)?;
    ensure!(
        event.status.is_open(),
        ValidationSnafu {
            reason: "Only draft or active voting events can be edited"
        }
    );

    let title = match &changes.title {
        Some(t) => {
            let t = t.trim();
            ensure!(
                !t.is_empty(),
                ValidationSnafu {
                    reason: "The voting event title is required"
                }
            );
            t.to_string()
        }
        None => event.title.clone(),
    };
    let window = changes.window.unwrap_or_else(|| event.window());

    let club_id = changes.club_id.unwrap_or(event.club_id);
    let mut ballot = event.nomination_id;
    if club_id != event.club_id {
        clubs::require_club(conn, club_id)?;
        let votes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM votes WHERE voting_event_id = ?1",
                [event_id],
                |r| r.get(0),
            )
            .context(StorageSnafu {})?;
        ensure!(
            votes == 0,
            ConflictSnafu {
                reason: "Votes have already been cast; the voting event cannot move to another club"
            }
        );
    }
    if club_id != event.club_id || event.status == EventStatus::Draft {
        ballot = ballot_for(conn, club_id)?;
    }
    ensure_club_free(conn, club_id, Some(event_id))?;

    conn.execute(
        "UPDATE voting_events SET club_id = ?1, nomination_id = ?2, title = ?3, \
         start_date = ?4, end_date = ?5 WHERE id = ?6",
        params![club_id, ballot, title, window.start, window.end, event_id],
    )
    .map_err(|e| unique_or_storage(e, OPEN_EVENT_EXISTS))?;
    info!("Updated voting event {} (club {})", event_id, club_id);
    require_event(conn, event_id)
}

pub fn activate(conn: &Connection, event_id: VotingEventId) -> ElectionResult<VotingEvent> {
    let event = require_event(conn, event_id)?;
    ensure!(
        event.status == EventStatus::Draft,
        ValidationSnafu {
            reason: format!(
                "Only draft voting events can be activated; this one is {}",
                event.status
            )
        }
    );
    ensure!(
        nominations::find_active(conn, event.club_id)?.is_none(),
        ConflictSnafu {
            reason: NOMINATION_RUNNING
        }
    );
    // The ballot is final from here on.
    let ballot = ballot_for(conn, event.club_id)?;
    debug!("activate: voting event {} ballot nomination {:?}", event_id, ballot);
    conn.execute(
        "UPDATE voting_events SET status = ?1, nomination_id = ?2 WHERE id = ?3",
        params![EventStatus::Active, ballot, event_id],
    )
    .map_err(|e| unique_or_storage(e, OPEN_EVENT_EXISTS))?;
    require_event(conn, event_id)
}

/// Closes an active event and persists its winners in the same transaction.
///
/// A second close is refused: winners are computed once per event, an
/// explicit recomputation goes through `winners::recompute`.
pub fn close(
    conn: &Connection,
    event_id: VotingEventId,
    rules: &ElectionRules,
    now: DateTime<Utc>,
) -> ElectionResult<(VotingEvent, Vec<NominationWinner>)> {
    let event = require_event(conn, event_id)?;
    match event.status {
        EventStatus::Active => {}
        EventStatus::Draft => {
            return ValidationSnafu {
                reason: "A draft voting event cannot be closed; activate it first",
            }
            .fail();
        }
        EventStatus::Closed | EventStatus::Archived => {
            return ConflictSnafu {
                reason: format!("This voting event is already {}", event.status),
            }
            .fail();
        }
    }
    set_status(conn, event_id, EventStatus::Closed)?;
    let event = require_event(conn, event_id)?;
    let winners = winners::resolve_all(conn, &event, rules, now)?;
    info!(
        "Closed voting event {} with {} winning position(s)",
        event_id,
        winners.len()
    );
    Ok((event, winners))
}

pub fn archive(conn: &Connection, event_id: VotingEventId) -> ElectionResult<VotingEvent> {
    let event = require_event(conn, event_id)?;
    ensure!(
        event.status == EventStatus::Closed,
        ValidationSnafu {
            reason: "Only closed voting events can be archived"
        }
    );
    set_status(conn, event_id, EventStatus::Archived)?;
    require_event(conn, event_id)
}

/// Removes an event that never opened.
pub fn delete(conn: &Connection, event_id: VotingEventId) -> ElectionResult<()> {
    let event = require_event(conn, event_id)?;
    ensure!(
        event.status == EventStatus::Draft,
        ConflictSnafu {
            reason: format!("A {} voting event cannot be deleted", event.status)
        }
    );
    conn.execute("DELETE FROM voting_events WHERE id = ?1", [event_id])
        .context(StorageSnafu {})?;
    info!("Deleted voting event {}", event_id);
    Ok(())
}

fn set_status(
    conn: &Connection,
    event_id: VotingEventId,
    status: EventStatus,
) -> ElectionResult<()> {
    debug!("voting event {} -> {}", event_id, status);
    conn.execute(
        "UPDATE voting_events SET status = ?1 WHERE id = ?2",
        params![status, event_id],
    )
    .map_err(|e| unique_or_storage(e, OPEN_EVENT_EXISTS))?;
    Ok(())
}
