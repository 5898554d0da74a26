//! Clubs and the catalog of positions they elect members into.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use snafu::{ensure, OptionExt, ResultExt};

use crate::error::*;
use crate::model::*;
use crate::store::*;
use crate::{nominations, voting_events, winners};

pub fn find_club(conn: &Connection, club_id: ClubId) -> ElectionResult<Option<Club>> {
    conn.query_row(
        &format!("SELECT {} FROM clubs WHERE id = ?1", CLUB_COLUMNS),
        [club_id],
        club_from_row,
    )
    .optional()
    .context(StorageSnafu {})
}

pub fn require_club(conn: &Connection, club_id: ClubId) -> ElectionResult<Club> {
    find_club(conn, club_id)?.context(NotFoundSnafu {
        entity: "club",
        id: club_id,
    })
}

pub fn list_clubs(conn: &Connection) -> ElectionResult<Vec<Club>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {} FROM clubs ORDER BY id", CLUB_COLUMNS))
        .context(StorageSnafu {})?;
    let rows = stmt
        .query_map([], club_from_row)
        .context(StorageSnafu {})?
        .collect::<rusqlite::Result<Vec<Club>>>()
        .context(StorageSnafu {})?;
    Ok(rows)
}

pub fn create_club(conn: &Connection, club: &NewClub, now: DateTime<Utc>) -> ElectionResult<Club> {
    let name = club.name.trim();
    ensure!(
        !name.is_empty(),
        ValidationSnafu {
            reason: "The club name is required"
        }
    );
    ensure!(
        club.join_fee >= 0,
        ValidationSnafu {
            reason: "The join fee cannot be negative"
        }
    );
    validate_positions(&club.positions)?;

    conn.execute(
        "INSERT INTO clubs (name, status, join_fee, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![name, club.status, club.join_fee, now],
    )
    .context(StorageSnafu {})?;
    let club_id = conn.last_insert_rowid();
    insert_positions(conn, club_id, &club.positions)?;
    info!("Created club {} ({})", club_id, name);
    require_club(conn, club_id)
}

pub fn set_club_status(
    conn: &Connection,
    club_id: ClubId,
    status: ClubStatus,
) -> ElectionResult<Club> {
    require_club(conn, club_id)?;
    conn.execute(
        "UPDATE clubs SET status = ?1 WHERE id = ?2",
        params![status, club_id],
    )
    .context(StorageSnafu {})?;
    require_club(conn, club_id)
}

// ******** Positions *********

fn validate_positions(positions: &[NewPosition]) -> ElectionResult<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for p in positions.iter() {
        let name = p.name.trim();
        ensure!(
            !name.is_empty(),
            ValidationSnafu {
                reason: "Every position needs a name"
            }
        );
        ensure!(
            seen.insert(name),
            ValidationSnafu {
                reason: format!("The position '{}' is listed twice", name)
            }
        );
    }
    Ok(())
}

fn insert_positions(
    conn: &Connection,
    club_id: ClubId,
    positions: &[NewPosition],
) -> ElectionResult<()> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO club_positions (club_id, name, description, is_active) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .context(StorageSnafu {})?;
    for p in positions.iter() {
        let description = p
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        stmt.execute(params![club_id, p.name.trim(), description, p.is_active])
            .context(StorageSnafu {})?;
    }
    Ok(())
}

/// Replaces the whole position list of a club.
///
/// Existing rows are deleted and the new list inserted; positions are never
/// matched up by name. Manual assignments to removed positions are cleared
/// by the schema (`ON DELETE SET NULL`).
pub fn replace_positions(
    conn: &Connection,
    club_id: ClubId,
    positions: &[NewPosition],
) -> ElectionResult<Vec<ClubPosition>> {
    require_club(conn, club_id)?;
    validate_positions(positions)?;
    ensure!(
        nominations::find_active(conn, club_id)?.is_none(),
        ConflictSnafu {
            reason: "Positions cannot be changed while the club has an active nomination"
        }
    );
    ensure!(
        voting_events::find_open(conn, club_id, None)?.is_none(),
        ConflictSnafu {
            reason: "Positions cannot be changed while the club has an active or draft voting event"
        }
    );

    let removed = conn
        .execute("DELETE FROM club_positions WHERE club_id = ?1", [club_id])
        .context(StorageSnafu {})?;
    insert_positions(conn, club_id, positions)?;
    info!(
        "Replaced positions of club {}: {} removed, {} inserted",
        club_id,
        removed,
        positions.len()
    );
    list_positions(conn, club_id)
}

pub fn list_positions(conn: &Connection, club_id: ClubId) -> ElectionResult<Vec<ClubPosition>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM club_positions WHERE club_id = ?1 ORDER BY id",
            POSITION_COLUMNS
        ))
        .context(StorageSnafu {})?;
    let rows = stmt
        .query_map([club_id], position_from_row)
        .context(StorageSnafu {})?
        .collect::<rusqlite::Result<Vec<ClubPosition>>>()
        .context(StorageSnafu {})?;
    Ok(rows)
}

pub fn find_position(
    conn: &Connection,
    position_id: PositionId,
) -> ElectionResult<Option<ClubPosition>> {
    conn.query_row(
        &format!("SELECT {} FROM club_positions WHERE id = ?1", POSITION_COLUMNS),
        [position_id],
        position_from_row,
    )
    .optional()
    .context(StorageSnafu {})
}

/// Who sits in each active position of the club.
///
/// The winner of the latest closed voting event takes precedence; without an
/// election result the manual assignment on the membership roster is used.
pub fn current_holders(conn: &Connection, club_id: ClubId) -> ElectionResult<Vec<PositionHolder>> {
    require_club(conn, club_id)?;

    let latest_closed: Option<VotingEventId> = conn
        .query_row(
            "SELECT id FROM voting_events WHERE club_id = ?1 AND status = 'closed' \
             ORDER BY end_date DESC, id DESC LIMIT 1",
            [club_id],
            |r| r.get(0),
        )
        .optional()
        .context(StorageSnafu {})?;
    debug!(
        "current_holders: club {} latest closed event {:?}",
        club_id, latest_closed
    );

    let elected: HashMap<PositionId, UserId> = match latest_closed {
        Some(event_id) => winners::list_winners(conn, event_id)?
            .into_iter()
            .map(|w| (w.club_position_id, w.user_id))
            .collect(),
        None => HashMap::new(),
    };

    let mut manual_stmt = conn
        .prepare(
            "SELECT user_id FROM club_members WHERE club_id = ?1 AND club_position_id = ?2 \
             ORDER BY user_id LIMIT 1",
        )
        .context(StorageSnafu {})?;

    let mut res: Vec<PositionHolder> = Vec::new();
    for position in list_positions(conn, club_id)? {
        if !position.is_active {
            continue;
        }
        let holder = if let Some(user_id) = elected.get(&position.id) {
            PositionHolder {
                position,
                user_id: Some(*user_id),
                source: Some(HolderSource::Election),
            }
        } else {
            let manual: Option<UserId> = manual_stmt
                .query_row(params![club_id, position.id], |r| r.get(0))
                .optional()
                .context(StorageSnafu {})?;
            PositionHolder {
                position,
                user_id: manual,
                source: manual.map(|_| HolderSource::Manual),
            }
        };
        res.push(holder);
    }
    Ok(res)
}
