//! Embedded SQLite storage for the election core.
//!
//! Every invariant that must survive concurrent writers is declared in the
//! schema as well as checked by the operations: partial unique indexes keep
//! one active nomination and one open voting event per club, and votes carry
//! their position so that "one vote per voter per position" is a plain
//! UNIQUE constraint.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info};
use rusqlite::{Connection, OpenFlags, Row, TransactionBehavior};
use snafu::ResultExt;

use crate::error::{ElectionResult, StorageSnafu};
use crate::model::*;

pub const SCHEMA_VERSION: i64 = 1;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS clubs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('active', 'inactive', 'pending')),
    join_fee INTEGER NOT NULL CHECK (join_fee >= 0),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS club_positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    club_id INTEGER NOT NULL REFERENCES clubs(id) ON DELETE CASCADE,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    UNIQUE (club_id, name)
);

CREATE TABLE IF NOT EXISTS club_members (
    club_id INTEGER NOT NULL REFERENCES clubs(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'active', 'inactive', 'banned')),
    club_position_id INTEGER REFERENCES club_positions(id) ON DELETE SET NULL,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (club_id, user_id)
);

CREATE TABLE IF NOT EXISTS nominations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    club_id INTEGER NOT NULL REFERENCES clubs(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('draft', 'active', 'closed', 'archived')),
    created_at TEXT NOT NULL,
    CHECK (end_date > start_date)
);

CREATE UNIQUE INDEX IF NOT EXISTS nominations_one_active_per_club
    ON nominations(club_id) WHERE status = 'active';

-- Position references in historical tables are plain integers: positions are
-- replaced wholesale and past applications, votes and winners keep the ids
-- they were recorded with.
CREATE TABLE IF NOT EXISTS nomination_applications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    nomination_id INTEGER NOT NULL REFERENCES nominations(id),
    user_id INTEGER NOT NULL,
    club_position_id INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'rejected')),
    created_at TEXT NOT NULL,
    UNIQUE (nomination_id, user_id, club_position_id)
);

CREATE TABLE IF NOT EXISTS voting_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    club_id INTEGER NOT NULL REFERENCES clubs(id) ON DELETE CASCADE,
    nomination_id INTEGER REFERENCES nominations(id),
    title TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('draft', 'active', 'closed', 'archived')),
    created_at TEXT NOT NULL,
    CHECK (end_date > start_date)
);

CREATE UNIQUE INDEX IF NOT EXISTS voting_events_one_open_per_club
    ON voting_events(club_id) WHERE status IN ('active', 'draft');

CREATE TABLE IF NOT EXISTS votes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    voting_event_id INTEGER NOT NULL REFERENCES voting_events(id) ON DELETE CASCADE,
    nomination_application_id INTEGER NOT NULL REFERENCES nomination_applications(id),
    club_position_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (voting_event_id, user_id, club_position_id)
);

CREATE INDEX IF NOT EXISTS votes_by_event_position
    ON votes(voting_event_id, club_position_id);

CREATE TABLE IF NOT EXISTS nomination_winners (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    voting_event_id INTEGER NOT NULL REFERENCES voting_events(id) ON DELETE CASCADE,
    nomination_id INTEGER NOT NULL REFERENCES nominations(id),
    club_position_id INTEGER NOT NULL,
    nomination_application_id INTEGER NOT NULL REFERENCES nomination_applications(id),
    user_id INTEGER NOT NULL,
    votes_count INTEGER NOT NULL,
    is_tie_resolved INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (voting_event_id, club_position_id)
);
";

/// A handle on the election database.
///
/// The connection sits behind a mutex so one store can be shared between
/// request threads; separate stores on the same file are serialized by
/// SQLite's write lock, taken at the start of every write transaction.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens or creates a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> ElectionResult<Store> {
        Store::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> ElectionResult<Store> {
        let path = path.as_ref();
        info!("Opening election store at {:?}", path);
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context(StorageSnafu {})?;
        conn.busy_timeout(busy_timeout).context(StorageSnafu {})?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context(StorageSnafu {})?;
        Store::initialize(conn)
    }

    /// A private database that disappears with the store. Used by tests.
    pub fn in_memory() -> ElectionResult<Store> {
        let conn = Connection::open_in_memory().context(StorageSnafu {})?;
        Store::initialize(conn)
    }

    fn initialize(conn: Connection) -> ElectionResult<Store> {
        conn.execute_batch(SCHEMA).context(StorageSnafu {})?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .context(StorageSnafu {})?;
        debug!("Election schema version {} ready", SCHEMA_VERSION);
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` inside one IMMEDIATE transaction. The transaction commits
    /// only when `f` succeeds; any error rolls every statement back.
    pub fn write<T, F>(&self, f: F) -> ElectionResult<T>
    where
        F: FnOnce(&Connection) -> ElectionResult<T>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context(StorageSnafu {})?;
        let res = f(&tx)?;
        tx.commit().context(StorageSnafu {})?;
        Ok(res)
    }

    /// Runs `f` inside a read transaction, so multi-query reads see one
    /// consistent snapshot.
    pub fn read<T, F>(&self, f: F) -> ElectionResult<T>
    where
        F: FnOnce(&Connection) -> ElectionResult<T>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .context(StorageSnafu {})?;
        let res = f(&tx)?;
        tx.finish().context(StorageSnafu {})?;
        Ok(res)
    }
}

// ******** Row mapping *********

pub(crate) const CLUB_COLUMNS: &str = "id, name, status, join_fee, created_at";

pub(crate) fn club_from_row(row: &Row<'_>) -> rusqlite::Result<Club> {
    Ok(Club {
        id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        join_fee: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) const POSITION_COLUMNS: &str = "id, club_id, name, description, is_active";

pub(crate) fn position_from_row(row: &Row<'_>) -> rusqlite::Result<ClubPosition> {
    Ok(ClubPosition {
        id: row.get(0)?,
        club_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get(4)?,
    })
}

pub(crate) const MEMBER_COLUMNS: &str = "club_id, user_id, status, club_position_id, joined_at";

pub(crate) fn member_from_row(row: &Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        club_id: row.get(0)?,
        user_id: row.get(1)?,
        status: row.get(2)?,
        club_position_id: row.get(3)?,
        joined_at: row.get(4)?,
    })
}

pub(crate) const NOMINATION_COLUMNS: &str =
    "id, club_id, title, start_date, end_date, status, created_at";

pub(crate) fn nomination_from_row(row: &Row<'_>) -> rusqlite::Result<Nomination> {
    Ok(Nomination {
        id: row.get(0)?,
        club_id: row.get(1)?,
        title: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub(crate) const APPLICATION_COLUMNS: &str =
    "id, nomination_id, user_id, club_position_id, status, created_at";

pub(crate) fn application_from_row(row: &Row<'_>) -> rusqlite::Result<NominationApplication> {
    Ok(NominationApplication {
        id: row.get(0)?,
        nomination_id: row.get(1)?,
        user_id: row.get(2)?,
        club_position_id: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub(crate) const EVENT_COLUMNS: &str =
    "id, club_id, nomination_id, title, start_date, end_date, status, created_at";

pub(crate) fn event_from_row(row: &Row<'_>) -> rusqlite::Result<VotingEvent> {
    Ok(VotingEvent {
        id: row.get(0)?,
        club_id: row.get(1)?,
        nomination_id: row.get(2)?,
        title: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub(crate) const VOTE_COLUMNS: &str =
    "id, voting_event_id, nomination_application_id, club_position_id, user_id, created_at";

pub(crate) fn vote_from_row(row: &Row<'_>) -> rusqlite::Result<Vote> {
    Ok(Vote {
        id: row.get(0)?,
        voting_event_id: row.get(1)?,
        nomination_application_id: row.get(2)?,
        club_position_id: row.get(3)?,
        user_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub(crate) const WINNER_COLUMNS: &str = "id, voting_event_id, nomination_id, club_position_id, \
     nomination_application_id, user_id, votes_count, is_tie_resolved, created_at";

pub(crate) fn winner_from_row(row: &Row<'_>) -> rusqlite::Result<NominationWinner> {
    let votes_count: i64 = row.get(6)?;
    Ok(NominationWinner {
        id: row.get(0)?,
        voting_event_id: row.get(1)?,
        nomination_id: row.get(2)?,
        club_position_id: row.get(3)?,
        nomination_application_id: row.get(4)?,
        user_id: row.get(5)?,
        votes_count: votes_count.max(0) as u64,
        is_tie_resolved: row.get(7)?,
        created_at: row.get(8)?,
    })
}
