//! Candidacy windows and the applications submitted during them.

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use snafu::{ensure, OptionExt, ResultExt};

use crate::clubs;
use crate::error::*;
use crate::model::*;
use crate::store::*;

const ACTIVE_NOMINATION_EXISTS: &str = "This club already has an active nomination";

pub fn find_nomination(
    conn: &Connection,
    nomination_id: NominationId,
) -> ElectionResult<Option<Nomination>> {
    conn.query_row(
        &format!("SELECT {} FROM nominations WHERE id = ?1", NOMINATION_COLUMNS),
        [nomination_id],
        nomination_from_row,
    )
    .optional()
    .context(StorageSnafu {})
}

pub fn require_nomination(
    conn: &Connection,
    nomination_id: NominationId,
) -> ElectionResult<Nomination> {
    find_nomination(conn, nomination_id)?.context(NotFoundSnafu {
        entity: "nomination",
        id: nomination_id,
    })
}

/// The club's active nomination, if any. There is at most one.
pub fn find_active(conn: &Connection, club_id: ClubId) -> ElectionResult<Option<Nomination>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM nominations WHERE club_id = ?1 AND status = 'active'",
            NOMINATION_COLUMNS
        ),
        [club_id],
        nomination_from_row,
    )
    .optional()
    .context(StorageSnafu {})
}

/// The most recently created closed nomination of the club: the ballot a new
/// voting event will use.
pub fn latest_closed(conn: &Connection, club_id: ClubId) -> ElectionResult<Option<Nomination>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM nominations WHERE club_id = ?1 AND status = 'closed' \
             ORDER BY id DESC LIMIT 1",
            NOMINATION_COLUMNS
        ),
        [club_id],
        nomination_from_row,
    )
    .optional()
    .context(StorageSnafu {})
}

pub fn list_nominations(conn: &Connection, club_id: ClubId) -> ElectionResult<Vec<Nomination>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM nominations WHERE club_id = ?1 ORDER BY id",
            NOMINATION_COLUMNS
        ))
        .context(StorageSnafu {})?;
    let rows = stmt
        .query_map([club_id], nomination_from_row)
        .context(StorageSnafu {})?
        .collect::<rusqlite::Result<Vec<Nomination>>>()
        .context(StorageSnafu {})?;
    Ok(rows)
}

/// Creates a nomination in the draft or active state.
///
/// An active nomination is refused while the club already has one; the
/// partial unique index on `nominations(club_id)` backs the check up when
/// two writers race.
pub fn create(
    conn: &Connection,
    club_id: ClubId,
    title: &str,
    window: Window,
    status: NominationStatus,
    now: DateTime<Utc>,
) -> ElectionResult<Nomination> {
    clubs::require_club(conn, club_id)?;
    let title = title.trim();
    ensure!(
        !title.is_empty(),
        ValidationSnafu {
            reason: "The nomination title is required"
        }
    );
    ensure!(
        matches!(status, NominationStatus::Draft | NominationStatus::Active),
        ValidationSnafu {
            reason: format!("A nomination cannot be created as {}", status)
        }
    );
    if status == NominationStatus::Active {
        ensure!(
            find_active(conn, club_id)?.is_none(),
            ConflictSnafu {
                reason: ACTIVE_NOMINATION_EXISTS
            }
        );
    }

    conn.execute(
        "INSERT INTO nominations (club_id, title, start_date, end_date, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![club_id, title, window.start, window.end, status, now],
    )
    .map_err(|e| unique_or_storage(e, ACTIVE_NOMINATION_EXISTS))?;
    let id = conn.last_insert_rowid();
    info!("Created {} nomination {} for club {}", status, id, club_id);
    require_nomination(conn, id)
}

pub fn activate(conn: &Connection, nomination_id: NominationId) -> ElectionResult<Nomination> {
    let nomination = require_nomination(conn, nomination_id)?;
    ensure!(
        nomination.status == NominationStatus::Draft,
        ValidationSnafu {
            reason: format!(
                "Only draft nominations can be activated; this one is {}",
                nomination.status
            )
        }
    );
    ensure!(
        find_active(conn, nomination.club_id)?.is_none(),
        ConflictSnafu {
            reason: ACTIVE_NOMINATION_EXISTS
        }
    );
    set_status(conn, nomination_id, NominationStatus::Active)
        .map_err(|e| unique_or_storage(e, ACTIVE_NOMINATION_EXISTS))?;
    require_nomination(conn, nomination_id)
}

/// Ends the candidacy window. Closing twice is refused, so the transition
/// and its activity record happen exactly once.
pub fn close(conn: &Connection, nomination_id: NominationId) -> ElectionResult<Nomination> {
    let nomination = require_nomination(conn, nomination_id)?;
    ensure!(
        matches!(
            nomination.status,
            NominationStatus::Draft | NominationStatus::Active
        ),
        ConflictSnafu {
            reason: format!("This nomination is already {}", nomination.status)
        }
    );
    set_status(conn, nomination_id, NominationStatus::Closed).context(StorageSnafu {})?;
    require_nomination(conn, nomination_id)
}

pub fn archive(conn: &Connection, nomination_id: NominationId) -> ElectionResult<Nomination> {
    let nomination = require_nomination(conn, nomination_id)?;
    ensure!(
        nomination.status == NominationStatus::Closed,
        ValidationSnafu {
            reason: "Only closed nominations can be archived"
        }
    );
    set_status(conn, nomination_id, NominationStatus::Archived).context(StorageSnafu {})?;
    require_nomination(conn, nomination_id)
}

/// Deletes a nomination that never received an application.
pub fn delete(conn: &Connection, nomination_id: NominationId) -> ElectionResult<()> {
    require_nomination(conn, nomination_id)?;
    let applications: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM nomination_applications WHERE nomination_id = ?1",
            [nomination_id],
            |r| r.get(0),
        )
        .context(StorageSnafu {})?;
    ensure!(
        applications == 0,
        ConflictSnafu {
            reason: "This nomination has applications and cannot be deleted"
        }
    );
    let ballots: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM voting_events WHERE nomination_id = ?1",
            [nomination_id],
            |r| r.get(0),
        )
        .context(StorageSnafu {})?;
    ensure!(
        ballots == 0,
        ConflictSnafu {
            reason: "This nomination is the ballot of a voting event and cannot be deleted"
        }
    );
    conn.execute("DELETE FROM nominations WHERE id = ?1", [nomination_id])
        .context(StorageSnafu {})?;
    info!("Deleted nomination {}", nomination_id);
    Ok(())
}

fn set_status(
    conn: &Connection,
    nomination_id: NominationId,
    status: NominationStatus,
) -> rusqlite::Result<usize> {
    debug!("nomination {} -> {}", nomination_id, status);
    conn.execute(
        "UPDATE nominations SET status = ?1 WHERE id = ?2",
        params![status, nomination_id],
    )
}

// ******** Applications *********

pub fn find_application(
    conn: &Connection,
    application_id: ApplicationId,
) -> ElectionResult<Option<NominationApplication>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM nomination_applications WHERE id = ?1",
            APPLICATION_COLUMNS
        ),
        [application_id],
        application_from_row,
    )
    .optional()
    .context(StorageSnafu {})
}

pub fn require_application(
    conn: &Connection,
    application_id: ApplicationId,
) -> ElectionResult<NominationApplication> {
    find_application(conn, application_id)?.context(NotFoundSnafu {
        entity: "application",
        id: application_id,
    })
}

/// All applications of a nomination, earliest submission first.
pub fn list_applications(
    conn: &Connection,
    nomination_id: NominationId,
) -> ElectionResult<Vec<NominationApplication>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM nomination_applications WHERE nomination_id = ?1 \
             ORDER BY created_at, id",
            APPLICATION_COLUMNS
        ))
        .context(StorageSnafu {})?;
    let rows = stmt
        .query_map([nomination_id], application_from_row)
        .context(StorageSnafu {})?
        .collect::<rusqlite::Result<Vec<NominationApplication>>>()
        .context(StorageSnafu {})?;
    Ok(rows)
}

/// The approved applications, i.e. the candidates, earliest submission first.
pub fn list_candidates(
    conn: &Connection,
    nomination_id: NominationId,
) -> ElectionResult<Vec<NominationApplication>> {
    Ok(list_applications(conn, nomination_id)?
        .into_iter()
        .filter(|a| a.status == ApplicationStatus::Approved)
        .collect())
}

pub fn apply(
    conn: &Connection,
    nomination_id: NominationId,
    user_id: UserId,
    position_id: PositionId,
    now: DateTime<Utc>,
) -> ElectionResult<NominationApplication> {
    let nomination = require_nomination(conn, nomination_id)?;
    ensure!(
        nomination.status == NominationStatus::Active,
        ValidationSnafu {
            reason: "Applications are only accepted while the nomination is active"
        }
    );
    ensure!(
        nomination.window().contains(now),
        ValidationSnafu {
            reason: "Applications are only accepted during the nomination period"
        }
    );
    let position = clubs::find_position(conn, position_id)?.context(NotFoundSnafu {
        entity: "position",
        id: position_id,
    })?;
    ensure!(
        position.club_id == nomination.club_id,
        ValidationSnafu {
            reason: "This position belongs to another club"
        }
    );
    ensure!(
        position.is_active,
        ValidationSnafu {
            reason: format!("The position '{}' is not open for election", position.name)
        }
    );

    let duplicate = "You have already applied for this position";
    conn.execute(
        "INSERT INTO nomination_applications \
         (nomination_id, user_id, club_position_id, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            nomination_id,
            user_id,
            position_id,
            ApplicationStatus::Pending,
            now
        ],
    )
    .map_err(|e| unique_or_storage(e, duplicate))?;
    let id = conn.last_insert_rowid();
    info!(
        "User {} applied for position {} in nomination {} (application {})",
        user_id, position_id, nomination_id, id
    );
    require_application(conn, id)
}

/// Moves an application to approved or rejected.
///
/// Once a voting event that uses the nomination as its ballot has left the
/// draft state, the candidate list is frozen.
pub fn set_application_status(
    conn: &Connection,
    application_id: ApplicationId,
    status: ApplicationStatus,
) -> ElectionResult<NominationApplication> {
    let application = require_application(conn, application_id)?;
    if application.status == status {
        return Ok(application);
    }
    let nomination = require_nomination(conn, application.nomination_id)?;
    ensure!(
        nomination.status != NominationStatus::Archived,
        ValidationSnafu {
            reason: "Applications of an archived nomination cannot change"
        }
    );
    let locked: bool = conn
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM voting_events WHERE nomination_id = ?1 AND status != 'draft')",
            [nomination.id],
            |r| r.get(0),
        )
        .context(StorageSnafu {})?;
    ensure!(
        !locked,
        ConflictSnafu {
            reason: "The ballot is locked: voting has started for this nomination"
        }
    );
    conn.execute(
        "UPDATE nomination_applications SET status = ?1 WHERE id = ?2",
        params![status, application_id],
    )
    .context(StorageSnafu {})?;
    debug!("application {} -> {}", application_id, status);
    require_application(conn, application_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[test]
    fn one_active_nomination_per_club() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        f.elections
            .open_nomination(ADMIN, club.id, "Spring", f.window_days(0, 7))
            .unwrap();
        let err = f
            .elections
            .open_nomination(ADMIN, club.id, "Again", f.window_days(0, 7))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), ACTIVE_NOMINATION_EXISTS);
        assert_eq!(f.elections.nominations(club.id).unwrap().len(), 1);

        // Another club is not affected.
        let other = f.club_with(&["Captain"]);
        f.elections
            .open_nomination(ADMIN, other.id, "Spring", f.window_days(0, 7))
            .unwrap();
    }

    #[test]
    fn drafts_do_not_count_as_active() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        let d1 = f
            .elections
            .draft_nomination(ADMIN, club.id, "Draft 1", f.window_days(0, 7))
            .unwrap();
        let d2 = f
            .elections
            .draft_nomination(ADMIN, club.id, "Draft 2", f.window_days(0, 7))
            .unwrap();
        f.elections.activate_nomination(ADMIN, d1.id).unwrap();
        let err = f.elections.activate_nomination(ADMIN, d2.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            f.elections.nomination(d2.id).unwrap().status,
            NominationStatus::Draft
        );
    }

    #[test]
    fn bad_window_is_a_validation_error() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        let now = f.now();
        let err = Window::new(now, now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = f
            .elections
            .open_nomination(ADMIN, club.id, "  ", f.window_days(0, 1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn apply_checks_position_and_window() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        let other = f.club_with(&["Captain"]);
        let president = f.position(club.id, "President");
        let captain = f.position(other.id, "Captain");
        let nomination = f
            .elections
            .open_nomination(ADMIN, club.id, "Spring", f.window_days(0, 7))
            .unwrap();

        let err = f.elections.apply(nomination.id, 5, captain).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = f.elections.apply(nomination.id, 5, 999).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let app = f.elections.apply(nomination.id, 5, president).unwrap();
        assert_eq!(app.status, ApplicationStatus::Pending);
        let err = f.elections.apply(nomination.id, 5, president).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        f.clock.advance(chrono::Duration::days(8));
        let err = f.elections.apply(nomination.id, 6, president).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn only_approved_applications_are_candidates() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        let president = f.position(club.id, "President");
        let nomination = f
            .elections
            .open_nomination(ADMIN, club.id, "Spring", f.window_days(0, 7))
            .unwrap();
        let a = f.elections.apply(nomination.id, 1, president).unwrap();
        let b = f.elections.apply(nomination.id, 2, president).unwrap();
        let c = f.elections.apply(nomination.id, 3, president).unwrap();
        f.elections.approve_application(ADMIN, a.id).unwrap();
        f.elections.reject_application(ADMIN, b.id).unwrap();

        let candidates = f.elections.candidates(nomination.id).unwrap();
        assert_eq!(candidates.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a.id]);
        let all = f.elections.applications(nomination.id).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].id, c.id);
        assert_eq!(all[2].status, ApplicationStatus::Pending);
    }

    #[test]
    fn close_is_not_repeated() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        let nomination = f
            .elections
            .open_nomination(ADMIN, club.id, "Spring", f.window_days(0, 7))
            .unwrap();
        let closed = f.elections.close_nomination(ADMIN, nomination.id).unwrap();
        assert_eq!(closed.status, NominationStatus::Closed);
        let logged = f.activity.records().len();

        let err = f.elections.close_nomination(ADMIN, nomination.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(f.activity.records().len(), logged);

        f.elections.archive_nomination(ADMIN, nomination.id).unwrap();
        let err = f.elections.close_nomination(ADMIN, nomination.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn archive_requires_closed() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        let nomination = f
            .elections
            .open_nomination(ADMIN, club.id, "Spring", f.window_days(0, 7))
            .unwrap();
        let err = f.elections.archive_nomination(ADMIN, nomination.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn delete_with_applications_is_refused() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        let president = f.position(club.id, "President");
        let nomination = f
            .elections
            .open_nomination(ADMIN, club.id, "Spring", f.window_days(0, 7))
            .unwrap();
        f.elections.apply(nomination.id, 1, president).unwrap();

        let err = f.elections.delete_nomination(ADMIN, nomination.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(f.elections.nomination(nomination.id).is_ok());
        assert_eq!(f.elections.applications(nomination.id).unwrap().len(), 1);
    }

    #[test]
    fn delete_empty_nomination() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        let nomination = f
            .elections
            .draft_nomination(ADMIN, club.id, "Spring", f.window_days(0, 7))
            .unwrap();
        f.elections.delete_nomination(ADMIN, nomination.id).unwrap();
        let err = f.elections.nomination(nomination.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn ballot_is_locked_once_voting_starts() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        let president = f.position(club.id, "President");
        let ballot = f.closed_nomination(club.id, &[(1, president), (2, president)]);
        f.active_event(club.id);
        let err = f.elections.reject_application(ADMIN, ballot[0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        // Setting the current status again is harmless.
        f.elections.approve_application(ADMIN, ballot[0]).unwrap();
    }
}
