//! The club roster. Only active members may vote.

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use snafu::{ensure, OptionExt, ResultExt};

use crate::clubs;
use crate::error::*;
use crate::model::*;
use crate::store::*;

pub fn find_member(
    conn: &Connection,
    club_id: ClubId,
    user_id: UserId,
) -> ElectionResult<Option<Membership>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM club_members WHERE club_id = ?1 AND user_id = ?2",
            MEMBER_COLUMNS
        ),
        params![club_id, user_id],
        member_from_row,
    )
    .optional()
    .context(StorageSnafu {})
}

pub fn status_of(
    conn: &Connection,
    club_id: ClubId,
    user_id: UserId,
) -> ElectionResult<MembershipStatus> {
    Ok(find_member(conn, club_id, user_id)?
        .map(|m| m.status)
        .unwrap_or(MembershipStatus::None))
}

pub fn list_members(conn: &Connection, club_id: ClubId) -> ElectionResult<Vec<Membership>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM club_members WHERE club_id = ?1 ORDER BY user_id",
            MEMBER_COLUMNS
        ))
        .context(StorageSnafu {})?;
    let rows = stmt
        .query_map([club_id], member_from_row)
        .context(StorageSnafu {})?
        .collect::<rusqlite::Result<Vec<Membership>>>()
        .context(StorageSnafu {})?;
    Ok(rows)
}

/// A membership request. It starts pending until an administrator acts.
pub fn join(
    conn: &Connection,
    club_id: ClubId,
    user_id: UserId,
    now: DateTime<Utc>,
) -> ElectionResult<Membership> {
    let club = clubs::require_club(conn, club_id)?;
    ensure!(
        club.status == ClubStatus::Active,
        ValidationSnafu {
            reason: format!("The club '{}' is not accepting members", club.name)
        }
    );
    let already = "You are already on this club's roster";
    conn.execute(
        "INSERT INTO club_members (club_id, user_id, status, joined_at) VALUES (?1, ?2, ?3, ?4)",
        params![club_id, user_id, MembershipStatus::Pending, now],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            ElectionError::Conflict {
                reason: already.to_string(),
            }
        }
        e => unique_or_storage(e, already),
    })?;
    info!("User {} asked to join club {}", user_id, club_id);
    require_member(conn, club_id, user_id)
}

/// Sets the status, creating the roster entry when the user is not on it.
pub fn set_status(
    conn: &Connection,
    club_id: ClubId,
    user_id: UserId,
    status: MembershipStatus,
    now: DateTime<Utc>,
) -> ElectionResult<Membership> {
    clubs::require_club(conn, club_id)?;
    ensure!(
        status != MembershipStatus::None,
        ValidationSnafu {
            reason: "Use a concrete membership status"
        }
    );
    conn.execute(
        "INSERT INTO club_members (club_id, user_id, status, joined_at) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT (club_id, user_id) DO UPDATE SET status = excluded.status",
        params![club_id, user_id, status, now],
    )
    .context(StorageSnafu {})?;
    info!("Member {} of club {} is now {}", user_id, club_id, status);
    require_member(conn, club_id, user_id)
}

/// Manual override of who holds a position, outside of any election.
/// `None` clears the assignment.
pub fn assign_position(
    conn: &Connection,
    club_id: ClubId,
    user_id: UserId,
    position_id: Option<PositionId>,
) -> ElectionResult<Membership> {
    require_member(conn, club_id, user_id)?;
    if let Some(position_id) = position_id {
        let position = clubs::find_position(conn, position_id)?.context(NotFoundSnafu {
            entity: "position",
            id: position_id,
        })?;
        ensure!(
            position.club_id == club_id,
            ValidationSnafu {
                reason: "This position belongs to another club"
            }
        );
    }
    conn.execute(
        "UPDATE club_members SET club_position_id = ?1 WHERE club_id = ?2 AND user_id = ?3",
        params![position_id, club_id, user_id],
    )
    .context(StorageSnafu {})?;
    require_member(conn, club_id, user_id)
}

fn require_member(conn: &Connection, club_id: ClubId, user_id: UserId) -> ElectionResult<Membership> {
    find_member(conn, club_id, user_id)?.context(NotFoundSnafu {
        entity: "member",
        id: user_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[test]
    fn joining_starts_pending() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        assert_eq!(
            f.elections.membership_status(club.id, 8).unwrap(),
            MembershipStatus::None
        );
        let m = f.elections.join_club(club.id, 8).unwrap();
        assert_eq!(m.status, MembershipStatus::Pending);
        let err = f.elections.join_club(club.id, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn inactive_club_refuses_members() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        f.elections
            .set_club_status(ADMIN, club.id, ClubStatus::Inactive)
            .unwrap();
        let err = f.elections.join_club(club.id, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn status_changes_are_upserts() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        f.elections.join_club(club.id, 8).unwrap();
        f.elections
            .set_membership_status(ADMIN, club.id, 8, MembershipStatus::Active)
            .unwrap();
        f.elections
            .set_membership_status(ADMIN, club.id, 9, MembershipStatus::Inactive)
            .unwrap();
        let members = f.elections.members(club.id).unwrap();
        assert_eq!(
            members
                .iter()
                .map(|m| (m.user_id, m.status))
                .collect::<Vec<_>>(),
            vec![(8, MembershipStatus::Active), (9, MembershipStatus::Inactive)]
        );
    }

    #[test]
    fn assignment_stays_within_the_club() {
        let f = Fixture::new();
        let club = f.club_with(&["President"]);
        let other = f.club_with(&["Captain"]);
        let captain = f.position(other.id, "Captain");
        f.active_member(club.id, 8);
        let err = f
            .elections
            .assign_position(ADMIN, club.id, 8, Some(captain))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = f
            .elections
            .assign_position(ADMIN, club.id, 9, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
