//! Recording ballots: one vote per voter, per position, per voting event.

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection};
use snafu::{ensure, ResultExt};

use crate::error::*;
use crate::membership;
use crate::model::*;
use crate::nominations;
use crate::store::*;
use crate::voting_events;

const ALREADY_VOTED: &str = "You have already voted for this position";

/// Records a vote for a candidate.
///
/// The checks run in a fixed order so callers always see the same error for
/// the same situation: unknown records, candidate not on the ballot, already
/// voted, voting closed, voter not an active member. The insert itself is
/// guarded by the UNIQUE (event, voter, position) constraint; losing that
/// race reports the same conflict as the pre-check.
pub fn cast_vote(
    conn: &Connection,
    event_id: VotingEventId,
    voter_id: UserId,
    candidate_id: ApplicationId,
    now: DateTime<Utc>,
) -> ElectionResult<Vote> {
    let event = voting_events::require_event(conn, event_id)?;
    let candidate = nominations::require_application(conn, candidate_id)?;
    ensure!(
        event.nomination_id == Some(candidate.nomination_id)
            && candidate.status == ApplicationStatus::Approved,
        ValidationSnafu {
            reason: "This candidate is not on the ballot of this voting event"
        }
    );
    let position_id = candidate.club_position_id;

    ensure!(
        !has_voted(conn, event_id, voter_id, position_id)?,
        ConflictSnafu {
            reason: ALREADY_VOTED
        }
    );
    ensure!(
        event.status == EventStatus::Active,
        ValidationSnafu {
            reason: "Voting is not open for this event"
        }
    );
    ensure!(
        event.window().contains(now),
        ValidationSnafu {
            reason: "Votes are only accepted during the voting period"
        }
    );
    ensure!(
        membership::status_of(conn, event.club_id, voter_id)? == MembershipStatus::Active,
        ValidationSnafu {
            reason: "Only active members of the club can vote"
        }
    );

    conn.execute(
        "INSERT INTO votes \
         (voting_event_id, nomination_application_id, club_position_id, user_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![event_id, candidate_id, position_id, voter_id, now],
    )
    .map_err(|e| unique_or_storage(e, ALREADY_VOTED))?;
    let id = conn.last_insert_rowid();
    info!(
        "Recorded vote {} in event {} for position {}",
        id, event_id, position_id
    );
    debug!("cast_vote: voter {} candidate {}", voter_id, candidate_id);

    Ok(Vote {
        id,
        voting_event_id: event_id,
        nomination_application_id: candidate_id,
        club_position_id: position_id,
        user_id: voter_id,
        created_at: now,
    })
}

pub fn has_voted(
    conn: &Connection,
    event_id: VotingEventId,
    voter_id: UserId,
    position_id: PositionId,
) -> ElectionResult<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM votes \
         WHERE voting_event_id = ?1 AND user_id = ?2 AND club_position_id = ?3)",
        params![event_id, voter_id, position_id],
        |r| r.get(0),
    )
    .context(StorageSnafu {})
}

/// Every vote of an event, in the order they were cast.
pub fn list_votes(conn: &Connection, event_id: VotingEventId) -> ElectionResult<Vec<Vote>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM votes WHERE voting_event_id = ?1 ORDER BY id",
            VOTE_COLUMNS
        ))
        .context(StorageSnafu {})?;
    let rows = stmt
        .query_map([event_id], vote_from_row)
        .context(StorageSnafu {})?
        .collect::<rusqlite::Result<Vec<Vote>>>()
        .context(StorageSnafu {})?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    struct Election {
        f: Fixture,
        event: VotingEvent,
        // President: users 1 and 2. Treasurer: user 3.
        ballot: Vec<ApplicationId>,
        president: PositionId,
    }

    fn election() -> Election {
        let f = Fixture::new();
        let club = f.club_with(&["President", "Treasurer"]);
        let president = f.position(club.id, "President");
        let treasurer = f.position(club.id, "Treasurer");
        for user in 1..=5 {
            f.active_member(club.id, user);
        }
        let ballot = f.closed_nomination(club.id, &[(1, president), (2, president), (3, treasurer)]);
        let event = f.active_event(club.id);
        Election {
            f,
            event,
            ballot,
            president,
        }
    }

    #[test]
    fn second_vote_for_the_same_position_is_rejected() {
        let e = election();
        let first = e.f.elections.cast_vote(e.event.id, 4, e.ballot[0]).unwrap();
        let err = e.f.elections.cast_vote(e.event.id, 4, e.ballot[1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), ALREADY_VOTED);

        let votes = e.f.elections.votes(e.event.id).unwrap();
        assert_eq!(votes, vec![first]);
        assert_eq!(votes[0].nomination_application_id, e.ballot[0]);
    }

    #[test]
    fn one_vote_per_position_not_per_event() {
        let e = election();
        e.f.elections.cast_vote(e.event.id, 4, e.ballot[0]).unwrap();
        e.f.elections.cast_vote(e.event.id, 4, e.ballot[2]).unwrap();
        assert!(e
            .f
            .elections
            .has_voted(e.event.id, 4, e.president)
            .unwrap());
        assert_eq!(e.f.elections.votes(e.event.id).unwrap().len(), 2);
    }

    #[test]
    fn voting_outside_the_window_is_rejected() {
        let e = election();
        e.f.clock.advance(chrono::Duration::days(30));
        let err = e.f.elections.cast_vote(e.event.id, 4, e.ballot[0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn only_active_members_vote() {
        let e = election();
        let club_id = e.event.club_id;
        let err = e.f.elections.cast_vote(e.event.id, 77, e.ballot[0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        e.f.elections
            .set_membership_status(ADMIN, club_id, 5, MembershipStatus::Banned)
            .unwrap();
        let err = e.f.elections.cast_vote(e.event.id, 5, e.ballot[0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(e.f.elections.votes(e.event.id).unwrap().is_empty());
    }

    #[test]
    fn closed_event_rejects_votes() {
        let e = election();
        e.f.elections.close_voting_event(ADMIN, e.event.id).unwrap();
        let err = e.f.elections.cast_vote(e.event.id, 4, e.ballot[0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn unknown_records_are_not_found() {
        let e = election();
        let err = e.f.elections.cast_vote(999, 4, e.ballot[0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = e.f.elections.cast_vote(e.event.id, 4, 999).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn lost_race_at_insert_is_a_conflict() {
        let e = election();
        let now = e.f.now();
        e.f.elections.cast_vote(e.event.id, 4, e.ballot[0]).unwrap();
        // Bypass the pre-check and hit the constraint directly.
        let err = e
            .f
            .elections
            .store()
            .write(|conn| {
                conn.execute(
                    "INSERT INTO votes \
                     (voting_event_id, nomination_application_id, club_position_id, user_id, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![e.event.id, e.ballot[1], e.president, 4, now],
                )
                .map_err(|err| unique_or_storage(err, ALREADY_VOTED))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(e.f.elections.votes(e.event.id).unwrap().len(), 1);
    }
}
