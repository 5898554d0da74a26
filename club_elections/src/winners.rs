//! Vote tallying and winner resolution.
//!
//! Winners are computed per position from the votes of one voting event. The
//! candidate with the strictly highest count wins. When several candidates
//! share the top count, one of them is picked by the configured tie-break
//! and the winner row is flagged with `is_tie_resolved`.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection};
use snafu::{ensure, ResultExt};

use crate::config::{ElectionRules, TieBreakMode};
use crate::error::*;
use crate::model::*;
use crate::nominations;
use crate::store::*;
use crate::voting_events;

/// A candidate of the ballot along with the votes it received.
#[derive(Debug, Clone)]
struct Contender {
    application: NominationApplication,
    votes: u64,
}

impl Contender {
    fn entry(&self) -> TallyEntry {
        TallyEntry {
            nomination_application_id: self.application.id,
            user_id: self.application.user_id,
            votes: self.votes,
        }
    }
}

/// The per-candidate vote counts of one position, best first.
///
/// Approved candidates of the event's ballot that received no vote are listed
/// with a count of zero. Candidates with the same count appear in tie-break
/// order, so the first entry is always the winner.
pub fn tally(
    conn: &Connection,
    event_id: VotingEventId,
    position_id: PositionId,
    rules: &ElectionRules,
) -> ElectionResult<Vec<TallyEntry>> {
    let event = voting_events::require_event(conn, event_id)?;
    let contenders = contenders(conn, &event, position_id, rules)?;
    Ok(contenders.iter().map(Contender::entry).collect())
}

fn contenders(
    conn: &Connection,
    event: &VotingEvent,
    position_id: PositionId,
    rules: &ElectionRules,
) -> ElectionResult<Vec<Contender>> {
    let mut counts: HashMap<ApplicationId, u64> = HashMap::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT nomination_application_id, COUNT(*) FROM votes \
                 WHERE voting_event_id = ?1 AND club_position_id = ?2 \
                 GROUP BY nomination_application_id",
            )
            .context(StorageSnafu {})?;
        let rows = stmt
            .query_map(params![event.id, position_id], |r| {
                Ok((r.get::<_, ApplicationId>(0)?, r.get::<_, i64>(1)?))
            })
            .context(StorageSnafu {})?;
        for row in rows {
            let (application_id, count) = row.context(StorageSnafu {})?;
            counts.insert(application_id, count.max(0) as u64);
        }
    }

    let mut res: Vec<Contender> = Vec::new();
    if let Some(nomination_id) = event.nomination_id {
        for application in nominations::list_candidates(conn, nomination_id)? {
            if application.club_position_id != position_id {
                continue;
            }
            let votes = counts.remove(&application.id).unwrap_or(0);
            res.push(Contender { application, votes });
        }
    }
    // Votes always point at ballot candidates. Anything left over is still
    // counted so the tally accounts for every vote row.
    for (application_id, votes) in counts {
        debug!(
            "contenders: application {} has votes but is not an approved candidate",
            application_id
        );
        let application = nominations::require_application(conn, application_id)?;
        res.push(Contender { application, votes });
    }

    let order = tiebreak_order(
        &res.iter().map(|c| c.application.clone()).collect::<Vec<_>>(),
        event.id,
        rules.tiebreak_mode,
    );
    let rank: HashMap<ApplicationId, usize> =
        order.iter().enumerate().map(|(idx, id)| (*id, idx)).collect();
    res.sort_by_key(|c| {
        (
            std::cmp::Reverse(c.votes),
            rank.get(&c.application.id).copied().unwrap_or(usize::MAX),
        )
    });
    Ok(res)
}

/// The order in which candidates win ties, first one wins.
fn tiebreak_order(
    applications: &[NominationApplication],
    event_id: VotingEventId,
    mode: TieBreakMode,
) -> Vec<ApplicationId> {
    match mode {
        TieBreakMode::EarliestApplication => {
            let mut data: Vec<(DateTime<Utc>, ApplicationId)> = applications
                .iter()
                .map(|a| (a.created_at, a.id))
                .collect();
            data.sort();
            data.iter().map(|p| p.1).collect()
        }
        TieBreakMode::Random(seed) => candidate_permutation_crypto(applications, seed, event_id),
    }
}

// Hash-based permutation: reproducible from the seed, but not predictable
// from the application order.
fn candidate_permutation_crypto(
    applications: &[NominationApplication],
    seed: u32,
    event_id: VotingEventId,
) -> Vec<ApplicationId> {
    let mut data: Vec<(ApplicationId, String)> = applications
        .iter()
        .map(|a| {
            let key = format!("{:08}{:08}{:08}", seed, event_id, a.id);
            (a.id, sha256::digest(key.as_str()))
        })
        .collect();
    data.sort_by(|x, y| x.1.cmp(&y.1));
    data.iter().map(|p| p.0).collect()
}

/// Computes and stores the winners of a closed voting event.
///
/// Prior winner rows of the event are replaced, so running it again on the
/// same votes yields the same rows. Positions without candidates or without
/// votes get no winner.
pub fn resolve_all(
    conn: &Connection,
    event: &VotingEvent,
    rules: &ElectionRules,
    now: DateTime<Utc>,
) -> ElectionResult<Vec<NominationWinner>> {
    ensure!(
        event.status == EventStatus::Closed,
        ValidationSnafu {
            reason: format!(
                "Winners are only resolved for closed voting events; this one is {}",
                event.status
            )
        }
    );
    let removed = conn
        .execute(
            "DELETE FROM nomination_winners WHERE voting_event_id = ?1",
            [event.id],
        )
        .context(StorageSnafu {})?;
    if removed > 0 {
        debug!(
            "resolve_all: replacing {} winner(s) of event {}",
            removed, event.id
        );
    }

    let nomination_id = match event.nomination_id {
        Some(id) => id,
        None => {
            info!("Voting event {} has no ballot, no winners", event.id);
            return Ok(Vec::new());
        }
    };

    let positions: BTreeSet<PositionId> = nominations::list_candidates(conn, nomination_id)?
        .iter()
        .map(|a| a.club_position_id)
        .collect();

    for position_id in positions {
        let contenders = contenders(conn, event, position_id, rules)?;
        let winner = match contenders.first() {
            Some(c) if c.votes > 0 => c,
            _ => {
                debug!(
                    "resolve_all: no votes for position {} in event {}",
                    position_id, event.id
                );
                continue;
            }
        };
        let is_tie = contenders
            .get(1)
            .map(|c| c.votes == winner.votes)
            .unwrap_or(false);
        if is_tie {
            info!(
                "Tie at {} vote(s) for position {} in event {}, resolved in favor of application {}",
                winner.votes, position_id, event.id, winner.application.id
            );
        }
        conn.execute(
            "INSERT INTO nomination_winners \
             (voting_event_id, nomination_id, club_position_id, nomination_application_id, \
              user_id, votes_count, is_tie_resolved, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.id,
                nomination_id,
                position_id,
                winner.application.id,
                winner.application.user_id,
                winner.votes as i64,
                is_tie,
                now
            ],
        )
        .map_err(|e| unique_or_storage(e, "Winners are already recorded for this position"))?;
    }

    list_winners(conn, event.id)
}

/// Explicit recomputation on a closed event.
pub fn recompute(
    conn: &Connection,
    event_id: VotingEventId,
    rules: &ElectionRules,
    now: DateTime<Utc>,
) -> ElectionResult<Vec<NominationWinner>> {
    let event = voting_events::require_event(conn, event_id)?;
    let winners = resolve_all(conn, &event, rules, now)?;
    info!(
        "Recomputed {} winner(s) for voting event {}",
        winners.len(),
        event_id
    );
    Ok(winners)
}

pub fn list_winners(
    conn: &Connection,
    event_id: VotingEventId,
) -> ElectionResult<Vec<NominationWinner>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM nomination_winners WHERE voting_event_id = ?1 ORDER BY club_position_id",
            WINNER_COLUMNS
        ))
        .context(StorageSnafu {})?;
    let rows = stmt
        .query_map([event_id], winner_from_row)
        .context(StorageSnafu {})?
        .collect::<rusqlite::Result<Vec<NominationWinner>>>()
        .context(StorageSnafu {})?;
    Ok(rows)
}
