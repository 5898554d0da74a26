use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection};
use snafu::{ensure, OptionExt, ResultExt};

use crate::error::*;
use crate::model::*;

/// Active nominations and voting events closing within `within` from `now`,
/// soonest first.
pub fn upcoming_deadlines(
    conn: &Connection,
    now: DateTime<Utc>,
    within: Duration,
) -> ElectionResult<Vec<Deadline>> {
    ensure!(
        within >= Duration::zero(),
        ValidationSnafu {
            reason: "The reminder horizon cannot be negative"
        }
    );
    // Dates are stored as text with four-digit years.
    let last = Utc
        .with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .context(ValidationSnafu {
            reason: "The reminder horizon cannot be represented",
        })?;
    let until = match now.checked_add_signed(within) {
        Some(t) if t < last => t,
        _ => last,
    };
    let mut stmt = conn
        .prepare(
            "SELECT 'nomination', id, club_id, title, end_date FROM nominations \
             WHERE status = 'active' AND end_date >= ?1 AND end_date <= ?2 \
             UNION ALL \
             SELECT 'voting_event', id, club_id, title, end_date FROM voting_events \
             WHERE status = 'active' AND end_date >= ?1 AND end_date <= ?2 \
             ORDER BY 5, 1, 2",
        )
        .context(StorageSnafu {})?;
    let rows = stmt
        .query_map(params![now, until], |r| {
            let kind: String = r.get(0)?;
            Ok(Deadline {
                kind: if kind == "nomination" {
                    DeadlineKind::Nomination
                } else {
                    DeadlineKind::VotingEvent
                },
                id: r.get(1)?,
                club_id: r.get(2)?,
                title: r.get(3)?,
                end_date: r.get(4)?,
            })
        })
        .context(StorageSnafu {})?
        .collect::<rusqlite::Result<Vec<Deadline>>>()
        .context(StorageSnafu {})?;
    Ok(rows)
}
