// ********* Records ***********

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use snafu::ensure;

use crate::error::{ElectionResult, ValidationSnafu};

pub type ClubId = i64;
pub type UserId = i64;
pub type PositionId = i64;
pub type NominationId = i64;
pub type ApplicationId = i64;
pub type VotingEventId = i64;

// Status columns are stored as their lowercase text form.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClubStatus {
    Active,
    Inactive,
    Pending,
}

text_enum!(ClubStatus {
    Active => "active",
    Inactive => "inactive",
    Pending => "pending",
});

/// Membership of a user in a club. `None` is never stored: it is what
/// `membership_status` answers for a user without a pivot row.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    None,
    Pending,
    Active,
    Inactive,
    Banned,
}

text_enum!(MembershipStatus {
    None => "none",
    Pending => "pending",
    Active => "active",
    Inactive => "inactive",
    Banned => "banned",
});

/// Shared by nominations: draft -> active -> closed -> archived.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NominationStatus {
    Draft,
    Active,
    Closed,
    Archived,
}

text_enum!(NominationStatus {
    Draft => "draft",
    Active => "active",
    Closed => "closed",
    Archived => "archived",
});

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(ApplicationStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// Voting events: draft -> active -> closed -> archived. Draft and active
/// count as "open" for the one-event-per-club rule.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Active,
    Closed,
    Archived,
}

text_enum!(EventStatus {
    Draft => "draft",
    Active => "active",
    Closed => "closed",
    Archived => "archived",
});

impl EventStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, EventStatus::Draft | EventStatus::Active)
    }
}

/// A start/end pair where the end is strictly after the start.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> ElectionResult<Window> {
        ensure!(
            end > start,
            ValidationSnafu {
                reason: "The end date must be after the start date"
            }
        );
        Ok(Window { start, end })
    }

    /// Inclusive on both ends.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct Club {
    pub id: ClubId,
    pub name: String,
    pub status: ClubStatus,
    pub join_fee: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct NewClub {
    pub name: String,
    pub status: ClubStatus,
    /// In minor currency units.
    pub join_fee: i64,
    pub positions: Vec<NewPosition>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct ClubPosition {
    pub id: PositionId,
    pub club_id: ClubId,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct NewPosition {
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
}

impl NewPosition {
    pub fn named(name: &str) -> NewPosition {
        NewPosition {
            name: name.to_string(),
            description: None,
            is_active: true,
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct Membership {
    pub club_id: ClubId,
    pub user_id: UserId,
    pub status: MembershipStatus,
    /// Manual assignment, independent of any election.
    pub club_position_id: Option<PositionId>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct Nomination {
    pub id: NominationId,
    pub club_id: ClubId,
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: NominationStatus,
    pub created_at: DateTime<Utc>,
}

impl Nomination {
    pub fn window(&self) -> Window {
        Window {
            start: self.start_date,
            end: self.end_date,
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct NominationApplication {
    pub id: ApplicationId,
    pub nomination_id: NominationId,
    pub user_id: UserId,
    pub club_position_id: PositionId,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct VotingEvent {
    pub id: VotingEventId,
    pub club_id: ClubId,
    /// The nomination whose approved applications form the ballot.
    pub nomination_id: Option<NominationId>,
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
}

impl VotingEvent {
    pub fn window(&self) -> Window {
        Window {
            start: self.start_date,
            end: self.end_date,
        }
    }
}

/// Changes to an open voting event. Absent fields are left unchanged.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct VotingEventUpdate {
    pub club_id: Option<ClubId>,
    pub title: Option<String>,
    pub window: Option<Window>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct Vote {
    pub id: i64,
    pub voting_event_id: VotingEventId,
    pub nomination_application_id: ApplicationId,
    pub club_position_id: PositionId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct NominationWinner {
    pub id: i64,
    pub voting_event_id: VotingEventId,
    pub nomination_id: NominationId,
    pub club_position_id: PositionId,
    pub nomination_application_id: ApplicationId,
    pub user_id: UserId,
    pub votes_count: u64,
    pub is_tie_resolved: bool,
    pub created_at: DateTime<Utc>,
}

// ******** Derived data structures *********

/// One line of a per-position tally.
#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct TallyEntry {
    pub nomination_application_id: ApplicationId,
    pub user_id: UserId,
    pub votes: u64,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HolderSource {
    Election,
    Manual,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct PositionHolder {
    pub position: ClubPosition,
    pub user_id: Option<UserId>,
    pub source: Option<HolderSource>,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadlineKind {
    Nomination,
    VotingEvent,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct Deadline {
    pub kind: DeadlineKind,
    pub id: i64,
    pub club_id: ClubId,
    pub title: String,
    pub end_date: DateTime<Utc>,
}
