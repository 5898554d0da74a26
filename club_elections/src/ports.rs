//! Collaborators the election core talks to but does not own.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use log::info;

use crate::model::UserId;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> ManualClock {
        ManualClock {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Named capabilities the caller checks before invoking an operation.
///
/// The core never consults them itself: it enforces the domain invariants,
/// the caller decides who may call.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum Permission {
    ManageClubs,
    ManageMembers,
    ManageNominations,
    ManageVotingEvents,
    Apply,
    Vote,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::ManageClubs,
        Permission::ManageMembers,
        Permission::ManageNominations,
        Permission::ManageVotingEvents,
        Permission::Apply,
        Permission::Vote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManageClubs => "manage-clubs",
            Permission::ManageMembers => "manage-members",
            Permission::ManageNominations => "manage-nominations",
            Permission::ManageVotingEvents => "manage-voting-events",
            Permission::Apply => "apply",
            Permission::Vote => "vote",
        }
    }

    pub fn parse(name: &str) -> Option<Permission> {
        Permission::ALL.iter().copied().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Authorizer {
    fn can(&self, actor: UserId, permission: Permission) -> bool;
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ActivityRecord {
    pub actor: UserId,
    pub message: String,
    pub category: &'static str,
}

/// Append-only audit trail. Delivery is best effort: a failing sink is
/// reported and otherwise ignored, it never undoes a committed operation.
pub trait ActivitySink: Send + Sync {
    fn record(&self, record: &ActivityRecord) -> Result<(), String>;
}

/// Writes activity through the `log` facade under the `activity` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogActivitySink;

impl ActivitySink for LogActivitySink {
    fn record(&self, record: &ActivityRecord) -> Result<(), String> {
        info!(
            target: "activity",
            "[{}] actor={} {}",
            record.category, record.actor, record.message
        );
        Ok(())
    }
}

/// Keeps every record in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryActivitySink {
    records: Mutex<Vec<ActivityRecord>>,
}

impl MemoryActivitySink {
    pub fn new() -> MemoryActivitySink {
        MemoryActivitySink::default()
    }

    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ActivitySink for MemoryActivitySink {
    fn record(&self, record: &ActivityRecord) -> Result<(), String> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_moves_on_demand() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(t);
        assert_eq!(clock.now(), t);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), t + Duration::minutes(5));
    }

    #[test]
    fn permissions_round_trip_through_names() {
        for p in Permission::ALL {
            assert_eq!(Permission::parse(p.as_str()), Some(p));
        }
        assert_eq!(Permission::parse("root"), None);
    }
}
