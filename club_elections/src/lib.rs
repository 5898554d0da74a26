/*!
Club elections: positions, nominations, voting events, ballots and winners.

Every operation of [`Elections`] runs as one SQLite transaction. The rules
that must hold under concurrent writers (one active nomination per club, one
draft or active voting event per club, one vote per voter and position) are
also declared as storage constraints, and a lost race is reported as the same
[`ErrorKind::Conflict`] as the regular check.

```
use club_elections::*;

let elections = Elections::new(Store::in_memory()?);
let club = elections.create_club(
    0,
    &NewClub {
        name: "Chess".to_string(),
        status: ClubStatus::Active,
        join_fee: 0,
        positions: vec![NewPosition::named("President")],
    },
)?;
assert_eq!(elections.positions(club.id)?.len(), 1);
# Ok::<(), ElectionError>(())
```

See the [`manual`] for the rules in detail.
*/

mod ballots;
pub mod builder;
mod clubs;
mod config;
mod error;
pub mod manual;
mod membership;
mod model;
mod nominations;
mod ports;
mod reminders;
mod store;
mod voting_events;
mod winners;

use std::sync::Arc;

use chrono::Duration;
use log::{debug, warn};

pub use crate::builder::ElectionsBuilder;
pub use crate::config::*;
pub use crate::error::{ElectionError, ElectionResult, ErrorKind};
pub use crate::model::*;
pub use crate::ports::*;
pub use crate::store::{Store, SCHEMA_VERSION};

/// The election core.
///
/// The `actor` argument of state-changing operations is the user on whose
/// behalf the call is made. It is written to the activity log; checking that
/// the actor is allowed to make the call is up to the caller (see
/// [`Authorizer`]).
pub struct Elections {
    store: Store,
    clock: Arc<dyn Clock>,
    activity: Arc<dyn ActivitySink>,
    rules: ElectionRules,
}

impl Elections {
    /// An instance with the system clock, activity going to the log, and the
    /// default rules.
    pub fn new(store: Store) -> Elections {
        ElectionsBuilder::new(&ElectionRules::DEFAULT_RULES).build(store)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn rules(&self) -> &ElectionRules {
        &self.rules
    }

    // Activity is recorded after the transaction committed. A failing sink
    // does not undo the operation.
    fn record(&self, actor: UserId, category: &'static str, message: String) {
        let record = ActivityRecord {
            actor,
            message,
            category,
        };
        if let Err(e) = self.activity.record(&record) {
            warn!("Could not record activity {:?}: {}", record, e);
        }
    }

    // ********* Clubs and positions **********

    pub fn create_club(&self, actor: UserId, club: &NewClub) -> ElectionResult<Club> {
        let now = self.clock.now();
        let club = self.store.write(|c| clubs::create_club(c, club, now))?;
        self.record(actor, "club", format!("Created club '{}'", club.name));
        Ok(club)
    }

    pub fn club(&self, club_id: ClubId) -> ElectionResult<Club> {
        self.store.read(|c| clubs::require_club(c, club_id))
    }

    pub fn clubs(&self) -> ElectionResult<Vec<Club>> {
        self.store.read(clubs::list_clubs)
    }

    pub fn set_club_status(
        &self,
        actor: UserId,
        club_id: ClubId,
        status: ClubStatus,
    ) -> ElectionResult<Club> {
        let club = self
            .store
            .write(|c| clubs::set_club_status(c, club_id, status))?;
        self.record(
            actor,
            "club",
            format!("Set club '{}' to {}", club.name, status),
        );
        Ok(club)
    }

    /// Replaces every position of the club with the given list.
    pub fn replace_positions(
        &self,
        actor: UserId,
        club_id: ClubId,
        positions: &[NewPosition],
    ) -> ElectionResult<Vec<ClubPosition>> {
        let res = self
            .store
            .write(|c| clubs::replace_positions(c, club_id, positions))?;
        self.record(
            actor,
            "club",
            format!("Replaced the positions of club {} ({})", club_id, res.len()),
        );
        Ok(res)
    }

    pub fn positions(&self, club_id: ClubId) -> ElectionResult<Vec<ClubPosition>> {
        self.store.read(|c| {
            clubs::require_club(c, club_id)?;
            clubs::list_positions(c, club_id)
        })
    }

    pub fn current_holders(&self, club_id: ClubId) -> ElectionResult<Vec<PositionHolder>> {
        self.store.read(|c| clubs::current_holders(c, club_id))
    }

    // ********* Membership **********

    pub fn join_club(&self, club_id: ClubId, user_id: UserId) -> ElectionResult<Membership> {
        let now = self.clock.now();
        let m = self
            .store
            .write(|c| membership::join(c, club_id, user_id, now))?;
        self.record(user_id, "membership", format!("Asked to join club {}", club_id));
        Ok(m)
    }

    pub fn membership_status(
        &self,
        club_id: ClubId,
        user_id: UserId,
    ) -> ElectionResult<MembershipStatus> {
        self.store
            .read(|c| membership::status_of(c, club_id, user_id))
    }

    pub fn set_membership_status(
        &self,
        actor: UserId,
        club_id: ClubId,
        user_id: UserId,
        status: MembershipStatus,
    ) -> ElectionResult<Membership> {
        let now = self.clock.now();
        let m = self
            .store
            .write(|c| membership::set_status(c, club_id, user_id, status, now))?;
        self.record(
            actor,
            "membership",
            format!("Set member {} of club {} to {}", user_id, club_id, status),
        );
        Ok(m)
    }

    /// Manual position assignment, outside of any election.
    pub fn assign_position(
        &self,
        actor: UserId,
        club_id: ClubId,
        user_id: UserId,
        position_id: Option<PositionId>,
    ) -> ElectionResult<Membership> {
        let m = self
            .store
            .write(|c| membership::assign_position(c, club_id, user_id, position_id))?;
        let message = match position_id {
            Some(p) => format!("Assigned position {} to member {}", p, user_id),
            None => format!("Cleared the position of member {}", user_id),
        };
        self.record(actor, "membership", message);
        Ok(m)
    }

    pub fn members(&self, club_id: ClubId) -> ElectionResult<Vec<Membership>> {
        self.store.read(|c| {
            clubs::require_club(c, club_id)?;
            membership::list_members(c, club_id)
        })
    }

    // ********* Nominations **********

    /// Opens an active nomination. A club has at most one.
    pub fn open_nomination(
        &self,
        actor: UserId,
        club_id: ClubId,
        title: &str,
        window: Window,
    ) -> ElectionResult<Nomination> {
        self.create_nomination(actor, club_id, title, window, NominationStatus::Active)
    }

    pub fn draft_nomination(
        &self,
        actor: UserId,
        club_id: ClubId,
        title: &str,
        window: Window,
    ) -> ElectionResult<Nomination> {
        self.create_nomination(actor, club_id, title, window, NominationStatus::Draft)
    }

    fn create_nomination(
        &self,
        actor: UserId,
        club_id: ClubId,
        title: &str,
        window: Window,
        status: NominationStatus,
    ) -> ElectionResult<Nomination> {
        let now = self.clock.now();
        let n = self
            .store
            .write(|c| nominations::create(c, club_id, title, window, status, now))?;
        self.record(
            actor,
            "nomination",
            format!("Created {} nomination '{}'", n.status, n.title),
        );
        Ok(n)
    }

    pub fn activate_nomination(
        &self,
        actor: UserId,
        nomination_id: NominationId,
    ) -> ElectionResult<Nomination> {
        let n = self
            .store
            .write(|c| nominations::activate(c, nomination_id))?;
        self.record(actor, "nomination", format!("Opened nomination '{}'", n.title));
        Ok(n)
    }

    pub fn close_nomination(
        &self,
        actor: UserId,
        nomination_id: NominationId,
    ) -> ElectionResult<Nomination> {
        let n = self.store.write(|c| nominations::close(c, nomination_id))?;
        self.record(actor, "nomination", format!("Closed nomination '{}'", n.title));
        Ok(n)
    }

    pub fn archive_nomination(
        &self,
        actor: UserId,
        nomination_id: NominationId,
    ) -> ElectionResult<Nomination> {
        let n = self
            .store
            .write(|c| nominations::archive(c, nomination_id))?;
        self.record(
            actor,
            "nomination",
            format!("Archived nomination '{}'", n.title),
        );
        Ok(n)
    }

    pub fn delete_nomination(
        &self,
        actor: UserId,
        nomination_id: NominationId,
    ) -> ElectionResult<()> {
        self.store
            .write(|c| nominations::delete(c, nomination_id))?;
        self.record(
            actor,
            "nomination",
            format!("Deleted nomination {}", nomination_id),
        );
        Ok(())
    }

    pub fn nomination(&self, nomination_id: NominationId) -> ElectionResult<Nomination> {
        self.store
            .read(|c| nominations::require_nomination(c, nomination_id))
    }

    pub fn nominations(&self, club_id: ClubId) -> ElectionResult<Vec<Nomination>> {
        self.store.read(|c| {
            clubs::require_club(c, club_id)?;
            nominations::list_nominations(c, club_id)
        })
    }

    pub fn active_nomination(&self, club_id: ClubId) -> ElectionResult<Option<Nomination>> {
        self.store.read(|c| nominations::find_active(c, club_id))
    }

    // ********* Applications **********

    pub fn apply(
        &self,
        nomination_id: NominationId,
        user_id: UserId,
        position_id: PositionId,
    ) -> ElectionResult<NominationApplication> {
        let now = self.clock.now();
        let a = self
            .store
            .write(|c| nominations::apply(c, nomination_id, user_id, position_id, now))?;
        self.record(
            user_id,
            "nomination",
            format!(
                "Applied for position {} in nomination {}",
                position_id, nomination_id
            ),
        );
        Ok(a)
    }

    pub fn approve_application(
        &self,
        actor: UserId,
        application_id: ApplicationId,
    ) -> ElectionResult<NominationApplication> {
        self.review_application(actor, application_id, ApplicationStatus::Approved)
    }

    pub fn reject_application(
        &self,
        actor: UserId,
        application_id: ApplicationId,
    ) -> ElectionResult<NominationApplication> {
        self.review_application(actor, application_id, ApplicationStatus::Rejected)
    }

    fn review_application(
        &self,
        actor: UserId,
        application_id: ApplicationId,
        status: ApplicationStatus,
    ) -> ElectionResult<NominationApplication> {
        let a = self
            .store
            .write(|c| nominations::set_application_status(c, application_id, status))?;
        self.record(
            actor,
            "nomination",
            format!("Application {} is {}", application_id, a.status),
        );
        Ok(a)
    }

    pub fn application(&self, application_id: ApplicationId) -> ElectionResult<NominationApplication> {
        self.store
            .read(|c| nominations::require_application(c, application_id))
    }

    /// All applications of a nomination, in submission order.
    pub fn applications(
        &self,
        nomination_id: NominationId,
    ) -> ElectionResult<Vec<NominationApplication>> {
        self.store.read(|c| {
            nominations::require_nomination(c, nomination_id)?;
            nominations::list_applications(c, nomination_id)
        })
    }

    /// The approved applications, which make up the ballot.
    pub fn candidates(
        &self,
        nomination_id: NominationId,
    ) -> ElectionResult<Vec<NominationApplication>> {
        self.store.read(|c| {
            nominations::require_nomination(c, nomination_id)?;
            nominations::list_candidates(c, nomination_id)
        })
    }

    // ********* Voting events **********

    pub fn create_voting_event(
        &self,
        actor: UserId,
        club_id: ClubId,
        title: &str,
        window: Window,
        status: EventStatus,
    ) -> ElectionResult<VotingEvent> {
        let now = self.clock.now();
        let e = self
            .store
            .write(|c| voting_events::create(c, club_id, title, window, status, now))?;
        self.record(
            actor,
            "voting",
            format!("Created {} voting event '{}'", e.status, e.title),
        );
        Ok(e)
    }

    pub fn update_voting_event(
        &self,
        actor: UserId,
        event_id: VotingEventId,
        changes: &VotingEventUpdate,
    ) -> ElectionResult<VotingEvent> {
        let e = self
            .store
            .write(|c| voting_events::update(c, event_id, changes))?;
        self.record(actor, "voting", format!("Updated voting event '{}'", e.title));
        Ok(e)
    }

    pub fn activate_voting_event(
        &self,
        actor: UserId,
        event_id: VotingEventId,
    ) -> ElectionResult<VotingEvent> {
        let e = self
            .store
            .write(|c| voting_events::activate(c, event_id))?;
        self.record(actor, "voting", format!("Opened voting event '{}'", e.title));
        Ok(e)
    }

    /// Closes the event and stores its winners, atomically.
    pub fn close_voting_event(
        &self,
        actor: UserId,
        event_id: VotingEventId,
    ) -> ElectionResult<(VotingEvent, Vec<NominationWinner>)> {
        let now = self.clock.now();
        let (e, winners) = self
            .store
            .write(|c| voting_events::close(c, event_id, &self.rules, now))?;
        self.record(
            actor,
            "voting",
            format!(
                "Closed voting event '{}' with {} winner(s)",
                e.title,
                winners.len()
            ),
        );
        Ok((e, winners))
    }

    pub fn archive_voting_event(
        &self,
        actor: UserId,
        event_id: VotingEventId,
    ) -> ElectionResult<VotingEvent> {
        let e = self
            .store
            .write(|c| voting_events::archive(c, event_id))?;
        self.record(actor, "voting", format!("Archived voting event '{}'", e.title));
        Ok(e)
    }

    pub fn delete_voting_event(&self, actor: UserId, event_id: VotingEventId) -> ElectionResult<()> {
        self.store
            .write(|c| voting_events::delete(c, event_id))?;
        self.record(actor, "voting", format!("Deleted voting event {}", event_id));
        Ok(())
    }

    pub fn voting_event(&self, event_id: VotingEventId) -> ElectionResult<VotingEvent> {
        self.store
            .read(|c| voting_events::require_event(c, event_id))
    }

    pub fn voting_events(&self, club_id: ClubId) -> ElectionResult<Vec<VotingEvent>> {
        self.store.read(|c| {
            clubs::require_club(c, club_id)?;
            voting_events::list_events(c, club_id)
        })
    }

    // ********* Ballots **********

    /// Records one vote. Not safe to retry blindly: after an ambiguous
    /// failure, check [`Elections::has_voted`] first.
    pub fn cast_vote(
        &self,
        event_id: VotingEventId,
        voter_id: UserId,
        candidate_id: ApplicationId,
    ) -> ElectionResult<Vote> {
        let now = self.clock.now();
        let v = self
            .store
            .write(|c| ballots::cast_vote(c, event_id, voter_id, candidate_id, now))?;
        self.record(
            voter_id,
            "voting",
            format!(
                "Voted in event {} for position {}",
                event_id, v.club_position_id
            ),
        );
        Ok(v)
    }

    pub fn has_voted(
        &self,
        event_id: VotingEventId,
        voter_id: UserId,
        position_id: PositionId,
    ) -> ElectionResult<bool> {
        self.store
            .read(|c| ballots::has_voted(c, event_id, voter_id, position_id))
    }

    pub fn votes(&self, event_id: VotingEventId) -> ElectionResult<Vec<Vote>> {
        self.store.read(|c| {
            voting_events::require_event(c, event_id)?;
            ballots::list_votes(c, event_id)
        })
    }

    // ********* Results **********

    pub fn tally(
        &self,
        event_id: VotingEventId,
        position_id: PositionId,
    ) -> ElectionResult<Vec<TallyEntry>> {
        self.store
            .read(|c| winners::tally(c, event_id, position_id, &self.rules))
    }

    pub fn winners(&self, event_id: VotingEventId) -> ElectionResult<Vec<NominationWinner>> {
        self.store.read(|c| {
            voting_events::require_event(c, event_id)?;
            winners::list_winners(c, event_id)
        })
    }

    /// Recomputes the winners of a closed event, replacing the stored rows.
    pub fn recompute_winners(
        &self,
        actor: UserId,
        event_id: VotingEventId,
    ) -> ElectionResult<Vec<NominationWinner>> {
        let now = self.clock.now();
        let res = self
            .store
            .write(|c| winners::recompute(c, event_id, &self.rules, now))?;
        self.record(
            actor,
            "voting",
            format!("Recomputed the winners of voting event {}", event_id),
        );
        Ok(res)
    }

    /// Active nominations and voting events ending within `within`.
    pub fn upcoming_deadlines(&self, within: Duration) -> ElectionResult<Vec<Deadline>> {
        let now = self.clock.now();
        debug!("upcoming_deadlines: now {} within {}", now, within);
        self.store
            .read(|c| reminders::upcoming_deadlines(c, now, within))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    pub use crate::*;

    /// The operator performing administrative calls in tests.
    pub const ADMIN: UserId = 0;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    pub struct Fixture {
        pub elections: Elections,
        pub clock: Arc<ManualClock>,
        pub activity: Arc<MemoryActivitySink>,
    }

    impl Fixture {
        pub fn new() -> Fixture {
            Fixture::with_rules(ElectionRules::DEFAULT_RULES)
        }

        pub fn with_rules(rules: ElectionRules) -> Fixture {
            init_logger();
            let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
            let clock = Arc::new(ManualClock::new(start));
            let activity = Arc::new(MemoryActivitySink::new());
            let elections = ElectionsBuilder::new(&rules)
                .clock(clock.clone())
                .activity(activity.clone())
                .build(Store::in_memory().unwrap());
            Fixture {
                elections,
                clock,
                activity,
            }
        }

        pub fn now(&self) -> DateTime<Utc> {
            self.clock.now()
        }

        pub fn window_days(&self, from: i64, to: i64) -> Window {
            let now = self.now();
            Window::new(now + Duration::days(from), now + Duration::days(to)).unwrap()
        }

        pub fn club_with(&self, positions: &[&str]) -> Club {
            let n = self.elections.clubs().unwrap().len() + 1;
            self.elections
                .create_club(
                    ADMIN,
                    &NewClub {
                        name: format!("Club {}", n),
                        status: ClubStatus::Active,
                        join_fee: 0,
                        positions: positions.iter().map(|p| NewPosition::named(p)).collect(),
                    },
                )
                .unwrap()
        }

        pub fn position(&self, club_id: ClubId, name: &str) -> PositionId {
            self.elections
                .positions(club_id)
                .unwrap()
                .into_iter()
                .find(|p| p.name == name)
                .unwrap()
                .id
        }

        pub fn active_member(&self, club_id: ClubId, user_id: UserId) {
            self.elections
                .set_membership_status(ADMIN, club_id, user_id, MembershipStatus::Active)
                .unwrap();
        }

        /// Runs a full nomination: open, apply in the given order, approve
        /// everyone, close. Returns the application ids in the same order.
        pub fn closed_nomination(
            &self,
            club_id: ClubId,
            applicants: &[(UserId, PositionId)],
        ) -> Vec<ApplicationId> {
            let nomination = self
                .elections
                .open_nomination(ADMIN, club_id, "Nominations", self.window_days(0, 7))
                .unwrap();
            let ids: Vec<ApplicationId> = applicants
                .iter()
                .map(|(user, position)| {
                    self.elections
                        .apply(nomination.id, *user, *position)
                        .unwrap()
                        .id
                })
                .collect();
            for id in ids.iter() {
                self.elections.approve_application(ADMIN, *id).unwrap();
            }
            self.elections
                .close_nomination(ADMIN, nomination.id)
                .unwrap();
            ids
        }

        /// An active voting event whose window covers the current time.
        pub fn active_event(&self, club_id: ClubId) -> VotingEvent {
            let now = self.now();
            let window = Window::new(now - Duration::hours(1), now + Duration::days(7)).unwrap();
            self.elections
                .create_voting_event(ADMIN, club_id, "Election", window, EventStatus::Active)
                .unwrap()
        }
    }
}
