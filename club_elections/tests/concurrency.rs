use std::sync::Barrier;
use std::thread;

use chrono::{Duration, Utc};
use club_elections::*;

const ADMIN: UserId = 0;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two independent connections on the same database file.
fn two_writers(dir: &tempfile::TempDir) -> (Elections, Elections) {
    let path = dir.path().join("clubs.sqlite3");
    let a = Elections::new(Store::open(&path).unwrap());
    let b = Elections::new(Store::open(&path).unwrap());
    (a, b)
}

fn window_around_now() -> Window {
    let now = Utc::now();
    Window::new(now - Duration::minutes(5), now + Duration::days(7)).unwrap()
}

fn new_club(elections: &Elections, name: &str) -> Club {
    elections
        .create_club(
            ADMIN,
            &NewClub {
                name: name.to_string(),
                status: ClubStatus::Active,
                join_fee: 0,
                positions: vec![NewPosition::named("President")],
            },
        )
        .unwrap()
}

fn race<T: Send>(
    a: &Elections,
    b: &Elections,
    op: impl Fn(&Elections) -> ElectionResult<T> + Sync,
) -> Vec<ElectionResult<T>> {
    let barrier = Barrier::new(2);
    thread::scope(|s| {
        let handles = [a, b].map(|e| {
            let barrier = &barrier;
            let op = &op;
            s.spawn(move || {
                barrier.wait();
                op(e)
            })
        });
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    })
}

fn assert_one_winner<T>(results: &[ElectionResult<T>]) {
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    for r in results.iter() {
        if let Err(e) = r {
            assert_eq!(e.kind(), ErrorKind::Conflict, "unexpected error: {}", e);
        }
    }
}

#[test]
fn concurrent_event_creation_leaves_one_open_event() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = two_writers(&dir);
    for round in 0..8 {
        let club = new_club(&a, &format!("Club {}", round));
        let results = race(&a, &b, |e| {
            e.create_voting_event(ADMIN, club.id, "Election", window_around_now(), EventStatus::Draft)
        });
        assert_one_winner(&results);
        assert_eq!(b.voting_events(club.id).unwrap().len(), 1);
    }
}

#[test]
fn concurrent_nominations_leave_one_active() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = two_writers(&dir);
    for round in 0..8 {
        let club = new_club(&a, &format!("Club {}", round));
        let results = race(&a, &b, |e| {
            e.open_nomination(ADMIN, club.id, "Spring", window_around_now())
        });
        assert_one_winner(&results);
        let active = a
            .nominations(club.id)
            .unwrap()
            .into_iter()
            .filter(|n| n.status == NominationStatus::Active)
            .count();
        assert_eq!(active, 1);
    }
}

#[test]
fn concurrent_votes_for_one_position_count_once() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = two_writers(&dir);
    let club = new_club(&a, "Chess");
    let president = a.positions(club.id).unwrap()[0].id;

    let nomination = a
        .open_nomination(ADMIN, club.id, "Spring", window_around_now())
        .unwrap();
    let first = a.apply(nomination.id, 1, president).unwrap();
    let second = a.apply(nomination.id, 2, president).unwrap();
    a.approve_application(ADMIN, first.id).unwrap();
    a.approve_application(ADMIN, second.id).unwrap();
    a.close_nomination(ADMIN, nomination.id).unwrap();
    let event = a
        .create_voting_event(ADMIN, club.id, "Election", window_around_now(), EventStatus::Active)
        .unwrap();

    for voter in 10..16 {
        a.set_membership_status(ADMIN, club.id, voter, MembershipStatus::Active)
            .unwrap();
        let results = race(&a, &b, |e| {
            let candidate = if std::ptr::eq(e, &a) { first.id } else { second.id };
            e.cast_vote(event.id, voter, candidate)
        });
        assert_one_winner(&results);
        assert!(b.has_voted(event.id, voter, president).unwrap());
    }
    assert_eq!(a.votes(event.id).unwrap().len(), 6);

    let (_, winners) = b.close_voting_event(ADMIN, event.id).unwrap();
    assert_eq!(winners.len(), 1);
    let tally = a.tally(event.id, president).unwrap();
    assert_eq!(tally.iter().map(|t| t.votes).sum::<u64>(), 6);
    assert_eq!(winners[0].votes_count, tally[0].votes);
}

#[test]
fn shared_store_serializes_threads() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let elections = Elections::new(Store::open(dir.path().join("shared.sqlite3")).unwrap());
    let club = new_club(&elections, "Go");
    let results = race(&elections, &elections, |e| {
        e.open_nomination(ADMIN, club.id, "Spring", window_around_now())
    });
    assert_one_winner(&results);
}
