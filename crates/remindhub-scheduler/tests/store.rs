// Schedule store contracts: ordering, atomic claims, state transitions and
// durability across store instances.

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use remindhub_core::{
    Frequency, OwnerId, RecurrenceRule, Reminder, ReminderId, ReminderStatus, TimeSpec,
};
use remindhub_scheduler::{Completion, ScheduleStore, SchedulerError, SqliteStore};

fn t(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
}

fn one_shot(id: &str, owner: &str, at: DateTime<Utc>) -> Reminder {
    Reminder::pending(
        ReminderId::from(id),
        OwnerId::from(owner),
        format!("subject {id}"),
        TimeSpec::Absolute {
            at: at.fixed_offset(),
        },
        at,
        t(8, 0),
    )
}

fn daily(id: &str, at: DateTime<Utc>) -> Reminder {
    let rule = RecurrenceRule::new(Frequency::Day, 1, at.fixed_offset());
    Reminder::pending(
        ReminderId::from(id),
        OwnerId::from("alice"),
        "stand-up",
        TimeSpec::Recurring {
            rule,
            anchor: t(8, 0).fixed_offset(),
        },
        at,
        t(8, 0),
    )
}

#[test]
fn insert_and_get_round_trip() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut reminder = daily("r1", t(9, 0));
    reminder.tags = vec!["work".into()];
    store.insert(&reminder).unwrap();

    let loaded = store.get(&reminder.id).unwrap();
    assert_eq!(loaded, reminder);
}

#[test]
fn duplicate_id_is_rejected() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert(&one_shot("r1", "alice", t(9, 0))).unwrap();

    let err = store.insert(&one_shot("r1", "bob", t(10, 0))).unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateId { ref id } if id.as_str() == "r1"));
    // The original record is untouched.
    assert_eq!(store.get(&ReminderId::from("r1")).unwrap().owner.as_str(), "alice");
}

#[test]
fn get_missing_is_not_found() {
    let store = SqliteStore::open_in_memory().unwrap();
    let err = store.get(&ReminderId::from("nope")).unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { .. }));
}

#[test]
fn next_due_orders_by_time_then_id() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert(&one_shot("c", "alice", t(9, 0))).unwrap();
    store.insert(&one_shot("b", "alice", t(9, 0))).unwrap();
    store.insert(&one_shot("a", "alice", t(9, 30))).unwrap();
    store.insert(&one_shot("late", "alice", t(11, 0))).unwrap();

    let due: Vec<String> = store
        .next_due(t(10, 0), 100)
        .unwrap()
        .into_iter()
        .map(|r| r.id.0)
        .collect();
    assert_eq!(due, ["b", "c", "a"]);

    let limited = store.next_due(t(10, 0), 1).unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id.as_str(), "b");
}

#[test]
fn next_due_skips_non_pending() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert(&one_shot("a", "alice", t(9, 0))).unwrap();
    store.insert(&one_shot("b", "alice", t(9, 0))).unwrap();
    store.cancel(&ReminderId::from("a"), t(8, 30)).unwrap();

    let due = store.next_due(t(10, 0), 100).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id.as_str(), "b");
}

#[test]
fn earliest_pending_tracks_the_soonest_reminder() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert_eq!(store.earliest_pending().unwrap(), None);

    store.insert(&one_shot("a", "alice", t(12, 0))).unwrap();
    store.insert(&one_shot("b", "alice", t(9, 15))).unwrap();
    assert_eq!(store.earliest_pending().unwrap(), Some(t(9, 15)));
}

#[test]
fn claim_moves_to_firing_once() {
    let store = SqliteStore::open_in_memory().unwrap();
    let id = ReminderId::from("r1");
    store.insert(&one_shot("r1", "alice", t(9, 0))).unwrap();

    let claimed = store.claim(&id, t(9, 0)).unwrap();
    assert_eq!(claimed.status, ReminderStatus::Firing);
    assert_eq!(claimed.claimed_at, Some(t(9, 0)));

    let err = store.claim(&id, t(9, 0)).unwrap_err();
    assert!(matches!(err, SchedulerError::AlreadyClaimed { .. }));
}

#[test]
fn claim_before_due_is_refused() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert(&one_shot("r1", "alice", t(9, 0))).unwrap();

    let err = store.claim(&ReminderId::from("r1"), t(8, 59)).unwrap_err();
    assert!(matches!(err, SchedulerError::AlreadyClaimed { .. }));
    assert_eq!(
        store.get(&ReminderId::from("r1")).unwrap().status,
        ReminderStatus::Pending
    );
}

#[test]
fn claim_missing_is_not_found() {
    let store = SqliteStore::open_in_memory().unwrap();
    let err = store.claim(&ReminderId::from("ghost"), t(9, 0)).unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { .. }));
}

#[test]
fn concurrent_claims_have_exactly_one_winner() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.insert(&one_shot("r1", "alice", t(9, 0))).unwrap();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.claim(&ReminderId::from("r1"), t(9, 0)).is_ok())
        })
        .collect();
    let winners = workers
        .into_iter()
        .map(|w| w.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn separate_connections_share_one_claim() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reminders.db");
    let a = SqliteStore::open(&path).unwrap();
    let b = SqliteStore::open(&path).unwrap();
    a.insert(&one_shot("r1", "alice", t(9, 0))).unwrap();

    let id = ReminderId::from("r1");
    assert!(b.claim(&id, t(9, 0)).is_ok());
    assert!(matches!(
        a.claim(&id, t(9, 0)).unwrap_err(),
        SchedulerError::AlreadyClaimed { .. }
    ));
}

#[test]
fn complete_requires_firing() {
    let store = SqliteStore::open_in_memory().unwrap();
    let id = ReminderId::from("r1");
    store.insert(&one_shot("r1", "alice", t(9, 0))).unwrap();

    let err = store.complete(&id, Completion::Delivered, t(9, 0)).unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidStateTransition {
            from: ReminderStatus::Pending,
            ..
        }
    ));
}

#[test]
fn complete_delivered_is_terminal() {
    let store = SqliteStore::open_in_memory().unwrap();
    let id = ReminderId::from("r1");
    store.insert(&one_shot("r1", "alice", t(9, 0))).unwrap();
    store.claim(&id, t(9, 0)).unwrap();

    let done = store.complete(&id, Completion::Delivered, t(9, 1)).unwrap();
    assert_eq!(done.status, ReminderStatus::Delivered);
    assert_eq!(done.fired_count, 1);
    assert_eq!(done.claimed_at, None);
    assert!(store.next_due(t(23, 0), 10).unwrap().is_empty());
}

#[test]
fn rescheduled_advances_and_returns_to_pending() {
    let store = SqliteStore::open_in_memory().unwrap();
    let id = ReminderId::from("r1");
    store.insert(&daily("r1", t(9, 0))).unwrap();
    store.claim(&id, t(9, 0)).unwrap();

    let next = t(9, 0) + Duration::days(1);
    let r = store
        .complete(&id, Completion::Rescheduled { next }, t(9, 1))
        .unwrap();
    assert_eq!(r.status, ReminderStatus::Pending);
    assert_eq!(r.next_fire_at, next);
    assert_eq!(r.occurrence_at, next);
    assert_eq!(r.fired_count, 1);
}

#[test]
fn rescheduling_backwards_is_rejected() {
    let store = SqliteStore::open_in_memory().unwrap();
    let id = ReminderId::from("r1");
    store.insert(&daily("r1", t(9, 0))).unwrap();
    store.claim(&id, t(9, 0)).unwrap();

    let err = store
        .complete(&id, Completion::Rescheduled { next: t(8, 0) }, t(9, 1))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidStateTransition { .. }));
    assert_eq!(store.get(&id).unwrap().status, ReminderStatus::Firing);
}

#[test]
fn retry_keeps_occurrence_and_counts_attempts() {
    let store = SqliteStore::open_in_memory().unwrap();
    let id = ReminderId::from("r1");
    store.insert(&one_shot("r1", "alice", t(9, 0))).unwrap();
    store.claim(&id, t(9, 0)).unwrap();

    let r = store
        .complete(
            &id,
            Completion::Retry {
                retry_at: t(9, 1),
                error: "smtp 451".into(),
            },
            t(9, 0),
        )
        .unwrap();
    assert_eq!(r.status, ReminderStatus::Pending);
    assert_eq!(r.next_fire_at, t(9, 1));
    assert_eq!(r.occurrence_at, t(9, 0));
    assert_eq!(r.attempts, 1);
    assert_eq!(r.last_error.as_deref(), Some("smtp 451"));
}

#[test]
fn cancel_pending_and_failed_only() {
    let store = SqliteStore::open_in_memory().unwrap();
    for id in ["pending", "firing", "failed", "delivered"] {
        store.insert(&one_shot(id, "alice", t(9, 0))).unwrap();
    }
    let id = |s: &str| ReminderId::from(s);

    store.claim(&id("firing"), t(9, 0)).unwrap();
    store.claim(&id("failed"), t(9, 0)).unwrap();
    store
        .complete(&id("failed"), Completion::Failed { error: "bounced".into() }, t(9, 0))
        .unwrap();
    store.claim(&id("delivered"), t(9, 0)).unwrap();
    store
        .complete(&id("delivered"), Completion::Delivered, t(9, 0))
        .unwrap();

    assert_eq!(
        store.cancel(&id("pending"), t(9, 5)).unwrap().status,
        ReminderStatus::Cancelled
    );
    assert_eq!(
        store.cancel(&id("failed"), t(9, 5)).unwrap().status,
        ReminderStatus::Cancelled
    );

    for (name, from) in [
        ("firing", ReminderStatus::Firing),
        ("delivered", ReminderStatus::Delivered),
    ] {
        let err = store.cancel(&id(name), t(9, 5)).unwrap_err();
        assert!(
            matches!(err, SchedulerError::InvalidStateTransition { from: f, .. } if f == from),
            "{name}: {err}"
        );
    }
    // The in-flight attempt keeps its claim.
    assert_eq!(store.get(&id("firing")).unwrap().status, ReminderStatus::Firing);

    let err = store.cancel(&id("ghost"), t(9, 5)).unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { .. }));
}

#[test]
fn list_for_owner_filters() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert(&one_shot("a1", "alice", t(9, 0))).unwrap();
    store.insert(&one_shot("b1", "bob", t(9, 0))).unwrap();
    store.insert(&one_shot("a2", "alice", t(10, 0))).unwrap();

    let ids: Vec<String> = store
        .list_for_owner(&OwnerId::from("alice"))
        .unwrap()
        .into_iter()
        .map(|r| r.id.0)
        .collect();
    assert_eq!(ids, ["a1", "a2"]);
}

#[test]
fn reminders_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reminders.db");
    {
        let store = SqliteStore::open(&path).unwrap();
        store.insert(&one_shot("r1", "alice", t(9, 0))).unwrap();
        store.insert(&daily("r2", t(9, 30))).unwrap();
    }

    let reopened = SqliteStore::open(&path).unwrap();
    let due = reopened.next_due(t(10, 0), 10).unwrap();
    assert_eq!(due.len(), 2);
    assert!(reopened.claim(&ReminderId::from("r1"), t(10, 0)).is_ok());
    assert!(reopened.get(&ReminderId::from("r2")).unwrap().is_recurring());
}

#[test]
fn requeue_stale_recovers_old_claims_only() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert(&one_shot("old", "alice", t(9, 0))).unwrap();
    store.insert(&one_shot("fresh", "alice", t(9, 0))).unwrap();
    store.claim(&ReminderId::from("old"), t(9, 0)).unwrap();
    store.claim(&ReminderId::from("fresh"), t(9, 20)).unwrap();

    let n = store.requeue_stale(t(9, 10), t(9, 25)).unwrap();
    assert_eq!(n, 1);

    let old = store.get(&ReminderId::from("old")).unwrap();
    assert_eq!(old.status, ReminderStatus::Pending);
    assert_eq!(old.claimed_at, None);
    assert_eq!(
        store.get(&ReminderId::from("fresh")).unwrap().status,
        ReminderStatus::Firing
    );
}

#[test]
fn unreadable_pending_row_is_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reminders.db");
    let store = SqliteStore::open(&path).unwrap();
    store.insert(&one_shot("bad", "alice", t(9, 0))).unwrap();
    store.insert(&one_shot("good", "alice", t(9, 5))).unwrap();

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute(
        "UPDATE reminders SET time_spec = 'garbage' WHERE id = 'bad'",
        [],
    )
    .unwrap();

    let due = store.next_due(t(10, 0), 10).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id.as_str(), "good");

    // No longer pending, so it cannot pin the earliest wake time.
    assert_eq!(store.earliest_pending().unwrap(), Some(t(9, 5)));
    let (status, error): (String, Option<String>) = raw
        .query_row(
            "SELECT status, last_error FROM reminders WHERE id = 'bad'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(status, "failed");
    assert!(error.unwrap().starts_with("corrupt record"));
}
