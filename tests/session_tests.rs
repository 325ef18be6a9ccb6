// tests/session_tests.rs
use std::sync::mpsc::Receiver;
use std::time::Duration;

use encrypted_db_codec::{
    CancelReason, Database, DatabaseError, DatabaseManager, ManagerEvent, Progress,
};
use tempfile::tempdir;

mod common;
use common::{cheap_db, key, setup, Flavor, LEGACY_ROUNDS_OFFSET};

const EVENT_TIMEOUT: Duration = Duration::from_secs(30);

fn saved(flavor: Flavor, password: &str) -> Vec<u8> {
    let mut db = cheap_db(flavor, password);
    let root = db.root();
    let group = db.create_group(root, "General").unwrap();
    let entry = db.create_entry(group).unwrap();
    db.tree_mut()
        .entry_mut(entry)
        .unwrap()
        .set_value("Title", "Router");
    db.save().unwrap()
}

/// Legacy file whose KDF would run for a very long time
fn endless_kdf_file() -> Vec<u8> {
    let mut bytes = saved(Flavor::Legacy, "pw");
    bytes[LEGACY_ROUNDS_OFFSET..LEGACY_ROUNDS_OFFSET + 4].copy_from_slice(&u32::MAX.to_le_bytes());
    bytes
}

fn wait_for(events: &Receiver<ManagerEvent>, wanted: impl Fn(&ManagerEvent) -> bool) -> Vec<ManagerEvent> {
    let mut seen = Vec::new();
    loop {
        let event = events.recv_timeout(EVENT_TIMEOUT).expect("manager event");
        let done = wanted(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[test]
fn test_load_publishes_events_and_opens_session() {
    setup();
    let manager = DatabaseManager::new();
    let events = manager.subscribe();
    let warnings = manager
        .load("home.db", &saved(Flavor::V4, "pw"), key("pw"))
        .unwrap();
    assert!(warnings.is_empty());

    let seen: Vec<_> = events.try_iter().collect();
    assert_eq!(seen.first(), Some(&ManagerEvent::WillLoad));
    assert!(matches!(seen.last(), Some(ManagerEvent::DidLoad { .. })));
    let fractions: Vec<f64> = seen
        .iter()
        .filter_map(|e| match e {
            ManagerEvent::ProgressChanged(f) => Some(*f),
            _ => None,
        })
        .collect();
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(fractions.last(), Some(&1.0));

    assert_eq!(manager.file_name().as_deref(), Some("home.db"));
    let count = manager.with_database(|db| db.tree().entry_count());
    assert_eq!(count, Some(1));
}

#[test]
fn test_wrong_key_reports_invalid_key_event() {
    let manager = DatabaseManager::new();
    let events = manager.subscribe();
    let result = manager.load("home.db", &saved(Flavor::V3, "pw"), key("nope"));
    assert!(matches!(result, Err(DatabaseError::InvalidKey)));
    let seen: Vec<_> = events.try_iter().collect();
    assert_eq!(seen.last(), Some(&ManagerEvent::InvalidKey));
    assert!(!manager.is_open());
}

#[test]
fn test_user_cancel_is_not_a_failure() {
    setup();
    let manager = DatabaseManager::new();
    let events = manager.subscribe();
    let handle = manager.start_load("slow.db".into(), endless_kdf_file(), key("pw"));

    wait_for(&events, |e| *e == ManagerEvent::WillLoad);
    assert!(manager.is_busy());
    manager.cancel(CancelReason::UserRequest);

    let result = handle.join().unwrap();
    assert!(matches!(
        result,
        Err(DatabaseError::Cancelled(CancelReason::UserRequest))
    ));
    let seen = wait_for(&events, |e| *e == ManagerEvent::LoadCancelled);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, ManagerEvent::LoadFailed { .. })));
    assert!(!manager.is_open());
    assert!(!manager.is_busy());
}

#[test]
fn test_low_memory_cancel_is_reported_as_failure() {
    let manager = DatabaseManager::new();
    let events = manager.subscribe();
    let handle = manager.start_load("slow.db".into(), endless_kdf_file(), key("pw"));

    wait_for(&events, |e| *e == ManagerEvent::WillLoad);
    manager.cancel(CancelReason::LowMemory);

    assert!(matches!(
        handle.join().unwrap(),
        Err(DatabaseError::LoadError { .. })
    ));
    wait_for(&events, |e| matches!(e, ManagerEvent::LoadFailed { .. }));
    assert!(!manager.is_open());
}

#[test]
fn test_second_load_is_refused_while_busy() {
    let manager = DatabaseManager::new();
    let events = manager.subscribe();
    let handle = manager.start_load("slow.db".into(), endless_kdf_file(), key("pw"));
    wait_for(&events, |e| *e == ManagerEvent::WillLoad);

    let second = manager.load("other.db", &saved(Flavor::V4, "pw"), key("pw"));
    match second {
        Err(DatabaseError::LoadError { reason }) => assert!(reason.contains("in progress")),
        other => panic!("unexpected {other:?}"),
    }

    manager.cancel(CancelReason::UserRequest);
    assert!(handle.join().unwrap().is_err());
}

#[test]
fn test_cancelled_progress_yields_no_database() {
    let progress = Progress::new();
    progress.cancel(CancelReason::UserRequest);
    let result = Database::load("x.db", &saved(Flavor::V4, "pw"), key("pw"), progress);
    assert!(matches!(
        result,
        Err(DatabaseError::Cancelled(CancelReason::UserRequest))
    ));
}

#[test]
fn test_save_and_close_through_manager() {
    setup();
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.db");
    std::fs::write(&path, saved(Flavor::V3, "pw")).unwrap();

    let manager = DatabaseManager::new();
    manager.load_file(&path, key("pw")).unwrap();
    manager
        .with_database(|db| {
            let root = db.root();
            db.create_group(root, "Added").map(|_| ())
        })
        .unwrap()
        .unwrap();

    let events = manager.subscribe();
    manager.save_to_file(&path).unwrap();
    manager.close().unwrap();
    let seen: Vec<_> = events.try_iter().collect();
    assert_eq!(seen.first(), Some(&ManagerEvent::WillSave));
    assert!(seen.contains(&ManagerEvent::DidSave));
    assert_eq!(
        &seen[seen.len() - 2..],
        &[ManagerEvent::WillClose, ManagerEvent::DidClose]
    );
    assert!(!manager.is_open());

    manager.load_file(&path, key("pw")).unwrap();
    let groups = manager.with_database(|db| db.tree().group_count()).unwrap();
    // root, General, Added
    assert_eq!(groups, 3);
}

#[test]
fn test_save_without_session_fails() {
    let manager = DatabaseManager::new();
    assert!(matches!(
        manager.save(),
        Err(DatabaseError::SaveError { .. })
    ));
}
