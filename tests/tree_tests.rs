// tests/tree_tests.rs
use encrypted_db_codec::consts::REFERENCE_DEPTH_SENTINEL;
use encrypted_db_codec::model::ResolveStatus;
use encrypted_db_codec::{Database, EntryId};

mod common;
use common::{cheap_db, reload, setup, Flavor};

fn entry_with(db: &mut Database, title: &str, password: &str) -> EntryId {
    let root = db.root();
    let id = db.create_entry(root).unwrap();
    let entry = db.tree_mut().entry_mut(id).unwrap();
    entry.set_value("Title", title);
    entry.set_value("Password", password);
    id
}

fn resolved_password(db: &Database, id: EntryId) -> String {
    db.tree()
        .entry(id)
        .unwrap()
        .field("Password")
        .unwrap()
        .resolved_value()
        .to_owned()
}

#[test]
fn test_reference_is_resolved_after_load() {
    setup();
    let mut db = cheap_db(Flavor::V4, "pw");
    let target = entry_with(&mut db, "mail", "s3cret");
    let uuid = db.tree().entry(target).unwrap().uuid;
    entry_with(
        &mut db,
        "alias",
        &format!("{{REF:P@I:{}}}", uuid.as_simple().to_string().to_uppercase()),
    );
    let bytes = db.save().unwrap();

    let (back, _) = reload(&bytes, "pw");
    let tree = back.tree();
    let alias = tree
        .all_entries()
        .into_iter()
        .find(|id| tree.entry(*id).unwrap().title() == "alias")
        .unwrap();
    let field = tree.entry(alias).unwrap().field("Password").unwrap();
    assert_eq!(field.resolved_value(), "s3cret");
    assert_eq!(field.resolve_status(), ResolveStatus::Resolved);
    assert!(field.value().starts_with("{REF:P@I:"));
}

#[test]
fn test_long_reference_chain_stops_at_sentinel() {
    let mut db = cheap_db(Flavor::V4, "pw");
    let names = ["alpha", "bravo", "charlie", "delta", "echo"];
    let mut ids = Vec::new();
    for pair in names.windows(2) {
        ids.push(entry_with(
            &mut db,
            pair[0],
            &format!("{{REF:P@T:{}}}", pair[1]),
        ));
    }
    ids.push(entry_with(&mut db, "echo", "end"));
    db.resolve_references();

    // Three hops are allowed by default
    assert_eq!(resolved_password(&db, ids[1]), "end");
    assert_eq!(resolved_password(&db, ids[0]), REFERENCE_DEPTH_SENTINEL);
}

#[test]
fn test_mutual_references_terminate() {
    let mut db = cheap_db(Flavor::V3, "pw");
    let x = entry_with(&mut db, "xray", "{REF:P@T:yankee}");
    let y = entry_with(&mut db, "yankee", "{REF:P@T:xray}");
    db.resolve_references();
    assert_eq!(resolved_password(&db, x), REFERENCE_DEPTH_SENTINEL);
    assert_eq!(resolved_password(&db, y), REFERENCE_DEPTH_SENTINEL);
}

#[test]
fn test_missing_target_keeps_token() {
    let mut db = cheap_db(Flavor::V4, "pw");
    let id = entry_with(&mut db, "lonely", "pre {REF:U@T:nobody} post");
    db.resolve_references();
    let field = db.tree().entry(id).unwrap().field("Password").unwrap().clone();
    assert_eq!(field.resolved_value(), "pre {REF:U@T:nobody} post");
    assert_eq!(field.resolve_status(), ResolveStatus::TargetMissing);

    db.unresolve_references();
    let field = db.tree().entry(id).unwrap().field("Password").unwrap();
    assert_eq!(field.resolve_status(), ResolveStatus::NoReferences);
}

#[test]
fn test_delete_entry_recycles_then_tombstones() {
    setup();
    let mut db = cheap_db(Flavor::V4, "pw");
    let id = entry_with(&mut db, "doomed", "x");
    let uuid = db.tree().entry(id).unwrap().uuid;

    db.delete_entry(id).unwrap();
    let bin = db.backup_group(false).expect("recycle bin");
    let entry = db.tree().entry(id).unwrap();
    assert!(entry.is_deleted);
    assert_eq!(entry.parent(), Some(bin));
    let Database::Modern(modern) = &db else {
        panic!("expected a modern database");
    };
    assert!(modern.deleted_objects().is_empty());

    db.delete_entry(id).unwrap();
    assert!(db.tree().entry(id).is_none());
    let Database::Modern(modern) = &db else {
        panic!("expected a modern database");
    };
    assert_eq!(modern.deleted_objects().len(), 1);
    assert_eq!(modern.deleted_objects()[0].uuid, uuid);

    let bytes = db.save().unwrap();
    let (back, _) = reload(&bytes, "pw");
    let Database::Modern(back) = back else {
        panic!("expected a modern database");
    };
    assert_eq!(back.deleted_objects()[0].uuid, uuid);
}

#[test]
fn test_disabled_recycle_bin_deletes_immediately() {
    let mut db = cheap_db(Flavor::V3, "pw");
    if let Database::Modern(modern) = &mut db {
        modern.meta_mut().recycle_bin_enabled = false;
    }
    let id = entry_with(&mut db, "gone", "x");
    db.delete_entry(id).unwrap();
    assert!(db.tree().entry(id).is_none());
    assert!(db.backup_group(false).is_none());
}

#[test]
fn test_legacy_delete_moves_to_backup_group() {
    let mut db = cheap_db(Flavor::Legacy, "pw");
    let root = db.root();
    let general = db.create_group(root, "General").unwrap();
    let id = db.create_entry(general).unwrap();

    db.delete_entry(id).unwrap();
    let backup = db.backup_group(false).expect("backup group");
    assert_eq!(db.tree().group(backup).unwrap().name, "Backup");
    assert_eq!(db.tree().entry(id).unwrap().parent(), Some(backup));

    db.delete_entry(id).unwrap();
    assert!(db.tree().entry(id).is_none());
}

#[test]
fn test_group_cannot_move_into_own_subtree() {
    let mut db = cheap_db(Flavor::V4, "pw");
    let root = db.root();
    let parent = db.create_group(root, "parent").unwrap();
    let child = db.create_group(parent, "child").unwrap();
    assert!(db.tree_mut().move_group(parent, child).is_err());
    assert!(db.tree_mut().move_group(child, root).is_ok());
}

#[test]
fn test_erase_clears_everything() {
    let mut db = cheap_db(Flavor::V4, "pw");
    entry_with(&mut db, "secret", "value");
    db.erase();
    assert_eq!(db.tree().entry_count(), 0);
    assert_eq!(
        db.composite_key().state(),
        encrypted_db_codec::keys::KeyState::Empty
    );
}
