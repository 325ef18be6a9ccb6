// tests/key_tests.rs
use std::sync::Arc;

use encrypted_db_codec::aliases::SecretBytes;
use encrypted_db_codec::error::ChallengeResponseError;
use encrypted_db_codec::keys::ResponseSender;
use encrypted_db_codec::{
    ChallengeHandler, CompositeKey, Database, DatabaseError, KeyFileSource, Progress,
};
use tempfile::tempdir;

mod common;
use common::{cheap_db, setup, Flavor, ALL_FLAVORS};

fn responder(byte: u8) -> Arc<dyn ChallengeHandler> {
    Arc::new(move |challenge: &[u8], sender: ResponseSender| {
        assert!(!challenge.is_empty());
        sender.send(Ok(SecretBytes::new(vec![byte; 20])));
    })
}

fn rekeyed(flavor: Flavor, key: CompositeKey) -> Vec<u8> {
    let mut db = cheap_db(flavor, "unused");
    let root = db.root();
    let group = db.create_group(root, "General").unwrap();
    db.create_entry(group).unwrap();
    db.change_composite_key(key);
    db.save().unwrap()
}

#[test]
fn test_challenge_response_is_part_of_the_key() {
    setup();
    for flavor in [Flavor::V3, Flavor::V4] {
        let bytes = rekeyed(flavor, CompositeKey::new("pw", None, Some(responder(1))));

        let same = CompositeKey::new("pw", None, Some(responder(1)));
        assert!(Database::load("c.db", &bytes, same, Progress::new()).is_ok());

        let other = CompositeKey::new("pw", None, Some(responder(2)));
        assert!(
            matches!(
                Database::load("c.db", &bytes, other, Progress::new()),
                Err(DatabaseError::InvalidKey)
            ),
            "{flavor:?}"
        );

        let missing = CompositeKey::from_password("pw");
        assert!(matches!(
            Database::load("c.db", &bytes, missing, Progress::new()),
            Err(DatabaseError::InvalidKey)
        ));
    }
}

#[test]
fn test_challenge_failure_reason_reaches_the_caller() {
    let bytes = rekeyed(Flavor::V4, CompositeKey::from_password("pw"));
    let failing: Arc<dyn ChallengeHandler> = Arc::new(|_: &[u8], sender: ResponseSender| {
        sender.send(Err(ChallengeResponseError::Hardware("token unplugged".into())));
    });
    let key = CompositeKey::new("pw", None, Some(failing));
    match Database::load("c.db", &bytes, key, Progress::new()) {
        Err(DatabaseError::LoadError { reason }) => assert!(reason.contains("token unplugged")),
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_legacy_refuses_challenge_response_keys() {
    let mut db = cheap_db(Flavor::Legacy, "pw");
    db.change_composite_key(CompositeKey::new("pw", None, Some(responder(1))));
    assert!(matches!(db.save(), Err(DatabaseError::SaveError { .. })));
}

#[test]
fn test_key_file_on_disk_is_required_to_open() {
    setup();
    let dir = tempdir().unwrap();
    let key_path = dir.path().join("db.key");
    std::fs::write(&key_path, b"some arbitrary key file contents\n").unwrap();

    for flavor in ALL_FLAVORS {
        let with_file =
            || CompositeKey::new("pw", Some(KeyFileSource::Path(key_path.clone())), None);
        let bytes = rekeyed(flavor, with_file());

        assert!(
            Database::load("k.db", &bytes, with_file(), Progress::new()).is_ok(),
            "{flavor:?}"
        );
        assert!(matches!(
            Database::load("k.db", &bytes, CompositeKey::from_password("pw"), Progress::new()),
            Err(DatabaseError::InvalidKey)
        ));
    }
}

#[test]
fn test_hex_and_raw_key_files_are_equivalent() {
    let raw = [0x5Au8; 32];
    let hex_text = hex::encode(raw);
    for flavor in ALL_FLAVORS {
        let raw_key = CompositeKey::new(
            "",
            Some(KeyFileSource::Bytes(SecretBytes::new(raw.to_vec()))),
            None,
        );
        let bytes = rekeyed(flavor, raw_key);
        let hex_key = CompositeKey::new(
            "",
            Some(KeyFileSource::Bytes(SecretBytes::new(hex_text.clone().into_bytes()))),
            None,
        );
        assert!(
            Database::load("k.db", &bytes, hex_key, Progress::new()).is_ok(),
            "{flavor:?}"
        );
    }
}

#[test]
fn test_xml_key_file_v1_is_decoded() {
    use base64::Engine;
    let data = [0x11u8; 32];
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<KeyFile><Meta><Version>1.00</Version></Meta>\
         <Key><Data>{}</Data></Key></KeyFile>",
        base64::engine::general_purpose::STANDARD.encode(data)
    );
    let from_xml = CompositeKey::new(
        "pw",
        Some(KeyFileSource::Bytes(SecretBytes::new(xml.into_bytes()))),
        None,
    );
    let bytes = rekeyed(Flavor::V4, from_xml);
    let from_raw = CompositeKey::new(
        "pw",
        Some(KeyFileSource::Bytes(SecretBytes::new(data.to_vec()))),
        None,
    );
    assert!(Database::load("k.db", &bytes, from_raw, Progress::new()).is_ok());
}
