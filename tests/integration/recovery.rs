//! Corrupt storage recovery
//!
//! Tests that an unreadable storage file is moved aside, replaced by an
//! empty mapping, and never blocks later recordings.

use std::fs;

use anyhow::Result;
use repro_cache::repro::codec::MAX_DEPTH;
use repro_cache::repro::fingerprint::fingerprint;
use repro_cache::util::paths::{BACKUP_MARKER, TEMP_SUFFIX};
use repro_cache::{Diagnostic, ErrorValue, Interceptor, Mode, Value};
use serde_json::json;

use super::common::fixtures::{add, StorageFixture};

fn backups(fixture: &StorageFixture) -> Vec<String> {
    fixture
        .files()
        .into_iter()
        .filter(|name| name.contains(BACKUP_MARKER))
        .collect()
}

/// Test that a file that is not JSON is backed up and playback then misses
#[test]
fn test_corrupt_file_is_backed_up_and_playback_misses() {
    let fixture = StorageFixture::new();
    fs::write(&fixture.path, "{ this is not json").unwrap();
    fixture.interceptor.set_mode(Mode::Playback);

    let err = fixture
        .interceptor
        .wrap(add)
        .call(&[Value::from(1), Value::from(2)])
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(!fixture.path.exists());

    let backups = backups(&fixture);
    assert_eq!(backups.len(), 1);
    assert!(backups[0].starts_with("calls.json.corrupt-"));
    let preserved = fs::read_to_string(fixture.dir.path().join(&backups[0])).unwrap();
    assert_eq!(preserved, "{ this is not json");

    let diagnostics = fixture.sink.diagnostics();
    match diagnostics.as_slice() {
        [Diagnostic::Corruption { error, backup }] => {
            assert_eq!(error.path, fixture.path);
            assert_eq!(backup, &fixture.dir.path().join(&backups[0]));
        }
        other => panic!("Expected one Corruption diagnostic, got {other:?}"),
    }
}

/// Test that recording after recovery starts a fresh file and keeps the backup
#[test]
fn test_record_after_corruption_writes_fresh_file() {
    let fixture = StorageFixture::new();
    fs::write(&fixture.path, "[1, 2, 3]").unwrap();
    fixture.interceptor.set_mode(Mode::Record);

    let result = fixture
        .interceptor
        .wrap(add)
        .call(&[Value::from(2), Value::from(2)])
        .expect("record should succeed after recovery");
    fixture.interceptor.flush();

    assert_eq!(result, Value::from(4));
    let stored = fixture.read_storage();
    assert_eq!(stored.len(), 1);
    let key = fingerprint(&[Value::from(2), Value::from(2)]).unwrap();
    assert_eq!(stored.get(key.as_str()), Some(&json!(4)));
    assert_eq!(backups(&fixture).len(), 1);
}

/// Test that a malformed special-value envelope counts as corruption
#[test]
fn test_malformed_envelope_is_corruption() {
    let fixture = StorageFixture::new();
    let contents = json!({
        "00000000000000000000000000000000": {"__type": "Date", "value": "yesterday"}
    });
    fs::write(&fixture.path, contents.to_string()).unwrap();

    fixture.interceptor.store().load().expect("load should recover");

    assert!(fixture.interceptor.store().is_empty());
    assert_eq!(backups(&fixture).len(), 1);
    assert!(matches!(
        fixture.sink.diagnostics().as_slice(),
        [Diagnostic::Corruption { .. }]
    ));
}

/// Test that an empty file is treated as corrupt rather than as no recordings
#[test]
fn test_empty_file_is_corruption() -> Result<()> {
    let fixture = StorageFixture::new();
    fs::write(&fixture.path, "")?;

    fixture.interceptor.store().load()?;

    assert!(fixture.interceptor.store().is_empty());
    assert_eq!(backups(&fixture).len(), 1);
    Ok(())
}

/// Test that a missing file is an empty mapping and is not created by playback
#[test]
fn test_missing_file_is_empty_and_not_created() {
    let fixture = StorageFixture::new();
    fixture.interceptor.set_mode(Mode::Playback);

    let err = fixture
        .interceptor
        .wrap(add)
        .call(&[Value::from(7), Value::from(8)])
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(fixture.files().is_empty());
    assert!(fixture.sink.is_empty());
}

/// Test that successful persists leave no temporary files behind
#[test]
fn test_persist_leaves_no_temp_files() {
    let fixture = StorageFixture::new();
    fixture.interceptor.set_mode(Mode::Record);
    let wrapped = fixture.interceptor.wrap(add);

    for n in 0..5 {
        wrapped.call(&[Value::from(n), Value::from(n)]).unwrap();
    }
    fixture.interceptor.flush();

    assert_eq!(fixture.files(), vec!["calls.json".to_string()]);
    assert!(fixture
        .files()
        .iter()
        .all(|name| !name.ends_with(TEMP_SUFFIX)));
    assert_eq!(fixture.read_storage().len(), 5);
}

/// Test that the store loads once and only rereads after a reset
#[test]
fn test_load_is_cached_until_reset() -> Result<()> {
    let fixture = StorageFixture::new();
    let store = fixture.interceptor.store();
    store.load()?;
    assert!(store.is_empty());

    let key = fingerprint(&[Value::from("late")])?;
    let mut contents = serde_json::Map::new();
    contents.insert(key.to_string(), json!("written elsewhere"));
    fs::write(&fixture.path, serde_json::Value::Object(contents).to_string())?;

    store.load()?;
    assert!(store.is_empty());

    store.reset();
    store.load()?;
    assert_eq!(store.get(&key), Some(Value::from("written elsewhere")));
    Ok(())
}

/// Test that the deepest recordable result never makes the file unloadable
#[test]
fn test_deeply_nested_recording_keeps_file_loadable() {
    let fixture = StorageFixture::new();
    fixture.interceptor.set_mode(Mode::Record);
    let nest = fixture
        .interceptor
        .wrap(|args: &[Value]| -> Result<Value, ErrorValue> {
            let levels = args.first().and_then(Value::as_i64).unwrap_or_default();
            let mut value = Value::Null;
            for _ in 0..levels {
                value = Value::array(vec![value]);
            }
            Ok(value)
        });

    fixture
        .interceptor
        .wrap(add)
        .call(&[Value::from(1), Value::from(1)])
        .unwrap();
    let deepest = nest.call(&[Value::from(MAX_DEPTH as i64)]).unwrap();
    let too_deep = nest.call(&[Value::from(MAX_DEPTH as i64 + 1)]).unwrap();
    fixture.interceptor.flush();

    assert!(too_deep.get("0").is_some());
    assert!(matches!(
        fixture.sink.diagnostics().as_slice(),
        [Diagnostic::RecordSkipped { .. }]
    ));

    let replay = Interceptor::with_sink(&fixture.path, fixture.sink.clone());
    replay.set_mode(Mode::Playback);
    let replayed = replay
        .wrap(nest_unused)
        .call(&[Value::from(MAX_DEPTH as i64)])
        .unwrap();
    assert_eq!(replayed, deepest);
    assert_eq!(
        replay.wrap(add).call(&[Value::from(1), Value::from(1)]).unwrap(),
        Value::from(2)
    );
    assert!(backups(&fixture).is_empty());
    assert_eq!(fixture.sink.diagnostics().len(), 1);
}

fn nest_unused(_: &[Value]) -> Result<Value, ErrorValue> {
    Err(ErrorValue::new("Error", "playback must not call through"))
}
