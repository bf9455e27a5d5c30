//! Asynchronous wrappers
//!
//! Tests that async dispatch matches sync dispatch and that Record awaits
//! the write before resolving.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use repro_cache::repro::fingerprint::fingerprint;
use repro_cache::util::paths::temp_path;
use repro_cache::{Deferred, Diagnostic, ErrorValue, ExecutionError, InterceptError, Mode, Value};
use serde_json::json;

use super::common::fixtures::{add, StorageFixture};

/// Test that an async recording is on disk as soon as the call resolves
#[tokio::test]
async fn test_async_record_is_durable_on_resolve() {
    let fixture = StorageFixture::new();
    fixture.interceptor.set_mode(Mode::Record);
    let fetch = fixture.interceptor.wrap_async(|args: Vec<Value>| async move {
        tokio::task::yield_now().await;
        add(&args)
    });

    let result = fetch
        .call(vec![Value::from(10), Value::from(5)])
        .await
        .expect("record should succeed");

    assert_eq!(result, Value::from(15));
    let key = fingerprint(&[Value::from(10), Value::from(5)]).unwrap();
    assert_eq!(fixture.read_storage().get(key.as_str()), Some(&json!(15)));
}

/// Test that async playback answers without polling the wrapped future
#[tokio::test]
async fn test_async_playback_does_not_invoke_function() {
    let fixture = StorageFixture::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch = {
        let calls = Arc::clone(&calls);
        fixture.interceptor.wrap_async(move |args: Vec<Value>| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { add(&args) }
        })
    };

    fixture.interceptor.set_mode(Mode::Record);
    fetch.call(vec![Value::from(3), Value::from(4)]).await.unwrap();

    fixture.interceptor.set_mode(Mode::Playback);
    let replayed = fetch.call(vec![Value::from(3), Value::from(4)]).await.unwrap();

    assert_eq!(replayed, Value::from(7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test that an async playback miss rejects with the argument list
#[tokio::test]
async fn test_async_playback_miss_is_not_found() {
    let fixture = StorageFixture::new();
    fixture.interceptor.set_mode(Mode::Playback);
    let fetch = fixture
        .interceptor
        .wrap_async(|args: Vec<Value>| async move { add(&args) });

    let err = fetch
        .call(vec![Value::from("x"), Value::Null])
        .await
        .unwrap_err();

    match err {
        InterceptError::NotFound { args } => assert_eq!(args, r#"["x",null]"#),
        other => panic!("Expected NotFound, got {other:?}"),
    }
}

/// Test that a failed write is reported by the time the async call resolves
#[tokio::test]
async fn test_async_record_persist_failure_does_not_reach_caller() {
    let fixture = StorageFixture::new();
    std::fs::create_dir(temp_path(&fixture.path)).unwrap();
    fixture.interceptor.set_mode(Mode::Record);
    let fetch = fixture
        .interceptor
        .wrap_async(|args: Vec<Value>| async move { add(&args) });

    let result = fetch.call(vec![Value::from(6), Value::from(7)]).await;

    assert_eq!(result.unwrap(), Value::from(13));
    assert!(!fixture.path.exists());
    assert!(matches!(
        fixture.sink.diagnostics().as_slice(),
        [Diagnostic::PersistFailed { .. }]
    ));
}

/// Test that an async failure in Record mode rejects and stores nothing
#[tokio::test]
async fn test_async_record_failure_is_not_stored() {
    let fixture = StorageFixture::new();
    fixture.interceptor.set_mode(Mode::Record);
    let fetch = fixture.interceptor.wrap_async(|_: Vec<Value>| async {
        Err::<Value, _>(ErrorValue::new("NetworkError", "connection reset"))
    });

    let err = fetch.call(vec![Value::from("url")]).await.unwrap_err();

    assert_eq!(err.to_string(), "NetworkError: connection reset");
    assert!(!fixture.path.exists());
    assert!(fixture.sink.is_empty());
}

/// Test that sync and async wrappers over one interceptor share recordings
#[tokio::test]
async fn test_sync_recording_plays_back_through_async_wrapper() {
    let fixture = StorageFixture::new();
    fixture.interceptor.set_mode(Mode::Record);
    fixture
        .interceptor
        .wrap(add)
        .call(&[Value::from(1), Value::from(1)])
        .unwrap();
    fixture.interceptor.flush();

    fixture.interceptor.set_mode(Mode::Playback);
    let fetch = fixture
        .interceptor
        .wrap_async(|_: Vec<Value>| async { Err::<Value, _>(ErrorValue::new("Error", "unused")) });

    let replayed = fetch
        .call(vec![Value::from(1), Value::from(1)])
        .await
        .unwrap();
    assert_eq!(replayed, Value::from(2));
}

/// Test that a recorded promise plays back as a placeholder that cannot settle
#[tokio::test]
async fn test_recorded_promise_plays_back_unrestorable() {
    let fixture = StorageFixture::new();
    fixture.interceptor.set_mode(Mode::Record);
    let spawn_job = fixture.interceptor.wrap(|_: &[Value]| -> Result<Value, ErrorValue> {
        Ok(Value::object([(
            "job",
            Value::from(Deferred::new(async { Ok(Value::from("done")) })),
        )]))
    });

    let original = spawn_job.call(&[]).unwrap();
    fixture.interceptor.flush();

    let stored = fixture.read_storage();
    assert_eq!(
        stored.values().next(),
        Some(&json!({"job": {"__type": "Promise", "status": "pending"}}))
    );

    fixture.interceptor.set_mode(Mode::Playback);
    let replayed = spawn_job.call(&[]).unwrap();

    let Some(Value::Promise(original_job)) = original.get("job") else {
        panic!("Expected the original promise");
    };
    assert_eq!(original_job.settle().await, Ok(Value::from("done")));

    let Some(Value::Promise(replayed_job)) = replayed.get("job") else {
        panic!("Expected a placeholder promise");
    };
    assert!(matches!(
        replayed_job.settle().await,
        Err(ExecutionError::CannotRestore)
    ));
}
