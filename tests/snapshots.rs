//! Snapshot, restore, and poison recovery.

mod common;

use common::{init_logs, loaded_with, COUNTER, ECHO};
use jsbox::{CallOptions, SandboxBuilder};
use serde_json::json;

#[test]
fn restore_rolls_guest_state_back() {
    init_logs();
    let mut sandbox = loaded_with("count", COUNTER).unwrap();
    let options = CallOptions::default();

    assert_eq!(
        sandbox.call_handler("count", &json!({}), &options).unwrap()["count"],
        json!(1)
    );

    // Capture after one call, advance two more, then roll back.
    let snapshot = sandbox.snapshot().unwrap();

    assert_eq!(
        sandbox.call_handler("count", &json!({}), &options).unwrap()["count"],
        json!(2)
    );
    assert_eq!(
        sandbox.call_handler("count", &json!({}), &options).unwrap()["count"],
        json!(3)
    );

    sandbox.restore(&snapshot).unwrap();

    assert_eq!(
        sandbox.call_handler("count", &json!({}), &options).unwrap()["count"],
        json!(2),
        "the counter should resume from the captured state"
    );
}

#[test]
fn snapshot_then_restore_is_observably_identity() {
    init_logs();
    let mut sandbox = loaded_with("echo", ECHO).unwrap();

    let snapshot = sandbox.snapshot().unwrap();
    assert!(snapshot.size_bytes() > 0);
    sandbox.restore(&snapshot).unwrap();

    let event = json!({"x": [1, 2, 3]});
    let result = sandbox
        .call_handler("echo", &event, &CallOptions::default())
        .unwrap();
    assert_eq!(result, event);
    assert!(!sandbox.poisoned());
}

#[test]
fn restore_can_be_applied_repeatedly() {
    init_logs();
    let mut sandbox = loaded_with("count", COUNTER).unwrap();
    let options = CallOptions::default();

    sandbox.call_handler("count", &json!({}), &options).unwrap();
    let snapshot = sandbox.snapshot().unwrap();

    for _ in 0..3 {
        assert_eq!(
            sandbox.call_handler("count", &json!({}), &options).unwrap()["count"],
            json!(2)
        );
        sandbox.restore(&snapshot).unwrap();
    }
}

#[test]
fn foreign_snapshot_rejected() {
    init_logs();
    let mut first = loaded_with("echo", ECHO).unwrap();
    let mut second = loaded_with("echo", ECHO).unwrap();

    let snapshot = first.snapshot().unwrap();
    let err = second.restore(&snapshot).unwrap_err();
    assert_eq!(err.code(), "invalid-arg");

    // The refused restore leaves the target untouched.
    assert!(!second.poisoned());
    second
        .call_handler("echo", &json!({}), &CallOptions::default())
        .unwrap();
}

#[test]
fn restore_clears_poison() {
    init_logs();
    let mut runtime = SandboxBuilder::new().build().unwrap().load_runtime().unwrap();
    runtime.add_handler("echo", ECHO).unwrap();
    runtime
        .add_handler("boom", "function handler(e) { throw new Error(\"fatal\"); }")
        .unwrap();
    let mut sandbox = runtime.load_handlers().unwrap();

    let snapshot = sandbox.snapshot().unwrap();

    let err = sandbox
        .call_handler("boom", &json!({}), &CallOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), "guest-abort");
    assert!(sandbox.poisoned());

    sandbox.restore(&snapshot).unwrap();
    assert!(!sandbox.poisoned());

    let result = sandbox
        .call_handler("echo", &json!({"back": true}), &CallOptions::default())
        .unwrap();
    assert_eq!(result, json!({"back": true}));
}

#[test]
fn snapshot_survives_unload_and_reload() {
    init_logs();
    let mut runtime = SandboxBuilder::new().build().unwrap().load_runtime().unwrap();
    runtime.add_handler("count", COUNTER).unwrap();
    let mut sandbox = runtime.load_handlers().unwrap();
    let options = CallOptions::default();

    sandbox.call_handler("count", &json!({}), &options).unwrap();
    let snapshot = sandbox.snapshot().unwrap();

    // Tear the handlers down and load a different registry.
    let mut runtime = sandbox.unload().unwrap();
    runtime
        .add_handler("other", "function handler(e) { return \"other\"; }")
        .unwrap();
    let mut sandbox = runtime.load_handlers().unwrap();
    assert_eq!(
        sandbox.call_handler("other", &json!({}), &options).unwrap(),
        json!("other")
    );

    // Restoring brings back the old world: the counter handler and its
    // state, and the new routing key is gone.
    sandbox.restore(&snapshot).unwrap();
    assert_eq!(
        sandbox.call_handler("count", &json!({}), &options).unwrap()["count"],
        json!(2)
    );
    assert_eq!(
        sandbox
            .call_handler("other", &json!({}), &options)
            .unwrap_err()
            .code(),
        "invalid-arg"
    );
}

#[test]
fn snapshot_clones_share_the_capture() {
    init_logs();
    let mut sandbox = loaded_with("count", COUNTER).unwrap();
    let options = CallOptions::default();

    sandbox.call_handler("count", &json!({}), &options).unwrap();
    let snapshot = sandbox.snapshot().unwrap();
    let clone = snapshot.clone();
    drop(snapshot);

    // The clone keeps the capture alive and restorable.
    sandbox.call_handler("count", &json!({}), &options).unwrap();
    sandbox.restore(&clone).unwrap();
    assert_eq!(
        sandbox.call_handler("count", &json!({}), &options).unwrap()["count"],
        json!(2)
    );
}
