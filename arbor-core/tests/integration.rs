//! Integration Tests for the Reactive Engine
//!
//! These tests exercise the observation and tracking layers together:
//! rooted paths, pipe teardown, aggregate list events, and dependency
//! re-derivation with the debounced invalidation signal.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use arbor_core::{
    memoize, unwatch, watch, wrap, ChangeEvent, Computed, Error, EventFilter, EventKind, Key,
    Value,
};

/// Debounce window used by timing-sensitive tests.
const WINDOW: Duration = Duration::from_millis(10);
/// Comfortably longer than WINDOW, so a pending invalidation has landed.
const SETTLE: Duration = Duration::from_millis(200);

fn record_events(root: &arbor_core::Observable) -> Arc<Mutex<Vec<ChangeEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    root.watch(EventFilter::Any, move |event| {
        events_clone.lock().unwrap().push(event.clone());
    });
    events
}

#[test]
fn nested_mutation_reaches_root_with_full_path() {
    let state = Value::map_from([(
        "a",
        Value::map_from([("b", Value::map_from([("c", Value::Int(0))]))]),
    )]);
    let root = wrap(&state).unwrap();
    let events = record_events(&root);

    root.child("a")
        .unwrap()
        .child("b")
        .unwrap()
        .set("c", 7)
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].path.as_slice(),
        [Key::from("a"), Key::from("b"), Key::from("c")]
    );
    assert_eq!(events[0].value, Some(Value::Int(7)));
    assert_eq!(events[0].kind, EventKind::Set);
}

#[test]
fn direct_events_only_on_the_mutated_value() {
    let state = Value::map_from([("inner", Value::map())]);
    let root = wrap(&state).unwrap();
    let inner = root.child("inner").unwrap();

    let root_events = record_events(&root);
    let inner_events = record_events(&inner);

    inner.set("x", 1).unwrap();

    // The child bus got the direct single-segment event; the root bus got
    // only the re-pathed pipe event, not a duplicate direct one.
    let root_events = root_events.lock().unwrap();
    let inner_events = inner_events.lock().unwrap();
    assert_eq!(inner_events.len(), 1);
    assert_eq!(inner_events[0].path.as_slice(), [Key::from("x")]);
    assert_eq!(root_events.len(), 1);
    assert_eq!(
        root_events[0].path.as_slice(),
        [Key::from("inner"), Key::from("x")]
    );
}

#[test]
fn noop_write_fires_nothing() {
    let state = Value::map();
    let root = wrap(&state).unwrap();
    root.set("n", 1).unwrap();
    let shared = Value::map();
    root.set("child", shared.clone()).unwrap();

    let events = record_events(&root);
    root.set("n", 1).unwrap();
    root.set("child", shared).unwrap();
    assert!(events.lock().unwrap().is_empty());
}

#[test]
fn overwritten_child_stops_propagating() {
    let state = Value::map();
    let root = wrap(&state).unwrap();

    let old_child = Value::map();
    root.set("a", old_child.clone()).unwrap();
    let old_child_obs = root.child("a").unwrap();

    root.set("a", Value::map()).unwrap();
    let events = record_events(&root);

    // Mutating the detached child must not reach the root.
    old_child_obs.set("x", 1).unwrap();
    assert!(events.lock().unwrap().is_empty());

    // The replacement child still propagates.
    root.child("a").unwrap().set("x", 1).unwrap();
    assert_eq!(events.lock().unwrap().len(), 1);
}

#[test]
fn deleted_child_stops_propagating() {
    let state = Value::map_from([("a", Value::map())]);
    let root = wrap(&state).unwrap();
    let child = root.child("a").unwrap();

    root.remove("a").unwrap();
    let events = record_events(&root);
    child.set("x", 1).unwrap();
    assert!(events.lock().unwrap().is_empty());
}

#[test]
fn structurally_removed_child_stops_propagating() {
    let state = Value::list_from([Value::map()]);
    let list = wrap(&state).unwrap();
    let element = list.child(0usize).unwrap();

    list.pop().unwrap();
    let events = record_events(&list);
    element.set("x", 1).unwrap();
    assert!(events.lock().unwrap().is_empty());
}

#[test]
fn splice_unpipes_removed_and_rekeys_survivors() {
    let state = Value::list_from([Value::map(), Value::map(), Value::map()]);
    let list = wrap(&state).unwrap();
    let removed = list.child(1usize).unwrap();
    let survivor = list.child(2usize).unwrap();

    list.splice(1, 1, Vec::new()).unwrap();
    let events = record_events(&list);

    removed.set("x", 1).unwrap();
    assert!(events.lock().unwrap().is_empty());

    // The survivor moved from index 2 to index 1 and its pipe moved with it.
    survivor.set("y", 2).unwrap();
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].path.as_slice(),
        [Key::from(1usize), Key::from("y")]
    );
}

#[test]
fn delete_keeps_its_kind_when_piped() {
    let state = Value::map_from([("a", Value::map_from([("x", Value::Int(1))]))]);
    let root = wrap(&state).unwrap();
    let events = record_events(&root);

    root.child("a").unwrap().remove("x").unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Delete);
    assert_eq!(events[0].path.as_slice(), [Key::from("a"), Key::from("x")]);
    assert_eq!(events[0].value, None);
    assert_eq!(events[0].old_value, Some(Value::Int(1)));
}

#[test]
fn push_fires_single_length_event() {
    let state = Value::list_from([Value::Int(1), Value::Int(2), Value::Int(3)]);
    let list = wrap(&state).unwrap();
    let events = record_events(&list);

    assert_eq!(list.push(4).unwrap(), 4);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path.as_slice(), [Key::Length]);
    assert_eq!(events[0].kind, EventKind::Set);
    assert_eq!(events[0].old_value, Some(Value::Int(3)));
    assert_eq!(events[0].value, Some(Value::Int(4)));
}

#[test]
fn structural_methods_report_only_length() {
    let state = Value::list_from([Value::Int(1), Value::Int(2)]);
    let list = wrap(&state).unwrap();
    let events = record_events(&list);

    list.unshift(0).unwrap(); // 3 elements
    list.pop().unwrap(); // 2
    list.shift().unwrap(); // 1
    list.splice(0, 1, [Value::Int(8), Value::Int(9)]).unwrap(); // 2
    list.reverse().unwrap(); // no length change
    list.splice(0, 2, [Value::Int(5), Value::Int(6)]).unwrap(); // no length change

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.path.as_slice() == [Key::Length]));
}

#[test]
fn piped_length_events_reach_the_root() {
    let state = Value::map_from([("items", Value::list())]);
    let root = wrap(&state).unwrap();
    let events = record_events(&root);

    root.child("items").unwrap().push("first").unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path.as_slice(), [Key::from("items"), Key::Length]);
}

#[test]
fn watcher_sees_fresh_subtree_mutations() {
    // root = {l1: {l2: "x"}}; add a fresh map, then mutate inside it.
    let state = Value::map_from([("l1", Value::map_from([("l2", Value::from("x"))]))]);
    let root = wrap(&state).unwrap();
    let events = record_events(&root);

    root.set("test", Value::map()).unwrap();
    root.child("test").unwrap().set("t", "10").unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].path.as_slice(), [Key::from("test")]);
    assert_eq!(
        events[1].path.as_slice(),
        [Key::from("test"), Key::from("t")]
    );
    assert_eq!(events[1].value, Some(Value::from("10")));
}

#[test]
fn watch_requires_a_wrapped_composite() {
    assert!(matches!(
        watch(&Value::Int(1), EventFilter::Any, |_| {}),
        Err(Error::NotComposite(_))
    ));
    assert!(matches!(
        watch(&Value::map(), EventFilter::Any, |_| {}),
        Err(Error::NotObservable)
    ));

    let value = Value::map();
    wrap(&value).unwrap();
    assert!(watch(&value, EventFilter::Any, |_| {}).is_ok());
}

#[test]
fn each_registration_is_independently_removable() {
    let state = Value::map();
    let root = wrap(&state).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let calls_clone = calls.clone();
    let via_kind = watch(&state, EventFilter::Kind(EventKind::Set), move |_| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    let calls_clone = calls.clone();
    let via_any = watch(&state, EventFilter::Any, move |_| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    root.set("n", 1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(unwatch(&state, via_kind).unwrap());
    root.set("n", 2).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert!(unwatch(&state, via_any).unwrap());
    assert!(!unwatch(&state, via_any).unwrap());
    root.set("n", 3).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn memoized_invalidates_once_per_dependency_change() {
    let state = Value::map_from([
        ("a", Value::map_from([("value", Value::Int(1))])),
        ("b", Value::Int(0)),
    ]);
    let root = wrap(&state).unwrap();

    let reader = root.clone();
    let computed = Computed::with_debounce(
        move || {
            reader
                .child("a")
                .unwrap()
                .get("value")
                .and_then(|v| v.as_int())
                .unwrap_or(0)
        },
        WINDOW,
    );
    let invalidations = Arc::new(AtomicUsize::new(0));
    let invalidations_clone = invalidations.clone();
    computed.signal().on_invalidate(move || {
        invalidations_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(computed.get(), 1);
    assert!(computed.dependency_count() >= 2); // root."a" and a."value"

    // One logical update: the leaf event plus its piped ancestor coalesce
    // into exactly one signal.
    root.child("a").unwrap().set("value", 2).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    assert!(computed.is_dirty());
    assert_eq!(computed.get(), 2);

    // Unrelated fields never wake the computed.
    root.set("b", 5).unwrap();
    root.set("c", "noise").unwrap();
    thread::sleep(SETTLE);
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    assert!(!computed.is_dirty());
}

#[test]
fn memoized_rederives_dependencies_each_run() {
    let state = Value::map_from([
        ("flag", Value::Bool(true)),
        ("x", Value::map_from([("v", Value::Int(1))])),
        ("y", Value::map_from([("v", Value::Int(2))])),
    ]);
    let root = wrap(&state).unwrap();

    let reader = root.clone();
    let computed = Computed::with_debounce(
        move || {
            let branch = if reader.get("flag") == Some(Value::Bool(true)) {
                "x"
            } else {
                "y"
            };
            reader
                .child(branch)
                .unwrap()
                .get("v")
                .and_then(|v| v.as_int())
                .unwrap_or(0)
        },
        WINDOW,
    );
    let invalidations = Arc::new(AtomicUsize::new(0));
    let invalidations_clone = invalidations.clone();
    computed.signal().on_invalidate(move || {
        invalidations_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(computed.get(), 1);

    // Switch branches; the flag is a dependency.
    root.set("flag", false).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(computed.get(), 2);

    // The old branch is no longer a dependency...
    root.child("x").unwrap().set("v", 100).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);

    // ...but the new one is.
    root.child("y").unwrap().set("v", 200).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(invalidations.load(Ordering::SeqCst), 2);
    assert_eq!(computed.get(), 200);
}

#[test]
fn memoize_pairs_signal_and_value() {
    let state = Value::map_from([("n", Value::Int(3))]);
    let root = wrap(&state).unwrap();

    let reader = root.clone();
    let (signal, doubled) =
        memoize(move || reader.get("n").and_then(|v| v.as_int()).unwrap_or(0) * 2);

    let invalidations = Arc::new(AtomicUsize::new(0));
    let invalidations_clone = invalidations.clone();
    signal.on_invalidate(move || {
        invalidations_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(doubled.get(), 6);
    root.set("n", 5).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(doubled.get(), 10);
}

#[test]
fn panicking_computation_leaves_tracking_usable() {
    let state = Value::map_from([("a", Value::Int(1))]);
    let root = wrap(&state).unwrap();

    let reader = root.clone();
    let bomb: Computed<i64> = Computed::new(move || {
        let _ = reader.get("a");
        panic!("computation failed");
    });
    assert!(catch_unwind(AssertUnwindSafe(|| bomb.get())).is_err());

    // The collection session was closed on unwind; a fresh computed still
    // tracks correctly.
    let reader = root.clone();
    let healthy = Computed::with_debounce(
        move || reader.get("a").and_then(|v| v.as_int()).unwrap_or(0),
        WINDOW,
    );
    let invalidations = Arc::new(AtomicUsize::new(0));
    let invalidations_clone = invalidations.clone();
    healthy.signal().on_invalidate(move || {
        invalidations_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(healthy.get(), 1);
    root.set("a", 2).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(healthy.get(), 2);
}

#[test]
fn nested_computed_calls_compose() {
    let state = Value::map_from([("n", Value::Int(10))]);
    let root = wrap(&state).unwrap();

    let reader = root.clone();
    let inner = Computed::with_debounce(
        move || reader.get("n").and_then(|v| v.as_int()).unwrap_or(0),
        WINDOW,
    );

    let inner_clone = inner.clone();
    let outer = Computed::with_debounce(move || inner_clone.get() + 1, WINDOW);
    let invalidations = Arc::new(AtomicUsize::new(0));
    let invalidations_clone = invalidations.clone();
    outer.signal().on_invalidate(move || {
        invalidations_clone.fetch_add(1, Ordering::SeqCst);
    });

    // The outer evaluation nests the inner one; the inner's reads land in
    // both sessions.
    assert_eq!(outer.get(), 11);

    root.set("n", 20).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(inner.get(), 20);
    assert_eq!(outer.get(), 21);
}

#[test]
fn list_length_is_a_trackable_dependency() {
    let state = Value::map_from([("items", Value::list_from([Value::Int(1)]))]);
    let root = wrap(&state).unwrap();

    let reader = root.clone();
    let count = Computed::with_debounce(
        move || reader.child("items").unwrap().len() as i64,
        WINDOW,
    );
    let invalidations = Arc::new(AtomicUsize::new(0));
    let invalidations_clone = invalidations.clone();
    count.signal().on_invalidate(move || {
        invalidations_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(count.get(), 1);
    root.child("items").unwrap().push(2).unwrap();
    thread::sleep(SETTLE);
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(count.get(), 2);
}
