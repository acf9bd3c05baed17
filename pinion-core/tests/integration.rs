//! Integration Tests for Reactive System
//!
//! These tests verify that refs, reactive objects, computed values and
//! effects work together without any manual invalidation.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use pinion_core::reactive::{
    computed, reactive, untrack, Computed, ComputedState, Effect, ReactiveArray, ReactiveContext,
    Ref, Runtime, SourceId, SourceKey, SubscriberId,
};
use pinion_core::Error;
use serde_json::{json, Value};

/// A computed value tracks the ref it reads.
#[test]
fn computed_tracks_ref_dependency() {
    let count = Ref::new(10);

    let source = count.clone();
    let doubled = computed(move || Ok(source.get() * 2));

    assert_eq!(doubled.get().unwrap(), 20);

    // No mark_dirty: the write invalidates the computed on its own.
    count.set(5).unwrap();
    assert_eq!(doubled.state(), ComputedState::Dirty);
    assert_eq!(doubled.get().unwrap(), 10);
}

/// An effect re-runs after every write to what it read.
#[test]
fn effect_reruns_on_write() {
    let count = Ref::new(0);
    let observed = Arc::new(AtomicI64::new(-1));

    let source = count.clone();
    let sink = observed.clone();
    let effect = Effect::new(move || {
        sink.store(source.get(), Ordering::SeqCst);
    });

    // Effect runs on creation, captures initial value
    assert_eq!(observed.load(Ordering::SeqCst), 0);

    count.set(42).unwrap();
    assert_eq!(observed.load(Ordering::SeqCst), 42);
    assert_eq!(effect.run_count(), 2);
}

/// Computed values cache until a dependency changes.
#[test]
fn computed_caches_expensive_computation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let answer = computed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(42)
    });

    assert_eq!(answer.get().unwrap(), 42);
    assert_eq!(answer.get().unwrap(), 42);
    assert_eq!(answer.get().unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Computed values can depend on other computed values, and an effect at
/// the end of the chain sees every change exactly once.
#[test]
fn chained_computeds_feed_an_effect() {
    let base = Ref::new(5);

    let source = base.clone();
    let doubled = computed(move || Ok(source.get() * 2));
    let upstream = doubled.clone();
    let plus_ten = computed(move || Ok(upstream.get()? + 10));

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let last = plus_ten.clone();
    let _effect = Effect::new(move || {
        if let Ok(value) = last.get() {
            sink.lock().push(value);
        }
    });

    base.set(10).unwrap();
    base.set(20).unwrap();

    assert_eq!(*seen.lock(), vec![20, 30, 50]);
    assert_eq!(doubled.evaluations(), 3);
}

/// Writing the same value is not a change.
#[test]
fn equal_writes_do_not_notify() {
    let name = Ref::new("ada".to_owned());
    let runs = Arc::new(AtomicUsize::new(0));

    let source = name.clone();
    let counter = runs.clone();
    let _effect = Effect::new(move || {
        source.with(|_| ());
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(!name.set("ada".to_owned()).unwrap());
    assert!(name.set("grace".to_owned()).unwrap());
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Reads of one property do not subscribe to its siblings.
#[test]
fn object_properties_are_tracked_independently() {
    let user = reactive(json!({ "name": "ada", "age": 36 })).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let source = user.clone();
    let counter = calls.clone();
    let greeting = computed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let name = source.get("name").unwrap_or(Value::Null);
        Ok(format!("hello {}", name.as_str().unwrap_or("?")))
    });

    assert_eq!(greeting.get().unwrap(), "hello ada");
    user.set("age", 37).unwrap();
    assert_eq!(greeting.get().unwrap(), "hello ada");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    user.set("name", "grace").unwrap();
    assert_eq!(greeting.get().unwrap(), "hello grace");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Nested objects and arrays are reactive once reached through their parent.
#[test]
fn nested_structures_are_deeply_reactive() {
    let state = reactive(json!({ "todos": [{ "title": "a", "done": false }] })).unwrap();

    let source = state.clone();
    let open = computed(move || {
        let todos = source
            .array("todos")
            .unwrap_or_else(|| ReactiveArray::new(Vec::new()));
        let mut open = 0;
        for index in 0..todos.len() {
            if let Some(todo) = todos.object(index) {
                if todo.get("done") == Some(Value::Bool(false)) {
                    open += 1;
                }
            }
        }
        Ok(open)
    });

    assert_eq!(open.get().unwrap(), 1);

    let todos = state.array("todos").unwrap();
    todos.push(json!({ "title": "b", "done": false })).unwrap();
    assert_eq!(open.get().unwrap(), 2);

    todos.object(0).unwrap().set("done", true).unwrap();
    assert_eq!(open.get().unwrap(), 1);

    assert_eq!(
        state.to_raw(),
        json!({ "todos": [{ "title": "a", "done": true }, { "title": "b", "done": false }] })
    );
}

/// Reads inside `untrack` do not become dependencies.
#[test]
fn untracked_reads_are_not_dependencies() {
    let tracked = Ref::new(1);
    let ignored = Ref::new(100);

    let (a, b) = (tracked.clone(), ignored.clone());
    let sum = computed(move || Ok(a.get() + untrack(|| b.get())));

    assert_eq!(sum.get().unwrap(), 101);
    assert_eq!(sum.dependency_count(), 1);

    ignored.set(200).unwrap();
    assert_eq!(sum.get().unwrap(), 101);

    tracked.set(2).unwrap();
    assert_eq!(sum.get().unwrap(), 202);
}

/// A computed that ends up reading itself reports the cycle.
#[test]
fn self_referencing_computed_reports_cycle() {
    let slot: Arc<std::sync::OnceLock<Computed<i64>>> = Arc::new(std::sync::OnceLock::new());

    let this = slot.clone();
    let looping = computed(move || match this.get() {
        Some(me) => Ok(me.get()? + 1),
        None => Ok(0),
    });
    let _ = slot.set(looping.clone());

    assert!(matches!(looping.get(), Err(Error::CyclicDependency { .. })));
}

/// Disposed effects stop running and drop their edges.
#[test]
fn disposed_effect_does_not_run() {
    let count = Ref::new(0);
    let runs = Arc::new(AtomicUsize::new(0));

    let source = count.clone();
    let counter = runs.clone();
    let effect = Effect::new(move || {
        source.get();
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    effect.dispose();
    count.set(1).unwrap();
    count.set(2).unwrap();

    assert!(effect.is_disposed());
    assert_eq!(effect.dependency_count(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Nested contexts keep their dependency sets apart.
#[test]
fn nested_reactive_contexts() {
    let (a, b, c, d) = (SourceId::new(), SourceId::new(), SourceId::new(), SourceId::new());

    let outer = ReactiveContext::enter(SubscriberId::new());
    ReactiveContext::track(SourceKey::value(a));
    ReactiveContext::track(SourceKey::key(b, "x"));

    {
        let inner = ReactiveContext::enter(SubscriberId::new());
        ReactiveContext::track(SourceKey::value(c));
        ReactiveContext::track(SourceKey::index(d, 0));

        let inner_deps = ReactiveContext::dependencies();
        assert_eq!(inner_deps.len(), 2);
        assert!(inner_deps.contains(&SourceKey::value(c)));
        assert!(inner_deps.contains(&SourceKey::index(d, 0)));
        drop(inner);
    }

    let outer_deps = outer.finish();
    assert_eq!(outer_deps.len(), 2);
    assert!(outer_deps.contains(&SourceKey::value(a)));
    assert!(outer_deps.contains(&SourceKey::key(b, "x")));
}

/// The runtime records edges as soon as a computed reads something.
#[test]
fn runtime_sees_edges_from_evaluation() {
    let count = Ref::new(100);

    let source = count.clone();
    let tripled = computed(move || Ok(source.get() * 3));
    assert_eq!(tripled.get().unwrap(), 300);

    let dependents = Runtime::dependents(&SourceKey::value(count.id()));
    assert_eq!(dependents, vec![tripled.subscriber_id()]);

    drop(tripled);
    assert!(Runtime::dependents(&SourceKey::value(count.id())).is_empty());
}
