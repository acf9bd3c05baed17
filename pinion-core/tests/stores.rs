//! Store Tests
//!
//! Declarative and setup stores resolved against explicit registries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pinion_core::prelude::*;
use serde_json::{json, Value};

fn counter_store() -> StoreDefinition {
    define_store(
        "counter",
        StoreOptions::new(|| json!({ "count": 0, "step": 1 }))
            .getter("doubled", |view| Ok(json!(view.get_as::<i64>("count")? * 2)))
            .getter("quadrupled", |view| {
                Ok(json!(view.getter("doubled")?.as_i64().unwrap_or(0) * 2))
            })
            .action("increment", |ctx, _| {
                let state = ctx.state()?;
                let step = state.get_as::<i64>("step")?.unwrap_or(1);
                state.update("count", |v| json!(v.and_then(Value::as_i64).unwrap_or(0) + step))?;
                Ok(Value::Null)
            })
            .action("add", |ctx, args| {
                let amount: i64 = ActionContext::arg(&args, 0)?;
                let state = ctx.state()?;
                state.update("count", |v| json!(v.and_then(Value::as_i64).unwrap_or(0) + amount))?;
                ctx.get("count")
            })
            .action("fail", |_, _| Err(Error::action(std::io::Error::other("boom"))))
            .async_action("increment_later", |ctx, _| async move {
                tokio::task::yield_now().await;
                ctx.dispatch("increment", vec![])
            }),
    )
}

#[test]
fn counter_increments_update_getters_and_version() {
    let registry = create_registry();
    let store = counter_store().use_in(&registry).unwrap();
    let before = store.version();

    for _ in 0..3 {
        store.dispatch("increment", vec![]).unwrap();
    }

    assert_eq!(store.get("count").unwrap(), json!(3));
    assert_eq!(store.getter("doubled").unwrap(), json!(6));
    assert_eq!(store.get("quadrupled").unwrap(), json!(12));
    assert_eq!(store.version(), before + 3);
}

#[test]
fn actions_take_arguments_and_return_values() {
    let registry = create_registry();
    let store = counter_store().use_in(&registry).unwrap();

    let result = store.dispatch("add", vec![json!(5)]).unwrap();
    assert_eq!(result, json!(5));
    assert_eq!(store.get_as::<i64>("count").unwrap(), 5);
}

#[test]
fn getters_are_cached_until_their_state_changes() {
    let evaluations = Arc::new(AtomicUsize::new(0));
    let counter = evaluations.clone();
    let store = define_store(
        "cached",
        StoreOptions::new(|| json!({ "count": 1, "label": "x" })).getter("doubled", move |view| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!(view.get_as::<i64>("count")? * 2))
        }),
    )
    .use_in(&create_registry())
    .unwrap();

    assert_eq!(store.getter("doubled").unwrap(), json!(2));
    assert_eq!(store.getter("doubled").unwrap(), json!(2));
    store.set("label", "y").unwrap();
    assert_eq!(store.getter("doubled").unwrap(), json!(2));
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);

    store.set("count", 2).unwrap();
    assert_eq!(store.getter("doubled").unwrap(), json!(4));
    assert_eq!(evaluations.load(Ordering::SeqCst), 2);
}

#[test]
fn getters_are_read_only() {
    let store = counter_store().use_in(&create_registry()).unwrap();

    assert!(matches!(
        store.set("doubled", 10),
        Err(Error::ReadOnlyViolation { name }) if name == "counter.doubled"
    ));
    assert!(matches!(
        store.set("missing", 1),
        Err(Error::UnknownMember { .. })
    ));

    let doubled = store.computed::<Value>("doubled").unwrap();
    assert!(matches!(doubled.set(json!(1)), Err(Error::ReadOnlyViolation { .. })));
}

#[test]
fn unknown_and_async_actions_are_reported() {
    let store = counter_store().use_in(&create_registry()).unwrap();

    assert!(matches!(
        store.dispatch("nope", vec![]),
        Err(Error::UnknownAction { action, .. }) if action == "nope"
    ));
    assert!(store.is_async_action("increment_later"));
    assert!(matches!(
        store.dispatch("increment_later", vec![]),
        Err(Error::AsyncAction { .. })
    ));
}

#[test]
fn action_errors_reach_the_caller_unchanged() {
    let store = counter_store().use_in(&create_registry()).unwrap();

    let err = store.dispatch("fail", vec![]).unwrap_err();
    assert!(err.is_action_error());
    assert!(err.to_string().contains("boom"));
    assert_eq!(store.version(), 0);
}

#[tokio::test]
async fn async_actions_keep_their_store_across_awaits() {
    let store = counter_store().use_in(&create_registry()).unwrap();

    store.call("increment_later", vec![]).await.unwrap();
    store.call("increment", vec![]).await.unwrap();

    assert_eq!(store.get("count").unwrap(), json!(2));
}

#[test]
fn patch_bumps_the_version_once() {
    let store = counter_store().use_in(&create_registry()).unwrap();
    let renders = Arc::new(AtomicUsize::new(0));
    let counter = renders.clone();
    let _subscription = store.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    store.patch(json!({ "count": 10, "step": 5 })).unwrap();

    assert_eq!(store.version(), 1);
    assert_eq!(renders.load(Ordering::SeqCst), 1);
    assert_eq!(store.snapshot().unwrap(), json!({ "count": 10, "step": 5 }));

    store
        .patch_with(|store| {
            store.dispatch("increment", vec![])?;
            store.dispatch("increment", vec![])?;
            Ok(())
        })
        .unwrap();
    assert_eq!(store.get("count").unwrap(), json!(20));
    assert_eq!(store.version(), 2);
}

#[test]
fn reset_restores_initial_state() {
    let store = counter_store().use_in(&create_registry()).unwrap();
    store.dispatch("add", vec![json!(7)]).unwrap();
    store.set("step", 3).unwrap();

    store.reset().unwrap();

    assert_eq!(store.snapshot().unwrap(), json!({ "count": 0, "step": 1 }));
    assert_eq!(store.getter("doubled").unwrap(), json!(0));
}

#[test]
fn non_object_state_is_rejected() {
    let definition = define_store("broken", StoreOptions::new(|| json!([1, 2, 3])));
    assert!(matches!(
        definition.use_in(&create_registry()),
        Err(Error::InvalidState(_))
    ));
}

fn cart_store() -> StoreDefinition {
    define_setup_store("cart", || {
        let items: ReactiveMap<String, u32> = ReactiveMap::new();
        let discount = Ref::new(0u32);

        let counted = items.clone();
        let total = computed(move || Ok(counted.values().iter().sum::<u32>()));

        let add = items.clone();
        Ok(SetupSurface::new()
            .state("items", items)
            .state("discount", discount)
            .getter("total", total)
            .action("add", move |_, args| {
                let sku: String = ActionContext::arg(&args, 0)?;
                let current = add.get(&sku).unwrap_or(0);
                add.insert(sku, current + 1)?;
                Ok(Value::Null)
            }))
    })
}

#[test]
fn setup_store_exposes_only_its_surface() {
    let store = cart_store().use_in(&create_registry()).unwrap();
    assert!(!store.is_declarative());
    assert_eq!(store.state_names(), vec!["items", "discount"]);
    assert_eq!(store.getter_names(), vec!["total"]);

    store.dispatch("add", vec![json!("apple")]).unwrap();
    store.dispatch("add", vec![json!("apple")]).unwrap();
    store.dispatch("add", vec![json!("pear")]).unwrap();

    assert_eq!(store.getter("total").unwrap(), json!(3));
    assert_eq!(store.computed::<u32>("total").unwrap().get().unwrap(), 3);
    assert_eq!(
        store.snapshot().unwrap(),
        json!({ "items": { "apple": 2, "pear": 1 }, "discount": 0 })
    );
    assert_eq!(store.version(), 3);
}

#[test]
fn setup_store_state_is_writable_by_name() {
    let store = cart_store().use_in(&create_registry()).unwrap();

    store.set("discount", 15).unwrap();
    assert_eq!(store.state_ref::<u32>("discount").unwrap().get(), 15);
    assert!(matches!(store.set("total", 1), Err(Error::ReadOnlyViolation { .. })));
    assert!(matches!(store.reset(), Err(Error::ResetUnsupported(id)) if id == "cart"));

    assert!(matches!(
        store.patch(json!({ "unknown": 1 })),
        Err(Error::UnknownMember { .. })
    ));
    store.patch(json!({ "discount": 5 })).unwrap();
    assert_eq!(store.get("discount").unwrap(), json!(5));
}

#[test]
fn setup_runs_once_per_registry() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let definition = define_setup_store("once", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(SetupSurface::new().state("open", Ref::new(false)))
    });

    let first = create_registry();
    definition.use_in(&first).unwrap();
    definition.use_in(&first).unwrap();
    definition.use_in(&create_registry()).unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn stores_can_use_other_stores() {
    let registry = create_registry();
    let counter = counter_store();
    let dependent = counter.clone();
    let summary = define_setup_store("summary", move || {
        let counter = dependent.use_store()?;
        let label = computed(move || Ok(format!("count is {}", counter.get("count")?)));
        Ok(SetupSurface::new().getter("label", label))
    });

    let store = registry.run(|| summary.use_store()).unwrap();
    assert_eq!(store.getter("label").unwrap(), json!("count is 0"));

    counter.use_in(&registry).unwrap().dispatch("increment", vec![]).unwrap();
    assert_eq!(store.getter("label").unwrap(), json!("count is 1"));
}
