//! Render-subscription interface.
//!
//! UI integrations observe stores at store granularity through two calls:
//! [`subscribe`] to be told that something changed and [`get_snapshot`] to
//! read the version they render against. The version strictly increases
//! after every observable mutation, so comparing snapshots is enough to
//! decide whether to re-render.

use crate::reactive::{ChangeSignal, Subscription};
use crate::store::Store;

/// Call `callback` after every mutation of the store owning `signal`.
pub fn subscribe<F>(signal: &ChangeSignal, callback: F) -> Subscription
where
    F: Fn(u64) + Send + Sync + 'static,
{
    signal.subscribe(callback)
}

/// The version a render should be keyed on.
pub fn get_snapshot(signal: &ChangeSignal) -> u64 {
    signal.version()
}

/// [`subscribe`] for a store.
pub fn subscribe_store<F>(store: &Store, callback: F) -> Subscription
where
    F: Fn(u64) + Send + Sync + 'static,
{
    subscribe(store.change_signal(), callback)
}

/// [`get_snapshot`] for a store.
pub fn store_snapshot(store: &Store) -> u64 {
    get_snapshot(store.change_signal())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::store::{define_store, StoreOptions};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn snapshots_increase_with_every_mutation() {
        let registry = Registry::new();
        let store = define_store("todo", StoreOptions::new(|| json!({ "items": [], "filter": "all" })))
            .use_in(&registry)
            .unwrap();

        let renders = Arc::new(AtomicU64::new(0));
        let counter = renders.clone();
        let _subscription = subscribe_store(&store, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let before = store_snapshot(&store);
        store.set("filter", "done").unwrap();
        let state = store.state().unwrap();
        state.array("items").unwrap().push("write tests").unwrap();
        let after = store_snapshot(&store);

        assert_eq!(after, before + 2);
        assert_eq!(renders.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribed_callbacks_stop_firing() {
        let signal = ChangeSignal::new("standalone");
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let subscription = subscribe(&signal, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        signal.bump();
        drop(subscription);
        signal.bump();

        assert_eq!(get_snapshot(&signal), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
