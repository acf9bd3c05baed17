//! Per-store change signal.
//!
//! A [`ChangeSignal`] is a monotonically increasing version counter. Every
//! mutation of state owned by a store bumps it exactly once; render
//! integrations subscribe to it at store granularity and read the version as
//! their snapshot.
//!
//! The signal also carries the liveness of its store and of the registry the
//! store lives in. Writes check liveness first so that a mutation landing
//! after teardown is rejected instead of silently touching dead state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::runtime::Runtime;
use super::subscriber::SourceKey;
use crate::error::{Error, Result};

type Listener = Arc<dyn Fn(u64) + Send + Sync>;

struct SignalInner {
    store_id: String,
    version: AtomicU64,
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    /// Shared with the owning registry.
    registry_live: Arc<AtomicBool>,
    store_live: AtomicBool,
    batch_depth: AtomicUsize,
    batch_pending: AtomicBool,
}

/// Version counter observed by external subscribers.
#[derive(Clone)]
pub struct ChangeSignal {
    inner: Arc<SignalInner>,
}

impl ChangeSignal {
    /// Create a signal that is not attached to any registry.
    pub fn new(store_id: impl Into<String>) -> Self {
        Self::attached(store_id, Arc::new(AtomicBool::new(true)))
    }

    pub(crate) fn attached(store_id: impl Into<String>, registry_live: Arc<AtomicBool>) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                store_id: store_id.into(),
                version: AtomicU64::new(0),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                registry_live,
                store_live: AtomicBool::new(true),
                batch_depth: AtomicUsize::new(0),
                batch_pending: AtomicBool::new(false),
            }),
        }
    }

    /// Id of the store this signal belongs to.
    pub fn store_id(&self) -> &str {
        &self.inner.store_id
    }

    /// Current version. Strictly increases after every observable mutation.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Register a callback invoked with the new version after each bump.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or explicitly unsubscribed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, Arc::new(listener)));
        Subscription {
            signal: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Whether both the store and its registry are still alive.
    pub fn is_live(&self) -> bool {
        self.inner.store_live.load(Ordering::Acquire)
            && self.inner.registry_live.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            tracing::warn!(store = %self.store_id(), "rejected write to disposed store");
            Err(Error::StaleRegistryWrite {
                store: self.inner.store_id.clone(),
            })
        }
    }

    pub(crate) fn detach(&self) {
        self.inner.store_live.store(false, Ordering::Release);
    }

    /// Record one mutation and notify listeners.
    ///
    /// Inside a [`batch`](Self::batch) the bump is deferred and coalesced.
    pub(crate) fn bump(&self) {
        if self.inner.batch_depth.load(Ordering::Acquire) > 0 {
            self.inner.batch_pending.store(true, Ordering::Release);
            return;
        }
        self.publish();
    }

    fn publish(&self) {
        let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;

        // Release the lock before calling out: listeners may subscribe or
        // read state.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(version);
        }
    }

    /// Run `f` with all bumps coalesced into at most one, published before
    /// this returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.batch_depth.fetch_add(1, Ordering::AcqRel);
        let _guard = BatchGuard { signal: self };
        f()
    }
}

struct BatchGuard<'a> {
    signal: &'a ChangeSignal,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let inner = &self.signal.inner;
        if inner.batch_depth.fetch_sub(1, Ordering::AcqRel) == 1
            && inner.batch_pending.swap(false, Ordering::AcqRel)
        {
            self.signal.publish();
        }
    }
}

impl fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSignal")
            .field("store_id", &self.inner.store_id)
            .field("version", &self.version())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Keeps a change-signal listener registered.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    signal: Weak<SignalInner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.signal.upgrade() {
            inner.listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Reject a write when the node's owner has been torn down.
pub(crate) fn check_write(owner: Option<&ChangeSignal>) -> Result<()> {
    owner.map_or(Ok(()), ChangeSignal::ensure_live)
}

/// Publish a completed write: invalidate dependents of every touched key,
/// then bump the owner's version once.
pub(crate) fn commit(owner: Option<&ChangeSignal>, keys: &[SourceKey]) {
    Runtime::notify_all(keys);
    if let Some(owner) = owner {
        owner.bump();
    }
}

/// Publish a hydration write: cached values are invalidated, nothing else
/// observes it.
pub(crate) fn commit_silently(keys: &[SourceKey]) {
    for key in keys {
        Runtime::invalidate_silently(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_increments_and_notifies() {
        let signal = ChangeSignal::new("counter");
        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = signal.subscribe(move |v| sink.write().push(v));

        signal.bump();
        signal.bump();

        assert_eq!(signal.version(), 2);
        assert_eq!(*seen.read(), vec![1, 2]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let signal = ChangeSignal::new("counter");
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let sub = signal.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        signal.bump();
        sub.unsubscribe();
        signal.bump();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn batch_coalesces_bumps() {
        let signal = ChangeSignal::new("form");
        signal.batch(|| {
            signal.bump();
            signal.batch(|| signal.bump());
            signal.bump();
            assert_eq!(signal.version(), 0);
        });
        assert_eq!(signal.version(), 1);

        // An empty batch publishes nothing.
        signal.batch(|| {});
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn detached_signal_rejects_writes() {
        let registry_live = Arc::new(AtomicBool::new(true));
        let signal = ChangeSignal::attached("cart", Arc::clone(&registry_live));
        assert!(signal.ensure_live().is_ok());

        registry_live.store(false, Ordering::SeqCst);
        assert!(matches!(
            signal.ensure_live(),
            Err(Error::StaleRegistryWrite { store }) if store == "cart"
        ));
    }
}
