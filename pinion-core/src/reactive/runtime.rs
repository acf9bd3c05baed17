//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects sources, computed
//! values and effects. It owns the dependency graph and propagates
//! invalidation when a source is written.
//!
//! # How It Works
//!
//! 1. When a computed value or effect is created, it registers with the
//!    runtime under its subscriber ID (weakly, so dropping it is enough to
//!    unregister).
//!
//! 2. When a subscriber reads a source inside its tracking context, the
//!    runtime records the edge `source -> subscriber`.
//!
//! 3. When a source is written, the runtime:
//!    a. Finds all dependent subscribers
//!    b. Marks them dirty
//!    c. Continues through computed values that just became dirty, since
//!       anything reading them is now stale too
//!    d. Runs affected effects once the whole graph has been marked
//!
//! Computed values are lazy: marking is all that happens to them here, they
//! recompute on their next read.
//!
//! # Thread Safety
//!
//! The graph lives in process-wide concurrent maps. Node IDs are unique per
//! process, so stores in different registries never share an edge.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use indexmap::IndexSet;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::subscriber::{SourceKey, SubscriberId};

/// A trait for computations that can be notified when dependencies change.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this computation.
    fn subscriber_id(&self) -> SubscriberId;

    /// Mark this computation as needing an update.
    ///
    /// Returns `true` when the call moved it out of the clean state.
    fn mark_dirty(&self) -> bool;

    /// Re-run this computation (effects only).
    fn schedule(&self);

    /// Check if this computation is an effect (eager) or a computed (lazy).
    fn is_eager(&self) -> bool;

    /// The key other computations use to depend on this one, if it produces
    /// a value.
    fn as_source(&self) -> Option<SourceKey>;
}

/// Handle to a registered computation.
///
/// Dropping this handle unregisters the computation from the runtime.
pub struct ReactiveHandle {
    subscriber_id: SubscriberId,
}

impl Drop for ReactiveHandle {
    fn drop(&mut self) {
        Runtime::unregister(self.subscriber_id);
    }
}

/// The global reactive runtime.
pub struct Runtime;

type SubscriberList = SmallVec<[SubscriberId; 4]>;

static SUBSCRIBERS: OnceLock<DashMap<SubscriberId, Weak<dyn Reactive>>> = OnceLock::new();
static EDGES: OnceLock<DashMap<SourceKey, SubscriberList>> = OnceLock::new();

fn subscribers() -> &'static DashMap<SubscriberId, Weak<dyn Reactive>> {
    SUBSCRIBERS.get_or_init(DashMap::new)
}

fn edges() -> &'static DashMap<SourceKey, SubscriberList> {
    EDGES.get_or_init(DashMap::new)
}

impl Runtime {
    /// Register a computation with the runtime.
    ///
    /// Returns a handle that unregisters the computation when dropped.
    pub fn register(id: SubscriberId, reactive: Weak<dyn Reactive>) -> ReactiveHandle {
        subscribers().insert(id, reactive);
        ReactiveHandle { subscriber_id: id }
    }

    fn unregister(id: SubscriberId) {
        subscribers().remove(&id);
    }

    /// Record that a subscriber depends on a source.
    ///
    /// Called automatically when a source is read within a reactive context.
    pub fn add_dependency(source: SourceKey, subscriber: SubscriberId) {
        let mut entry = edges().entry(source).or_default();
        if !entry.contains(&subscriber) {
            entry.push(subscriber);
        }
    }

    /// Remove a single edge.
    pub fn remove_dependency(source: &SourceKey, subscriber: SubscriberId) {
        if let Some(mut entry) = edges().get_mut(source) {
            entry.retain(|s| *s != subscriber);
        }
        edges().remove_if(source, |_, subs| subs.is_empty());
    }

    /// Drop every edge in `previous` that is not in `current`.
    ///
    /// Called after a computation re-ran: edges for its new reads were added
    /// while it ran, this removes the ones it no longer reads.
    pub fn retain_dependencies(
        subscriber: SubscriberId,
        previous: &IndexSet<SourceKey>,
        current: &IndexSet<SourceKey>,
    ) {
        for stale in previous.difference(current) {
            Self::remove_dependency(stale, subscriber);
        }
    }

    /// Subscribers currently depending on `source`.
    pub fn dependents(source: &SourceKey) -> Vec<SubscriberId> {
        edges()
            .get(source)
            .map(|entry| entry.value().to_vec())
            .unwrap_or_default()
    }

    /// Notify all subscribers that a source changed.
    ///
    /// This is the core update propagation mechanism.
    pub fn notify(source: &SourceKey) {
        let mut effects = Vec::new();
        Self::invalidate(source, &mut effects, &mut HashSet::new());

        tracing::trace!(?source, effects = effects.len(), "source changed");

        // Run scheduled effects after the whole graph has been marked
        for effect in effects {
            effect.schedule();
        }
    }

    /// Notify several sources, running each affected effect at most once.
    pub fn notify_all<'a>(sources: impl IntoIterator<Item = &'a SourceKey>) {
        let mut effects = Vec::new();
        let mut visited = HashSet::new();
        for source in sources {
            Self::invalidate(source, &mut effects, &mut visited);
        }
        for effect in effects {
            effect.schedule();
        }
    }

    /// Mark dependents of `source` dirty without running any effect.
    ///
    /// Used by hydration, which replaces state without it counting as an
    /// observable mutation but must not leave stale cached values behind.
    pub fn invalidate_silently(source: &SourceKey) {
        let mut effects = Vec::new();
        Self::invalidate(source, &mut effects, &mut HashSet::new());
    }

    fn invalidate(
        source: &SourceKey,
        effects: &mut Vec<Arc<dyn Reactive>>,
        visited: &mut HashSet<SubscriberId>,
    ) {
        for id in Self::dependents(source) {
            if !visited.insert(id) {
                continue;
            }

            let Some(reactive) = subscribers().get(&id).and_then(|weak| weak.upgrade()) else {
                continue;
            };

            let newly_dirty = reactive.mark_dirty();

            if reactive.is_eager() {
                effects.push(Arc::clone(&reactive));
            } else if newly_dirty {
                if let Some(derived) = reactive.as_source() {
                    Self::invalidate(&derived, effects, visited);
                }
            }
        }
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a reactive context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::subscriber::SourceId;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    struct MockReactive {
        id: SubscriberId,
        source: SourceId,
        dirty: AtomicBool,
        scheduled: AtomicI32,
        eager: bool,
    }

    impl MockReactive {
        fn new(eager: bool) -> Arc<Self> {
            Arc::new(Self {
                id: SubscriberId::new(),
                source: SourceId::new(),
                dirty: AtomicBool::new(false),
                scheduled: AtomicI32::new(0),
                eager,
            })
        }

        fn register(self: &Arc<Self>) -> ReactiveHandle {
            let weak: Weak<dyn Reactive> = Arc::downgrade(self) as Weak<dyn Reactive>;
            Runtime::register(self.id, weak)
        }
    }

    impl Reactive for MockReactive {
        fn subscriber_id(&self) -> SubscriberId {
            self.id
        }

        fn mark_dirty(&self) -> bool {
            !self.dirty.swap(true, Ordering::SeqCst)
        }

        fn schedule(&self) {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
        }

        fn is_eager(&self) -> bool {
            self.eager
        }

        fn as_source(&self) -> Option<SourceKey> {
            (!self.eager).then(|| SourceKey::value(self.source))
        }
    }

    #[test]
    fn runtime_registers_and_unregisters() {
        let reactive = MockReactive::new(false);
        let id = reactive.id;

        let handle = reactive.register();
        assert!(subscribers().contains_key(&id));

        drop(handle);
        assert!(!subscribers().contains_key(&id));
    }

    #[test]
    fn runtime_notifies_subscribers() {
        let memo = MockReactive::new(false);
        let effect = MockReactive::new(true);
        let source = SourceKey::value(SourceId::new());

        let _memo_handle = memo.register();
        let _effect_handle = effect.register();

        Runtime::add_dependency(source.clone(), memo.id);
        Runtime::add_dependency(source.clone(), effect.id);

        Runtime::notify(&source);

        // Both should be marked dirty
        assert!(memo.dirty.load(Ordering::SeqCst));
        assert!(effect.dirty.load(Ordering::SeqCst));

        // Only effect should be scheduled (it's eager)
        assert_eq!(memo.scheduled.load(Ordering::SeqCst), 0);
        assert_eq!(effect.scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidation_is_transitive_through_derived_values() {
        let first = MockReactive::new(false);
        let second = MockReactive::new(false);
        let source = SourceKey::value(SourceId::new());

        let _h1 = first.register();
        let _h2 = second.register();

        Runtime::add_dependency(source.clone(), first.id);
        Runtime::add_dependency(SourceKey::value(first.source), second.id);

        Runtime::notify(&source);

        assert!(first.dirty.load(Ordering::SeqCst));
        assert!(second.dirty.load(Ordering::SeqCst));
    }

    #[test]
    fn silent_invalidation_skips_effects() {
        let effect = MockReactive::new(true);
        let source = SourceKey::value(SourceId::new());
        let _handle = effect.register();

        Runtime::add_dependency(source.clone(), effect.id);
        Runtime::invalidate_silently(&source);

        assert!(effect.dirty.load(Ordering::SeqCst));
        assert_eq!(effect.scheduled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runtime_prunes_stale_dependencies() {
        let reactive = MockReactive::new(false);
        let node = SourceId::new();
        let kept = SourceKey::key(node, "kept");
        let dropped = SourceKey::key(node, "dropped");

        let _handle = reactive.register();
        Runtime::add_dependency(kept.clone(), reactive.id);
        Runtime::add_dependency(dropped.clone(), reactive.id);

        let previous: IndexSet<_> = [kept.clone(), dropped.clone()].into_iter().collect();
        let current: IndexSet<_> = [kept.clone()].into_iter().collect();
        Runtime::retain_dependencies(reactive.id, &previous, &current);

        assert_eq!(Runtime::dependents(&kept), vec![reactive.id]);
        assert!(Runtime::dependents(&dropped).is_empty());
    }
}
