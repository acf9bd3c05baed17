//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the runtime re-runs the effect
//!    synchronously once the invalidation pass has finished.
//!
//! 3. Every run records a fresh dependency set; sources that were read last
//!    time but not this time stop triggering the effect.
//!
//! # Use Cases
//!
//! Effects synchronize reactive state with the outside world: scheduling a
//! render, logging, pushing to a devtools bridge.
//!
//! # Differences from Computed
//!
//! - Computed values return a value; effects do not.
//! - Computed values are lazy; effects are eager.
//! - An effect that is already running is never re-entered. A write it
//!   performs to one of its own dependencies does not re-trigger it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::context::ReactiveContext;
use super::runtime::{Reactive, ReactiveHandle, Runtime};
use super::subscriber::{SourceKey, SubscriberId};

struct EffectInner {
    subscriber_id: SubscriberId,
    run: Box<dyn Fn() + Send + Sync>,
    dependencies: Mutex<IndexSet<SourceKey>>,
    running: AtomicBool,
    disposed: AtomicBool,
    run_count: AtomicU64,
    handle: Mutex<Option<ReactiveHandle>>,
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Ref::new(0);
/// let source = count.clone();
///
/// let effect = Effect::new(move || {
///     println!("Count is: {}", source.get());
/// });
///
/// count.set(5)?;  // Prints: "Count is: 5"
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create a new effect without running it immediately.
    ///
    /// It has no dependencies until [`execute`](Self::execute) is called.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let subscriber_id = SubscriberId::new();
        let inner = Arc::new_cyclic(|weak: &Weak<EffectInner>| {
            let reactive: Weak<dyn Reactive> = weak.clone();
            EffectInner {
                subscriber_id,
                run: Box::new(run),
                dependencies: Mutex::new(IndexSet::new()),
                running: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                run_count: AtomicU64::new(0),
                handle: Mutex::new(Some(Runtime::register(subscriber_id, reactive))),
            }
        });

        Self { inner }
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Run the effect function, re-recording its dependencies.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Stop the effect. It will not run again and its edges are removed.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dependencies = std::mem::take(&mut *self.inner.dependencies.lock());
        for source in &dependencies {
            Runtime::remove_dependency(source, self.inner.subscriber_id);
        }
        self.inner.handle.lock().take();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> u64 {
        self.inner.run_count.load(Ordering::Acquire)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }
}

impl EffectInner {
    fn execute(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::trace!(effect = self.subscriber_id.raw(), "skipping re-entrant effect run");
            return;
        }

        let previous = std::mem::take(&mut *self.dependencies.lock());
        let context = ReactiveContext::enter(self.subscriber_id);
        (self.run)();
        let current = context.finish();

        Runtime::retain_dependencies(self.subscriber_id, &previous, &current);
        *self.dependencies.lock() = current;
        self.run_count.fetch_add(1, Ordering::AcqRel);
        self.running.store(false, Ordering::Release);
    }
}

impl Reactive for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_dirty(&self) -> bool {
        !self.running.load(Ordering::Acquire)
    }

    fn schedule(&self) {
        self.execute();
    }

    fn is_eager(&self) -> bool {
        true
    }

    fn as_source(&self) -> Option<SourceKey> {
        None
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        for source in self.dependencies.get_mut().iter() {
            Runtime::remove_dependency(source, self.subscriber_id);
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("subscriber_id", &self.inner.subscriber_id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
