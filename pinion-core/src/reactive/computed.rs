//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computed Values Work
//!
//! 1. A computed starts dirty. Nothing runs until the first read.
//!
//! 2. A read of a dirty computed runs the getter inside a reactive context,
//!    records every source it read, caches the result and becomes clean.
//!
//! 3. A read of a clean computed returns the cached value without calling
//!    the getter.
//!
//! 4. A write to any recorded source marks the computed dirty. The runtime
//!    keeps going through whatever depends on this computed, so a chain of
//!    computed values is invalidated as a whole.
//!
//! 5. Reading a computed while it is being evaluated on the same thread is a
//!    cycle and fails with [`Error::CyclicDependency`].
//!
//! # Thread Safety
//!
//! The getter runs without any of the computed's own state locks held.
//! Concurrent readers of a dirty computed serialize on an evaluation lock so
//! the getter runs once per invalidation.

use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use super::context::ReactiveContext;
use super::runtime::{Reactive, ReactiveHandle, Runtime};
use super::source::GetterSource;
use super::subscriber::{SourceId, SourceKey, SubscriberId};
use crate::error::{Error, Result};

/// Evaluation state of a computed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed since the last evaluation.
    Dirty,

    /// The getter is running.
    Computing,
}

type Getter<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

struct Slot<T> {
    value: Option<T>,
    state: ComputedState,
    dependencies: IndexSet<SourceKey>,
}

struct ComputedInner<T> {
    subscriber_id: SubscriberId,
    source: SourceId,
    name: Option<String>,
    getter: Getter<T>,
    slot: RwLock<Slot<T>>,
    /// Held while the getter runs.
    evaluating: Mutex<()>,
    /// Set when a dependency changes while the getter is running.
    invalidated: AtomicBool,
    evaluations: AtomicU64,
    handle: Option<ReactiveHandle>,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Ref::new(2);
/// let source = count.clone();
/// let doubled = computed(move || Ok(source.get() * 2));
///
/// assert_eq!(doubled.get()?, 4);
/// count.set(5)?;
/// assert_eq!(doubled.get()?, 10);
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

/// Create a computed value from a getter.
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> Result<T> + Send + Sync + 'static,
{
    Computed::new(getter)
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new computed value. The getter does not run until the first
    /// read.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::build(None, Box::new(getter))
    }

    /// Create a computed value with a name used in error messages.
    pub fn named<F>(name: impl Into<String>, getter: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self::build(Some(name.into()), Box::new(getter))
    }

    fn build(name: Option<String>, getter: Getter<T>) -> Self {
        let subscriber_id = SubscriberId::new();
        let inner = Arc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let reactive: Weak<dyn Reactive> = weak.clone();
            ComputedInner {
                subscriber_id,
                source: SourceId::new(),
                name,
                getter,
                slot: RwLock::new(Slot {
                    value: None,
                    state: ComputedState::Dirty,
                    dependencies: IndexSet::new(),
                }),
                evaluating: Mutex::new(()),
                invalidated: AtomicBool::new(false),
                evaluations: AtomicU64::new(0),
                handle: Some(Runtime::register(subscriber_id, reactive)),
            }
        });

        Self { inner }
    }

    /// The id other computations use to depend on this value.
    pub fn id(&self) -> SourceId {
        self.inner.source
    }

    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a reactive context this also registers the current computation
    /// as a dependent of this value.
    pub fn get(&self) -> Result<T> {
        let inner = &self.inner;
        if ReactiveContext::contains(inner.subscriber_id) {
            tracing::debug!(computed = inner.subscriber_id.raw(), "cyclic computed read");
            return Err(Error::CyclicDependency {
                id: inner.subscriber_id.raw(),
            });
        }

        ReactiveContext::track(SourceKey::value(inner.source));

        if let Some(value) = inner.cached() {
            return Ok(value);
        }

        let _evaluating = inner.evaluating.lock();
        // Another thread may have finished evaluating while we waited.
        if let Some(value) = inner.cached() {
            return Ok(value);
        }
        inner.evaluate()
    }

    /// Get the current value without registering a dependency on it.
    pub fn get_untracked(&self) -> Result<T> {
        super::context::untrack(|| self.get())
    }

    /// Computed values are read-only; this always fails.
    pub fn set(&self, _value: T) -> Result<()> {
        Err(Error::ReadOnlyViolation {
            name: self
                .inner
                .name
                .clone()
                .unwrap_or_else(|| format!("computed #{}", self.inner.subscriber_id.raw())),
        })
    }

    /// Get the current evaluation state.
    pub fn state(&self) -> ComputedState {
        self.inner.slot.read().state
    }

    /// Force the next read to re-run the getter.
    pub fn mark_dirty(&self) {
        if self.inner.mark_dirty() {
            Runtime::notify(&SourceKey::value(self.inner.source));
        }
    }

    /// How many times the getter has run.
    pub fn evaluations(&self) -> u64 {
        self.inner.evaluations.load(Ordering::Acquire)
    }

    /// Number of sources read during the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.slot.read().dependencies.len()
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.slot.read().value.is_some()
    }
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn cached(&self) -> Option<T> {
        let slot = self.slot.read();
        match slot.state {
            ComputedState::Clean => slot.value.clone(),
            _ => None,
        }
    }

    fn evaluate(&self) -> Result<T> {
        let previous = {
            let mut slot = self.slot.write();
            slot.state = ComputedState::Computing;
            std::mem::take(&mut slot.dependencies)
        };
        self.invalidated.store(false, Ordering::Release);

        let mut reset = ResetOnUnwind {
            slot: &self.slot,
            armed: true,
        };

        let context = ReactiveContext::enter(self.subscriber_id);
        let result = (self.getter)();
        let current = context.finish();

        Runtime::retain_dependencies(self.subscriber_id, &previous, &current);
        let evaluations = self.evaluations.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(
            computed = self.subscriber_id.raw(),
            dependencies = current.len(),
            evaluations,
            "computed evaluated"
        );

        reset.armed = false;
        let mut slot = self.slot.write();
        slot.dependencies = current;
        let invalidated = self.invalidated.swap(false, Ordering::AcqRel);

        match result {
            Ok(value) => {
                slot.value = Some(value.clone());
                slot.state = if invalidated {
                    ComputedState::Dirty
                } else {
                    ComputedState::Clean
                };
                Ok(value)
            }
            Err(err) => {
                slot.state = ComputedState::Dirty;
                Err(err)
            }
        }
    }
}

/// Leaves the computed dirty if its getter panics.
struct ResetOnUnwind<'a, T> {
    slot: &'a RwLock<Slot<T>>,
    armed: bool,
}

impl<T> Drop for ResetOnUnwind<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.slot.write().state = ComputedState::Dirty;
        }
    }
}

impl<T> Reactive for ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_dirty(&self) -> bool {
        let mut slot = self.slot.write();
        match slot.state {
            ComputedState::Clean => {
                slot.state = ComputedState::Dirty;
                true
            }
            ComputedState::Dirty => false,
            ComputedState::Computing => {
                self.invalidated.store(true, Ordering::Release);
                false
            }
        }
    }

    fn schedule(&self) {
        // Computed values are lazy; they recompute on the next read.
    }

    fn is_eager(&self) -> bool {
        false
    }

    fn as_source(&self) -> Option<SourceKey> {
        Some(SourceKey::value(self.source))
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        for source in self.slot.get_mut().dependencies.iter() {
            Runtime::remove_dependency(source, self.subscriber_id);
        }
        // Unregister before the edge table forgets about us.
        self.handle.take();
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.read();
        f.debug_struct("Computed")
            .field("id", &self.inner.source)
            .field("name", &self.inner.name)
            .field("state", &slot.state)
            .field("value", &slot.value)
            .field("dependency_count", &slot.dependencies.len())
            .finish()
    }
}

impl<T> GetterSource for Computed<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    fn read(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.get()?)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
