//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a source is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When entering a reactive context (running a computed or an effect), we push
//! a frame onto the stack. When the computation completes, we pop it.
//!
//! Frames can also be *untracked*: reads performed inside an untracked frame
//! are recorded nowhere, even when an outer computation is active.
//!
//! A second stack, the owner scope, records which store's change signal new
//! reactive nodes belong to while that store is being set up.

use std::cell::RefCell;

use indexmap::IndexSet;

use super::change::ChangeSignal;
use super::runtime::Runtime;
use super::subscriber::{SourceKey, SubscriberId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
    static OWNER_STACK: RefCell<Vec<ChangeSignal>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
#[derive(Debug)]
struct ContextEntry {
    /// The computation reading sources, or `None` for an untracked frame.
    subscriber_id: Option<SubscriberId>,
    /// Sources read during this computation, in first-read order.
    dependencies: IndexSet<SourceKey>,
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation returns early with
/// an error or panics.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
    popped: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// While this context is active, any source that is read registers the
    /// subscriber as a dependent.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        Self::push(Some(subscriber_id))
    }

    /// Enter a frame in which reads are not tracked.
    pub fn untracked() -> Self {
        Self::push(None)
    }

    fn push(subscriber_id: Option<SubscriberId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber_id,
                dependencies: IndexSet::new(),
            });
        });

        Self {
            subscriber_id,
            popped: false,
        }
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the current subscriber ID, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.subscriber_id))
    }

    /// Whether the given subscriber is anywhere on this thread's stack, i.e.
    /// whether it is currently being evaluated.
    pub fn contains(subscriber_id: SubscriberId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|entry| entry.subscriber_id == Some(subscriber_id))
        })
    }

    /// Record a read of `key` by the current computation.
    ///
    /// The edge is registered with the runtime immediately so that a write
    /// landing during the rest of the evaluation still invalidates it.
    pub fn track(key: SourceKey) {
        let subscriber = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let entry = stack.last_mut()?;
            let subscriber = entry.subscriber_id?;
            entry
                .dependencies
                .insert(key.clone())
                .then_some(subscriber)
        });

        if let Some(subscriber) = subscriber {
            Runtime::add_dependency(key, subscriber);
        }
    }

    /// Get the dependencies collected in the current context.
    pub fn dependencies() -> Vec<SourceKey> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Leave the context and return everything read inside it.
    pub fn finish(mut self) -> IndexSet<SourceKey> {
        self.popped = true;
        self.pop().map(|entry| entry.dependencies).unwrap_or_default()
    }

    fn pop(&self) -> Option<ContextEntry> {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(entry) = &popped {
                debug_assert_eq!(
                    entry.subscriber_id, self.subscriber_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber_id, entry.subscriber_id
                );
            }
            popped
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.popped {
            self.pop();
        }
    }
}

/// Run `f` without tracking any of the reads it performs.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _frame = ReactiveContext::untracked();
    f()
}

/// Guard marking the change signal that newly created reactive nodes
/// belong to.
pub struct OwnerScope {
    _private: (),
}

impl OwnerScope {
    pub fn enter(owner: ChangeSignal) -> Self {
        OWNER_STACK.with(|stack| stack.borrow_mut().push(owner));
        Self { _private: () }
    }

    /// The innermost owner, if a store is being set up on this thread.
    pub fn current() -> Option<ChangeSignal> {
        OWNER_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl Drop for OwnerScope {
    fn drop(&mut self) {
        OWNER_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
