//! Ref Implementation
//!
//! A [`Ref`] is the standalone reactive cell: one value behind one tracked
//! property.
//!
//! # How Refs Work
//!
//! 1. When a ref is read within a reactive context (computed/effect), the
//!    ref registers that context as a dependent.
//!
//! 2. When a ref's value changes, dependents are invalidated and the owning
//!    store's change signal is bumped.
//!
//! 3. Writing a value equal to the current one is a no-op.
//!
//! # Deep values
//!
//! `Ref<T>` stores `T` as-is. For JSON trees that should be reactive all the
//! way down use [`Ref::deep`], which stores a [`Tracked`] node: objects and
//! arrays become [`ReactiveObject`](super::ReactiveObject) and
//! [`ReactiveArray`](super::ReactiveArray) handles whose children are wrapped
//! on first access.

use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::change::{check_write, commit, commit_silently, ChangeSignal};
use super::context::{OwnerScope, ReactiveContext};
use super::source::StateSource;
use super::subscriber::{SourceId, SourceKey};
use super::tracked::Tracked;
use crate::error::Result;

struct RefInner<T> {
    id: SourceId,
    value: RwLock<T>,
    owner: Option<ChangeSignal>,
}

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = Ref::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (invalidates dependents)
/// count.set(5)?;
/// ```
pub struct Ref<T> {
    inner: Arc<RefInner<T>>,
}

impl<T> Ref<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new ref. Inside a store's setup it belongs to that store.
    pub fn new(value: T) -> Self {
        Self::with_owner(value, OwnerScope::current())
    }

    pub(crate) fn with_owner(value: T, owner: Option<ChangeSignal>) -> Self {
        Self {
            inner: Arc::new(RefInner {
                id: SourceId::new(),
                value: RwLock::new(value),
                owner,
            }),
        }
    }

    /// Get the ref's unique ID.
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    pub fn owner(&self) -> Option<&ChangeSignal> {
        self.inner.owner.as_ref()
    }

    fn key(&self) -> SourceKey {
        SourceKey::value(self.inner.id)
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a dependent.
    pub fn get(&self) -> T {
        ReactiveContext::track(self.key());
        self.inner.value.read().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Borrow the current value (tracked) without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        ReactiveContext::track(self.key());
        f(&self.inner.value.read())
    }

    /// Set a new value and invalidate dependents.
    ///
    /// Returns `Ok(false)` when the value was equal to the current one.
    pub fn set(&self, value: T) -> Result<bool> {
        check_write(self.owner())?;
        {
            let mut guard = self.inner.value.write();
            if *guard == value {
                return Ok(false);
            }
            *guard = value;
        }

        tracing::trace!(source = self.inner.id.raw(), "ref write");
        commit(self.owner(), &[self.key()]);
        Ok(true)
    }

    /// Update the value in place.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<bool> {
        check_write(self.owner())?;
        let changed = {
            let mut guard = self.inner.value.write();
            let before = guard.clone();
            f(&mut guard);
            *guard != before
        };

        if changed {
            commit(self.owner(), &[self.key()]);
        }
        Ok(changed)
    }

    pub(crate) fn set_silently(&self, value: T) -> Result<()> {
        check_write(self.owner())?;
        *self.inner.value.write() = value;
        commit_silently(&[self.key()]);
        Ok(())
    }
}

impl Ref<Tracked> {
    /// Create a ref whose object or array content is reactive all the way
    /// down.
    pub fn deep(value: Value) -> Self {
        let owner = OwnerScope::current();
        Self::with_owner(Tracked::wrap_owned(value, owner.clone()), owner)
    }

    /// Replace the content with a new JSON value, wrapped like [`Ref::deep`].
    pub fn set_value(&self, value: Value) -> Result<bool> {
        if self.inner.value.read().raw_eq(&value) {
            return Ok(false);
        }
        self.set(Tracked::wrap_owned(value, self.inner.owner.clone()))
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Debug for Ref<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

impl<T> StateSource for Ref<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn snapshot(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.get())?)
    }

    fn to_raw(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.get_untracked())?)
    }

    fn assign(&self, value: Value) -> Result<()> {
        let value: T = decode_owned(self.owner(), value)?;
        self.set(value).map(|_| ())
    }

    fn hydrate(&self, value: Value) -> Result<()> {
        let value: T = decode_owned(self.owner(), value)?;
        self.set_silently(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Deserialize under the ref's owner so that deep content written later
/// still reports to the same store.
fn decode_owned<T: DeserializeOwned>(owner: Option<&ChangeSignal>, value: Value) -> Result<T> {
    let _scope = owner.cloned().map(OwnerScope::enter);
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::computed::Computed;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn ref_get_and_set() {
        let cell = Ref::new(0);
        assert_eq!(cell.get(), 0);

        assert!(cell.set(42).unwrap());
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn ref_update() {
        let cell = Ref::new(10);
        cell.update(|v| *v += 5).unwrap();
        assert_eq!(cell.get(), 15);
    }

    #[test]
    fn equal_writes_are_noops() {
        let owner = ChangeSignal::new("noop");
        let cell = Ref::with_owner(String::from("same"), Some(owner.clone()));

        assert!(!cell.set("same".into()).unwrap());
        assert!(!cell.update(|_| {}).unwrap());
        assert_eq!(owner.version(), 0);

        assert!(cell.set("different".into()).unwrap());
        assert_eq!(owner.version(), 1);
    }

    #[test]
    fn ref_clone_shares_state() {
        let cell1 = Ref::new(0);
        let cell2 = cell1.clone();

        cell1.set(42).unwrap();
        assert_eq!(cell2.get(), 42);
        assert_eq!(cell1, cell2);
        assert_ne!(cell1, Ref::new(42));
    }

    #[test]
    fn ref_ids_are_unique() {
        let r1 = Ref::new(0);
        let r2 = Ref::new(0);
        assert_ne!(r1.id(), r2.id());
    }

    #[test]
    fn silent_writes_skip_the_owner_but_refresh_computed() {
        let owner = ChangeSignal::new("hydrated");
        let cell = Ref::with_owner(1, Some(owner.clone()));
        let evaluations = Arc::new(AtomicI32::new(0));
        let counter = evaluations.clone();
        let source = cell.clone();
        let doubled = Computed::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(source.get() * 2)
        });

        assert_eq!(doubled.get().unwrap(), 2);
        cell.set_silently(21).unwrap();

        assert_eq!(owner.version(), 0);
        assert_eq!(doubled.get().unwrap(), 42);
        assert_eq!(evaluations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn deep_refs_wrap_objects() {
        let profile = Ref::deep(json!({ "name": "Ada", "tags": ["math"] }));
        let object = profile.get().as_object().cloned().unwrap();

        object.set("name", "Grace").unwrap();
        assert_eq!(profile.to_raw().unwrap(), json!({ "name": "Grace", "tags": ["math"] }));

        assert!(profile.set_value(json!(7)).unwrap());
        assert_eq!(profile.to_raw().unwrap(), json!(7));
        assert!(!profile.set_value(json!(7)).unwrap());
    }

    #[test]
    fn assigned_deep_content_keeps_the_owner() {
        let owner = ChangeSignal::new("profile");
        let initial = Tracked::wrap_owned(json!({ "name": "Ada" }), Some(owner.clone()));
        let profile = Ref::with_owner(initial, Some(owner.clone()));

        profile.hydrate(json!({ "name": "Grace" })).unwrap();
        assert_eq!(owner.version(), 0);
        let object = profile.get().as_object().cloned().unwrap();
        assert_eq!(object.owner().map(ChangeSignal::store_id), Some("profile"));
        object.set("name", "Hedy").unwrap();
        assert_eq!(owner.version(), 1);

        profile.assign(json!({ "name": "Ada" })).unwrap();
        assert_eq!(owner.version(), 2);
        profile.get().as_object().cloned().unwrap().set("name", "Grace").unwrap();
        assert_eq!(owner.version(), 3);
    }

    #[test]
    fn state_source_round_trips_through_json() {
        let cell = Ref::new(vec![1, 2, 3]);
        assert_eq!(StateSource::to_raw(&cell).unwrap(), json!([1, 2, 3]));

        cell.assign(json!([4])).unwrap();
        assert_eq!(cell.get(), vec![4]);

        assert!(cell.assign(json!("not a list")).is_err());
    }
}
