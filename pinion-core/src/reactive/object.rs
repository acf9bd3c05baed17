//! Reactive objects.
//!
//! A [`ReactiveObject`] wraps a JSON object and intercepts property access:
//! reads inside a tracking context register `(object, key)` as a dependency,
//! writes invalidate every computed that read that key and bump the owning
//! store's change signal. Reads of the key set (`keys`, `len`, snapshots)
//! depend on the object's shape, which changes when keys are added or
//! removed.
//!
//! Nested objects and arrays are wrapped on first access, not at creation.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::array::ReactiveArray;
use super::change::{check_write, commit, commit_silently, ChangeSignal};
use super::context::{OwnerScope, ReactiveContext};
use super::source::StateSource;
use super::subscriber::{SourceId, SourceKey};
use super::tracked::Tracked;
use crate::error::{Error, Result};

struct ObjectInner {
    id: SourceId,
    fields: RwLock<IndexMap<String, Tracked>>,
    owner: Option<ChangeSignal>,
}

/// Tracked wrapper around a JSON object.
#[derive(Clone)]
pub struct ReactiveObject {
    inner: Arc<ObjectInner>,
}

/// Wrap a JSON object. Fails for any other kind of value.
pub fn reactive(value: Value) -> Result<ReactiveObject> {
    ReactiveObject::from_value(value)
}

impl ReactiveObject {
    /// Wrap a map. Inside a store's setup the object belongs to that store.
    pub fn new(map: Map<String, Value>) -> Self {
        Self::with_owner(map, OwnerScope::current())
    }

    pub(crate) fn with_owner(map: Map<String, Value>, owner: Option<ChangeSignal>) -> Self {
        let fields = map
            .into_iter()
            .map(|(key, value)| (key, Tracked::Value(value)))
            .collect();

        Self {
            inner: Arc::new(ObjectInner {
                id: SourceId::new(),
                fields: RwLock::new(fields),
                owner,
            }),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::new(map)),
            other => Err(Error::InvalidState(format!(
                "expected a JSON object, found `{other}`"
            ))),
        }
    }

    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    pub fn owner(&self) -> Option<&ChangeSignal> {
        self.inner.owner.as_ref()
    }

    fn key(&self, key: &str) -> SourceKey {
        SourceKey::key(self.inner.id, key)
    }

    fn shape(&self) -> SourceKey {
        SourceKey::iterate(self.inner.id)
    }

    /// The slot under `key`, promoting a plain container on the way.
    fn slot(&self, key: &str) -> Option<Tracked> {
        {
            let fields = self.inner.fields.read();
            let slot = fields.get(key)?;
            if !slot.is_lazy_container() {
                return Some(slot.clone());
            }
        }

        let mut fields = self.inner.fields.write();
        fields
            .get_mut(key)
            .map(|slot| slot.promote(&self.inner.owner))
    }

    /// Read a property as plain JSON.
    ///
    /// Inside a tracking context this depends on the property and on
    /// everything nested under it.
    pub fn get(&self, key: &str) -> Option<Value> {
        ReactiveContext::track(self.key(key));
        self.slot(key).map(|slot| slot.snapshot())
    }

    pub fn get_untracked(&self, key: &str) -> Option<Value> {
        self.inner.fields.read().get(key).map(Tracked::to_raw)
    }

    /// Read a property and deserialize it.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        ReactiveContext::track(self.key(key));
        self.inner.fields.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        ReactiveContext::track(self.shape());
        self.inner.fields.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        ReactiveContext::track(self.shape());
        self.inner.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The nested object under `key`, wrapped on first access.
    pub fn object(&self, key: &str) -> Option<ReactiveObject> {
        ReactiveContext::track(self.key(key));
        match self.slot(key)? {
            Tracked::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The nested array under `key`, wrapped on first access.
    pub fn array(&self, key: &str) -> Option<ReactiveArray> {
        ReactiveContext::track(self.key(key));
        match self.slot(key)? {
            Tracked::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Write a property.
    ///
    /// Returns `Ok(false)` without notifying anyone when the new value equals
    /// the current one.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        check_write(self.owner())?;
        let value = value.into();

        let added = {
            let mut fields = self.inner.fields.write();
            match fields.get_mut(key) {
                Some(slot) if slot.raw_eq(&value) => return Ok(false),
                Some(slot) => {
                    *slot = Tracked::Value(value);
                    false
                }
                None => {
                    fields.insert(key.to_owned(), Tracked::Value(value));
                    true
                }
            }
        };

        tracing::trace!(object = self.inner.id.raw(), key, added, "reactive write");

        if added {
            commit(self.owner(), &[self.key(key), self.shape()]);
        } else {
            commit(self.owner(), &[self.key(key)]);
        }
        Ok(true)
    }

    /// Compute a property's new value from its current one.
    pub fn update(&self, key: &str, f: impl FnOnce(Option<&Value>) -> Value) -> Result<bool> {
        let current = self.get_untracked(key);
        self.set(key, f(current.as_ref()))
    }

    /// Delete a property, returning its last value.
    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        check_write(self.owner())?;
        let removed = self.inner.fields.write().shift_remove(key);

        if removed.is_some() {
            commit(self.owner(), &[self.key(key), self.shape()]);
        }
        Ok(removed.map(|slot| slot.to_raw()))
    }

    /// Deep copy as plain JSON without tracking.
    pub fn to_raw(&self) -> Value {
        let fields = self.inner.fields.read();
        Value::Object(
            fields
                .iter()
                .map(|(key, slot)| (key.clone(), slot.to_raw()))
                .collect(),
        )
    }

    /// Deep copy as plain JSON, depending on every key and nested location.
    pub fn snapshot(&self) -> Value {
        let mut map = Map::new();
        for key in self.keys() {
            if let Some(value) = self.get(&key) {
                map.insert(key, value);
            }
        }
        Value::Object(map)
    }

    /// Deep-merge `value` into this object: nested objects merge key by key,
    /// everything else is overwritten.
    pub fn merge(&self, value: Value) -> Result<()> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidState(format!(
                    "cannot merge `{other}` into an object"
                )))
            }
        };
        self.batched(|| {
            for (key, incoming) in map {
                match (self.existing_object(&key), incoming) {
                    (Some(child), incoming @ Value::Object(_)) => child.merge(incoming)?,
                    (_, incoming) => {
                        self.set(&key, incoming)?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Replace the whole content: keys missing from `value` are removed.
    pub fn replace(&self, value: Value) -> Result<()> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidState(format!(
                    "cannot replace an object with `{other}`"
                )))
            }
        };
        self.batched(|| {
            let stale: Vec<String> = self
                .inner
                .fields
                .read()
                .keys()
                .filter(|key| !map.contains_key(*key))
                .cloned()
                .collect();
            for key in stale {
                self.remove(&key)?;
            }
            for (key, value) in map {
                self.set(&key, value)?;
            }
            Ok(())
        })
    }

    /// Overwrite the keys present in both `value` and this object without
    /// any observable notification.
    pub(crate) fn hydrate_fields(&self, value: Value) -> Result<()> {
        check_write(self.owner())?;
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidState(format!(
                    "cannot hydrate an object from `{other}`"
                )))
            }
        };

        let mut touched = Vec::new();
        {
            let mut fields = self.inner.fields.write();
            for (key, value) in map {
                if let Some(slot) = fields.get_mut(&key) {
                    *slot = Tracked::Value(value);
                    touched.push(self.key(&key));
                }
            }
        }
        commit_silently(&touched);
        Ok(())
    }

    /// An already-present nested object, without tracking.
    fn existing_object(&self, key: &str) -> Option<ReactiveObject> {
        let is_object = matches!(
            self.inner.fields.read().get(key),
            Some(Tracked::Object(_)) | Some(Tracked::Value(Value::Object(_)))
        );
        if !is_object {
            return None;
        }
        match self.slot(key)? {
            Tracked::Object(object) => Some(object),
            _ => None,
        }
    }

    fn batched(&self, f: impl FnOnce() -> Result<()>) -> Result<()> {
        match self.owner() {
            Some(owner) => owner.batch(f),
            None => f(),
        }
    }
}

impl PartialEq for ReactiveObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ReactiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveObject")
            .field("id", &self.inner.id)
            .field("value", &self.to_raw())
            .finish()
    }
}

impl StateSource for ReactiveObject {
    fn snapshot(&self) -> Result<Value> {
        Ok(ReactiveObject::snapshot(self))
    }

    fn to_raw(&self) -> Result<Value> {
        Ok(ReactiveObject::to_raw(self))
    }

    fn assign(&self, value: Value) -> Result<()> {
        self.replace(value)
    }

    fn patch(&self, value: Value) -> Result<()> {
        self.merge(value)
    }

    fn hydrate(&self, value: Value) -> Result<()> {
        self.hydrate_fields(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::computed::Computed;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn owned(value: Value) -> (ReactiveObject, ChangeSignal) {
        let owner = ChangeSignal::new("test");
        let Value::Object(map) = value else {
            panic!("test state must be an object");
        };
        (ReactiveObject::with_owner(map, Some(owner.clone())), owner)
    }

    #[test]
    fn last_write_wins() {
        let (object, owner) = owned(json!({ "p": 0 }));
        for value in [3, 1, 4, 1, 5] {
            object.set("p", value).unwrap();
        }
        assert_eq!(object.get("p"), Some(json!(5)));
        // 3, 1, 4, 1, 5: every write differs from its predecessor
        assert_eq!(owner.version(), 5);
    }

    #[test]
    fn reactive_rejects_non_objects() {
        assert!(reactive(json!([1])).is_err());
        assert!(reactive(json!({ "a": 1 })).is_ok());
    }

    #[test]
    fn computed_depends_only_on_keys_it_read() {
        let (object, _) = owned(json!({ "a": 1, "b": 2 }));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let source = object.clone();
        let a_plus_one = Computed::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(source.get_as::<i64>("a")?.unwrap_or(0) + 1)
        });

        assert_eq!(a_plus_one.get().unwrap(), 2);
        object.set("b", 20).unwrap();
        assert_eq!(a_plus_one.get().unwrap(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        object.set("a", 10).unwrap();
        assert_eq!(a_plus_one.get().unwrap(), 11);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nested_objects_are_wrapped_on_first_access() {
        let (object, owner) = owned(json!({ "user": { "name": "Ada" } }));
        let source = object.clone();
        let name = Computed::new(move || Ok(source.get("user").unwrap_or(Value::Null)));

        assert_eq!(name.get().unwrap(), json!({ "name": "Ada" }));

        let user = object.object("user").unwrap();
        assert_eq!(user.owner().map(|o| o.store_id().to_owned()), Some("test".into()));
        user.set("name", "Grace").unwrap();

        assert_eq!(name.get().unwrap(), json!({ "name": "Grace" }));
        assert_eq!(owner.version(), 1);
        assert_eq!(object.object("user"), Some(user));
    }

    #[test]
    fn shape_reads_see_added_and_removed_keys() {
        let (object, _) = owned(json!({ "a": 1 }));
        let source = object.clone();
        let keys = Computed::new(move || Ok(source.keys()));

        assert_eq!(keys.get().unwrap(), vec!["a".to_owned()]);
        object.set("b", 2).unwrap();
        assert_eq!(keys.get().unwrap(), vec!["a".to_owned(), "b".to_owned()]);
        object.remove("a").unwrap();
        assert_eq!(keys.get().unwrap(), vec!["b".to_owned()]);
    }

    #[test]
    fn merge_is_deep_and_bumps_once() {
        let (object, owner) = owned(json!({ "user": { "name": "Ada", "age": 36 }, "n": 1 }));
        object
            .merge(json!({ "user": { "age": 37 }, "n": 2, "extra": true }))
            .unwrap();

        assert_eq!(
            object.to_raw(),
            json!({ "user": { "name": "Ada", "age": 37 }, "n": 2, "extra": true })
        );
        assert_eq!(owner.version(), 1);
    }

    #[test]
    fn replace_drops_missing_keys() {
        let (object, _) = owned(json!({ "a": 1, "b": 2 }));
        object.replace(json!({ "b": 3, "c": 4 })).unwrap();
        assert_eq!(object.to_raw(), json!({ "b": 3, "c": 4 }));
    }

    #[test]
    fn hydrate_only_touches_existing_keys_and_stays_silent() {
        let (object, owner) = owned(json!({ "a": 1, "b": 2 }));
        object.hydrate_fields(json!({ "a": 10, "zzz": 0 })).unwrap();

        assert_eq!(object.to_raw(), json!({ "a": 10, "b": 2 }));
        assert_eq!(owner.version(), 0);
    }
}
