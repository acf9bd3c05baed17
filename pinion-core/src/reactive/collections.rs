//! Typed reactive collections.
//!
//! [`ReactiveMap`] and [`ReactiveSet`] track reads per key (by hash) and per
//! shape. A lookup depends only on the key it asked for; iteration and
//! length depend on the shape, which every mutation invalidates.

use std::any::Any;
use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::change::{check_write, commit, commit_silently, ChangeSignal};
use super::context::{OwnerScope, ReactiveContext};
use super::source::StateSource;
use super::subscriber::{Prop, SourceId, SourceKey};
use crate::error::Result;

/// Node id plus the hasher used to turn keys into tracked locations.
struct Locations {
    id: SourceId,
    hasher: RandomState,
}

impl Locations {
    fn new() -> Self {
        Self {
            id: SourceId::new(),
            hasher: RandomState::new(),
        }
    }

    fn key<Q: Hash + ?Sized>(&self, key: &Q) -> SourceKey {
        SourceKey::new(self.id, Prop::Hashed(self.hasher.hash_one(key)))
    }

    fn shape(&self) -> SourceKey {
        SourceKey::iterate(self.id)
    }
}

struct MapInner<K, V> {
    locations: Locations,
    entries: RwLock<IndexMap<K, V>>,
    owner: Option<ChangeSignal>,
}

/// An insertion-ordered reactive map.
pub struct ReactiveMap<K, V> {
    inner: Arc<MapInner<K, V>>,
}

impl<K, V> ReactiveMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_owner(IndexMap::new(), OwnerScope::current())
    }

    pub(crate) fn with_owner(entries: IndexMap<K, V>, owner: Option<ChangeSignal>) -> Self {
        Self {
            inner: Arc::new(MapInner {
                locations: Locations::new(),
                entries: RwLock::new(entries),
                owner,
            }),
        }
    }

    pub fn id(&self) -> SourceId {
        self.inner.locations.id
    }

    pub fn owner(&self) -> Option<&ChangeSignal> {
        self.inner.owner.as_ref()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        ReactiveContext::track(self.inner.locations.key(key));
        self.inner.entries.read().get(key).cloned()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        ReactiveContext::track(self.inner.locations.key(key));
        self.inner.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        ReactiveContext::track(self.inner.locations.shape());
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        ReactiveContext::track(self.inner.locations.shape());
        self.inner.entries.read().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        ReactiveContext::track(self.inner.locations.shape());
        self.inner.entries.read().values().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        ReactiveContext::track(self.inner.locations.shape());
        self.inner
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Insert or overwrite an entry, returning the previous value.
    ///
    /// Writing a value equal to the current one notifies nobody.
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        check_write(self.owner())?;
        let location = self.inner.locations.key(&key);
        let previous = {
            let mut entries = self.inner.entries.write();
            if entries.get(&key) == Some(&value) {
                return Ok(Some(value));
            }
            entries.insert(key, value)
        };

        commit(self.owner(), &[location, self.inner.locations.shape()]);
        Ok(previous)
    }

    pub fn remove<Q>(&self, key: &Q) -> Result<Option<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        check_write(self.owner())?;
        let removed = self.inner.entries.write().shift_remove(key);
        if removed.is_some() {
            commit(
                self.owner(),
                &[self.inner.locations.key(key), self.inner.locations.shape()],
            );
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        check_write(self.owner())?;
        let removed = std::mem::take(&mut *self.inner.entries.write());
        if !removed.is_empty() {
            let mut touched: Vec<SourceKey> =
                removed.keys().map(|k| self.inner.locations.key(k)).collect();
            touched.push(self.inner.locations.shape());
            commit(self.owner(), &touched);
        }
        Ok(())
    }

    fn replace_entries(&self, entries: IndexMap<K, V>, silently: bool) -> Result<()> {
        check_write(self.owner())?;
        let previous = std::mem::replace(&mut *self.inner.entries.write(), entries.clone());
        if !silently && previous == entries {
            return Ok(());
        }

        let mut touched: Vec<SourceKey> = previous
            .keys()
            .chain(entries.keys())
            .map(|k| self.inner.locations.key(k))
            .collect();
        touched.push(self.inner.locations.shape());
        if silently {
            commit_silently(&touched);
        } else {
            commit(self.owner(), &touched);
        }
        Ok(())
    }
}

impl<K, V> Default for ReactiveMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for ReactiveMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::with_owner(iter.into_iter().collect(), OwnerScope::current())
    }
}

impl<K, V> Clone for ReactiveMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for ReactiveMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveMap")
            .field("id", &self.inner.locations.id)
            .field("entries", &*self.inner.entries.read())
            .finish()
    }
}

impl<K, V> StateSource for ReactiveMap<K, V>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn snapshot(&self) -> Result<Value> {
        ReactiveContext::track(self.inner.locations.shape());
        Ok(serde_json::to_value(&*self.inner.entries.read())?)
    }

    fn to_raw(&self) -> Result<Value> {
        Ok(serde_json::to_value(&*self.inner.entries.read())?)
    }

    fn assign(&self, value: Value) -> Result<()> {
        self.replace_entries(serde_json::from_value(value)?, false)
    }

    fn hydrate(&self, value: Value) -> Result<()> {
        self.replace_entries(serde_json::from_value(value)?, true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct SetInner<T> {
    locations: Locations,
    items: RwLock<IndexSet<T>>,
    owner: Option<ChangeSignal>,
}

/// An insertion-ordered reactive set.
pub struct ReactiveSet<T> {
    inner: Arc<SetInner<T>>,
}

impl<T> ReactiveSet<T>
where
    T: Hash + Eq + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_owner(IndexSet::new(), OwnerScope::current())
    }

    pub(crate) fn with_owner(items: IndexSet<T>, owner: Option<ChangeSignal>) -> Self {
        Self {
            inner: Arc::new(SetInner {
                locations: Locations::new(),
                items: RwLock::new(items),
                owner,
            }),
        }
    }

    pub fn id(&self) -> SourceId {
        self.inner.locations.id
    }

    pub fn owner(&self) -> Option<&ChangeSignal> {
        self.inner.owner.as_ref()
    }

    pub fn contains<Q>(&self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        ReactiveContext::track(self.inner.locations.key(item));
        self.inner.items.read().contains(item)
    }

    pub fn len(&self) -> usize {
        ReactiveContext::track(self.inner.locations.shape());
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<T> {
        ReactiveContext::track(self.inner.locations.shape());
        self.inner.items.read().iter().cloned().collect()
    }

    /// Add an item. Returns `Ok(false)` if it was already present.
    pub fn insert(&self, item: T) -> Result<bool> {
        check_write(self.owner())?;
        let location = self.inner.locations.key(&item);
        if !self.inner.items.write().insert(item) {
            return Ok(false);
        }
        commit(self.owner(), &[location, self.inner.locations.shape()]);
        Ok(true)
    }

    pub fn remove<Q>(&self, item: &Q) -> Result<bool>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        check_write(self.owner())?;
        if !self.inner.items.write().shift_remove(item) {
            return Ok(false);
        }
        commit(
            self.owner(),
            &[self.inner.locations.key(item), self.inner.locations.shape()],
        );
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        check_write(self.owner())?;
        let removed = std::mem::take(&mut *self.inner.items.write());
        if !removed.is_empty() {
            let mut touched: Vec<SourceKey> =
                removed.iter().map(|item| self.inner.locations.key(item)).collect();
            touched.push(self.inner.locations.shape());
            commit(self.owner(), &touched);
        }
        Ok(())
    }

    fn replace_items(&self, items: IndexSet<T>, silently: bool) -> Result<()> {
        check_write(self.owner())?;
        let previous = std::mem::replace(&mut *self.inner.items.write(), items.clone());
        if !silently && previous == items {
            return Ok(());
        }

        let mut touched: Vec<SourceKey> = previous
            .symmetric_difference(&items)
            .map(|item| self.inner.locations.key(item))
            .collect();
        touched.push(self.inner.locations.shape());
        if silently {
            commit_silently(&touched);
        } else {
            commit(self.owner(), &touched);
        }
        Ok(())
    }
}

impl<T> Default for ReactiveSet<T>
where
    T: Hash + Eq + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for ReactiveSet<T>
where
    T: Hash + Eq + Clone + Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::with_owner(iter.into_iter().collect(), OwnerScope::current())
    }
}

impl<T> Clone for ReactiveSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReactiveSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveSet")
            .field("id", &self.inner.locations.id)
            .field("items", &*self.inner.items.read())
            .finish()
    }
}

impl<T> StateSource for ReactiveSet<T>
where
    T: Hash + Eq + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn snapshot(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.to_vec())?)
    }

    fn to_raw(&self) -> Result<Value> {
        Ok(serde_json::to_value(&*self.inner.items.read())?)
    }

    fn assign(&self, value: Value) -> Result<()> {
        self.replace_items(serde_json::from_value(value)?, false)
    }

    fn hydrate(&self, value: Value) -> Result<()> {
        self.replace_items(serde_json::from_value(value)?, true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
