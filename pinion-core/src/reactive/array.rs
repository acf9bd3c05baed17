//! Reactive arrays.
//!
//! Reads of a single position depend on that index; reads of the length or
//! of the whole sequence depend on the array's shape. Every mutating method
//! invalidates the positions it shifted or replaced plus the shape, then
//! bumps the owner once.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::change::{check_write, commit, commit_silently, ChangeSignal};
use super::context::{OwnerScope, ReactiveContext};
use super::object::ReactiveObject;
use super::source::StateSource;
use super::subscriber::{SourceId, SourceKey};
use super::tracked::Tracked;
use crate::error::{Error, Result};

struct ArrayInner {
    id: SourceId,
    items: RwLock<Vec<Tracked>>,
    owner: Option<ChangeSignal>,
}

/// Tracked wrapper around a JSON array.
#[derive(Clone)]
pub struct ReactiveArray {
    inner: Arc<ArrayInner>,
}

impl ReactiveArray {
    pub fn new(items: Vec<Value>) -> Self {
        Self::with_owner(items, OwnerScope::current())
    }

    pub(crate) fn with_owner(items: Vec<Value>, owner: Option<ChangeSignal>) -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                id: SourceId::new(),
                items: RwLock::new(items.into_iter().map(Tracked::Value).collect()),
                owner,
            }),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => Ok(Self::new(items)),
            other => Err(Error::InvalidState(format!(
                "expected a JSON array, found `{other}`"
            ))),
        }
    }

    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    pub fn owner(&self) -> Option<&ChangeSignal> {
        self.inner.owner.as_ref()
    }

    fn index_key(&self, index: usize) -> SourceKey {
        SourceKey::index(self.inner.id, index)
    }

    fn shape(&self) -> SourceKey {
        SourceKey::iterate(self.inner.id)
    }

    fn slot(&self, index: usize) -> Option<Tracked> {
        {
            let items = self.inner.items.read();
            let slot = items.get(index)?;
            if !slot.is_lazy_container() {
                return Some(slot.clone());
            }
        }

        let mut items = self.inner.items.write();
        items
            .get_mut(index)
            .map(|slot| slot.promote(&self.inner.owner))
    }

    /// Publish a mutation that touched `positions` and possibly the length.
    fn changed(&self, positions: Range<usize>) {
        let mut keys: Vec<SourceKey> = positions.map(|i| self.index_key(i)).collect();
        keys.push(self.shape());
        tracing::trace!(array = self.inner.id.raw(), touched = keys.len() - 1, "reactive array write");
        commit(self.owner(), &keys);
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        ReactiveContext::track(self.index_key(index));
        self.slot(index).map(|slot| slot.snapshot())
    }

    pub fn get_untracked(&self, index: usize) -> Option<Value> {
        self.inner.items.read().get(index).map(Tracked::to_raw)
    }

    pub fn len(&self) -> usize {
        ReactiveContext::track(self.shape());
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn object(&self, index: usize) -> Option<ReactiveObject> {
        ReactiveContext::track(self.index_key(index));
        match self.slot(index)? {
            Tracked::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn array(&self, index: usize) -> Option<ReactiveArray> {
        ReactiveContext::track(self.index_key(index));
        match self.slot(index)? {
            Tracked::Array(array) => Some(array),
            _ => None,
        }
    }

    /// All elements as plain JSON, depending on every position.
    pub fn to_vec(&self) -> Vec<Value> {
        let len = self.len();
        (0..len).filter_map(|i| self.get(i)).collect()
    }

    pub fn snapshot(&self) -> Value {
        Value::Array(self.to_vec())
    }

    pub fn to_raw(&self) -> Value {
        Value::Array(self.inner.items.read().iter().map(Tracked::to_raw).collect())
    }

    /// Overwrite one position. The index must already exist.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<bool> {
        check_write(self.owner())?;
        let value = value.into();
        {
            let mut items = self.inner.items.write();
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(Error::IndexOutOfBounds { index, len })?;
            if slot.raw_eq(&value) {
                return Ok(false);
            }
            *slot = Tracked::Value(value);
        }

        commit(self.owner(), &[self.index_key(index)]);
        Ok(true)
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        check_write(self.owner())?;
        let index = {
            let mut items = self.inner.items.write();
            items.push(Tracked::Value(value.into()));
            items.len() - 1
        };
        self.changed(index..index + 1);
        Ok(())
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        check_write(self.owner())?;
        let (popped, len) = {
            let mut items = self.inner.items.write();
            let popped = items.pop();
            (popped, items.len())
        };
        if popped.is_some() {
            self.changed(len..len + 1);
        }
        Ok(popped.map(|slot| slot.to_raw()))
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        check_write(self.owner())?;
        let len = {
            let mut items = self.inner.items.write();
            let len = items.len();
            if index > len {
                return Err(Error::IndexOutOfBounds { index, len });
            }
            items.insert(index, Tracked::Value(value.into()));
            items.len()
        };
        self.changed(index..len);
        Ok(())
    }

    pub fn remove(&self, index: usize) -> Result<Value> {
        check_write(self.owner())?;
        let (removed, old_len) = {
            let mut items = self.inner.items.write();
            let len = items.len();
            if index >= len {
                return Err(Error::IndexOutOfBounds { index, len });
            }
            (items.remove(index), len)
        };
        self.changed(index..old_len);
        Ok(removed.to_raw())
    }

    pub fn extend(&self, values: impl IntoIterator<Item = Value>) -> Result<()> {
        check_write(self.owner())?;
        let (start, end) = {
            let mut items = self.inner.items.write();
            let start = items.len();
            items.extend(values.into_iter().map(Tracked::Value));
            (start, items.len())
        };
        if end > start {
            self.changed(start..end);
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        check_write(self.owner())?;
        let old_len = {
            let mut items = self.inner.items.write();
            let len = items.len();
            items.clear();
            len
        };
        if old_len > 0 {
            self.changed(0..old_len);
        }
        Ok(())
    }

    pub fn swap(&self, a: usize, b: usize) -> Result<()> {
        check_write(self.owner())?;
        {
            let mut items = self.inner.items.write();
            let len = items.len();
            if let Some(index) = [a, b].into_iter().find(|&i| i >= len) {
                return Err(Error::IndexOutOfBounds { index, len });
            }
            if a == b {
                return Ok(());
            }
            items.swap(a, b);
        }
        commit(self.owner(), &[self.index_key(a), self.index_key(b)]);
        Ok(())
    }

    /// Keep only the elements for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&Value) -> bool) -> Result<usize> {
        check_write(self.owner())?;
        let (removed, old_len) = {
            let mut items = self.inner.items.write();
            let old_len = items.len();
            items.retain(|slot| keep(&slot.to_raw()));
            (old_len - items.len(), old_len)
        };
        if removed > 0 {
            self.changed(0..old_len);
        }
        Ok(removed)
    }

    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) -> Result<()> {
        check_write(self.owner())?;
        let (changed, len) = {
            let mut items = self.inner.items.write();
            let mut values: Vec<Value> = items.iter().map(Tracked::to_raw).collect();
            let before = values.clone();
            values.sort_by(&mut compare);
            let changed = values != before;
            if changed {
                *items = values.into_iter().map(Tracked::Value).collect();
            }
            (changed, items.len())
        };
        if changed {
            self.changed(0..len);
        }
        Ok(())
    }

    pub fn reverse(&self) -> Result<()> {
        check_write(self.owner())?;
        let len = {
            let mut items = self.inner.items.write();
            items.reverse();
            items.len()
        };
        if len > 1 {
            self.changed(0..len);
        }
        Ok(())
    }

    /// Replace the whole content through the normal write path.
    pub fn replace(&self, values: Vec<Value>) -> Result<()> {
        check_write(self.owner())?;
        let (touched, unchanged) = {
            let mut items = self.inner.items.write();
            let current: Vec<Value> = items.iter().map(Tracked::to_raw).collect();
            if current == values {
                (0, true)
            } else {
                let touched = current.len().max(values.len());
                *items = values.into_iter().map(Tracked::Value).collect();
                (touched, false)
            }
        };
        if !unchanged {
            self.changed(0..touched);
        }
        Ok(())
    }

    pub(crate) fn hydrate_items(&self, values: Vec<Value>) -> Result<()> {
        check_write(self.owner())?;
        let touched = {
            let mut items = self.inner.items.write();
            let touched = items.len().max(values.len());
            *items = values.into_iter().map(Tracked::Value).collect();
            touched
        };
        let mut keys: Vec<SourceKey> = (0..touched).map(|i| self.index_key(i)).collect();
        keys.push(self.shape());
        commit_silently(&keys);
        Ok(())
    }
}

fn expect_array(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(Error::InvalidState(format!(
            "expected a JSON array, found `{other}`"
        ))),
    }
}

impl PartialEq for ReactiveArray {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ReactiveArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveArray")
            .field("id", &self.inner.id)
            .field("value", &self.to_raw())
            .finish()
    }
}

impl StateSource for ReactiveArray {
    fn snapshot(&self) -> Result<Value> {
        Ok(ReactiveArray::snapshot(self))
    }

    fn to_raw(&self) -> Result<Value> {
        Ok(ReactiveArray::to_raw(self))
    }

    fn assign(&self, value: Value) -> Result<()> {
        self.replace(expect_array(value)?)
    }

    fn hydrate(&self, value: Value) -> Result<()> {
        self.hydrate_items(expect_array(value)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
