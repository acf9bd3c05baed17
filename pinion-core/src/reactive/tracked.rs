//! A slot in a reactive JSON tree.
//!
//! Containers store their children as [`Tracked`] slots. A freshly written
//! object or array stays a plain [`Tracked::Value`] until someone reaches into
//! it; the first access promotes it to a reactive handle in place. That keeps
//! creation O(1) regardless of how large the initial state is.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::array::ReactiveArray;
use super::change::ChangeSignal;
use super::context::OwnerScope;
use super::object::ReactiveObject;

#[derive(Clone)]
pub enum Tracked {
    /// A plain JSON value; containers in here have not been accessed yet.
    Value(Value),
    Object(ReactiveObject),
    Array(ReactiveArray),
}

impl Tracked {
    /// Wrap a JSON value: objects and arrays become reactive handles.
    pub fn wrap(value: Value) -> Self {
        Self::wrap_owned(value, OwnerScope::current())
    }

    pub(crate) fn wrap_owned(value: Value, owner: Option<ChangeSignal>) -> Self {
        match value {
            Value::Object(map) => Tracked::Object(ReactiveObject::with_owner(map, owner)),
            Value::Array(items) => Tracked::Array(ReactiveArray::with_owner(items, owner)),
            other => Tracked::Value(other),
        }
    }

    /// Promote a plain container to a reactive handle and return a cheap
    /// clone of the resulting slot.
    pub(crate) fn promote(&mut self, owner: &Option<ChangeSignal>) -> Tracked {
        if let Tracked::Value(value) = self {
            if value.is_object() || value.is_array() {
                *self = Tracked::wrap_owned(value.take(), owner.clone());
            }
        }
        self.clone()
    }

    /// Whether reading this slot requires promotion first.
    pub(crate) fn is_lazy_container(&self) -> bool {
        matches!(self, Tracked::Value(v) if v.is_object() || v.is_array())
    }

    /// Deep copy as plain JSON without tracking.
    pub fn to_raw(&self) -> Value {
        match self {
            Tracked::Value(value) => value.clone(),
            Tracked::Object(object) => object.to_raw(),
            Tracked::Array(array) => array.to_raw(),
        }
    }

    /// Deep copy as plain JSON, tracking every location read.
    pub fn snapshot(&self) -> Value {
        match self {
            Tracked::Value(value) => value.clone(),
            Tracked::Object(object) => object.snapshot(),
            Tracked::Array(array) => array.snapshot(),
        }
    }

    /// Structural comparison with a plain value.
    pub(crate) fn raw_eq(&self, other: &Value) -> bool {
        match self {
            Tracked::Value(value) => value == other,
            _ => self.to_raw() == *other,
        }
    }

    pub fn as_object(&self) -> Option<&ReactiveObject> {
        match self {
            Tracked::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ReactiveArray> {
        match self {
            Tracked::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Tracked::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl PartialEq for Tracked {
    /// Plain values compare structurally, reactive handles by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Tracked::Value(a), Tracked::Value(b)) => a == b,
            (Tracked::Object(a), Tracked::Object(b)) => a == b,
            (Tracked::Array(a), Tracked::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tracked::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Tracked::Object(object) => f.debug_tuple("Object").field(object).finish(),
            Tracked::Array(array) => f.debug_tuple("Array").field(array).finish(),
        }
    }
}

impl Serialize for Tracked {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tracked {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Tracked::wrap)
    }
}

impl From<Value> for Tracked {
    fn from(value: Value) -> Self {
        Tracked::wrap(value)
    }
}
