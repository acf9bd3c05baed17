//! Identifiers for the two ends of a dependency edge.
//!
//! A *source* is something that can be read (a ref, a property of a reactive
//! object, a computed value). A *subscriber* is a computation that reads
//! sources (a computed value or an effect). Edges always run from a
//! [`SourceKey`] to a [`SubscriberId`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a subscriber.
///
/// Each computed value and effect gets a unique ID when created. This ID is
/// used to record dependency edges and to detect cyclic evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a reactive node (ref, object, array, collection or
/// computed value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which part of a node was read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Prop {
    /// The single value of a ref or a computed.
    Value,
    /// A named property of a reactive object.
    Key(Arc<str>),
    /// A position in a reactive array.
    Index(usize),
    /// A hashed key of a typed map or set.
    Hashed(u64),
    /// The shape of a collection: its length, key set and iteration order.
    Iterate,
}

/// One readable location: a node plus the part of it that was read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub source: SourceId,
    pub prop: Prop,
}

impl SourceKey {
    pub fn new(source: SourceId, prop: Prop) -> Self {
        Self { source, prop }
    }

    pub fn value(source: SourceId) -> Self {
        Self::new(source, Prop::Value)
    }

    pub fn key(source: SourceId, key: &str) -> Self {
        Self::new(source, Prop::Key(Arc::from(key)))
    }

    pub fn index(source: SourceId, index: usize) -> Self {
        Self::new(source, Prop::Index(index))
    }

    pub fn iterate(source: SourceId) -> Self {
        Self::new(source, Prop::Iterate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn source_keys_compare_by_node_and_prop() {
        let node = SourceId::new();
        assert_eq!(SourceKey::key(node, "count"), SourceKey::key(node, "count"));
        assert_ne!(SourceKey::key(node, "count"), SourceKey::key(node, "total"));
        assert_ne!(SourceKey::value(node), SourceKey::iterate(node));
        assert_ne!(SourceKey::value(node), SourceKey::value(SourceId::new()));
    }
}
