//! Type-erased views over reactive nodes used by stores.
//!
//! A store needs to treat its state uniformly (serialize it, hydrate it,
//! assign to a field by name) without knowing the concrete node types a setup
//! function created. [`StateSource`] is that seam for writable state and
//! [`GetterSource`] for derived values.

use std::any::Any;

use serde_json::Value;

use crate::error::Result;

/// Writable reactive state that can be exported to and restored from JSON.
pub trait StateSource: Send + Sync + 'static {
    /// Read the whole value, registering dependencies on everything read.
    fn snapshot(&self) -> Result<Value>;

    /// Read the whole value without tracking.
    fn to_raw(&self) -> Result<Value>;

    /// Replace the value through the normal write path.
    fn assign(&self, value: Value) -> Result<()>;

    /// Merge `value` into the current value. Defaults to [`assign`](Self::assign).
    fn patch(&self, value: Value) -> Result<()> {
        self.assign(value)
    }

    /// Replace the value without notifying subscribers or bumping the owner's
    /// change signal.
    fn hydrate(&self, value: Value) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// A derived value readable as JSON.
pub trait GetterSource: Send + Sync + 'static {
    fn read(&self) -> Result<Value>;

    fn as_any(&self) -> &dyn Any;
}
