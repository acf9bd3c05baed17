//! Error types shared by the reactive core, the store runtime, the registry
//! and the plugin manager.
//!
//! Reactive-core and store-runtime errors are programmer errors and are never
//! retried. [`Error::Action`] carries user-domain failures raised inside an
//! action; the runtime hands those back to the caller unchanged.

use thiserror::Error;

/// A boxed error produced by user code (actions, plugin hooks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong inside the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A write was attempted on a derived (read-only) value.
    #[error("`{name}` is a computed value and cannot be written")]
    ReadOnlyViolation { name: String },

    /// A computed value was re-entered while it was being evaluated.
    #[error("cyclic dependency: computed #{id} was read while it was being evaluated")]
    CyclicDependency { id: u64 },

    /// Explicit lookup of a store that does not exist in the registry.
    #[error("no store with id `{0}` in this registry")]
    UnknownStoreId(String),

    #[error("store `{store}` has no action `{action}`")]
    UnknownAction { store: String, action: String },

    #[error("store `{store}` has no member `{name}`")]
    UnknownMember { store: String, name: String },

    /// An asynchronous action was dispatched through the synchronous path.
    #[error("action `{store}.{action}` is asynchronous and must be invoked with `call`")]
    AsyncAction { store: String, action: String },

    #[error("store `{0}` was defined with a setup function and cannot be reset")]
    ResetUnsupported(String),

    /// A mutation reached a store whose registry (or the store itself) was
    /// already disposed.
    #[error("write to store `{store}` after it was disposed")]
    StaleRegistryWrite { store: String },

    #[error("index {index} is out of bounds for a reactive array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Snapshot entries that could not be applied. Every other entry was.
    #[error("could not hydrate {}: {message}", stores.join(", "))]
    Hydration { stores: Vec<String>, message: String },

    /// A failure raised by a user action.
    #[error(transparent)]
    Action(BoxError),

    /// A plugin hook failed while the registry runs in strict mode.
    #[error("plugin `{plugin}` failed in {stage} hook: {message}")]
    Hook {
        plugin: String,
        stage: &'static str,
        message: String,
    },

    /// A plugin's install routine failed.
    #[error("plugin `{plugin}` failed to install: {message}")]
    Plugin { plugin: String, message: String },

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Wrap a user-domain error raised inside an action.
    pub fn action<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Action(error.into())
    }

    /// Whether this error originated in user action code.
    pub fn is_action_error(&self) -> bool {
        matches!(self, Error::Action(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_errors_keep_their_message() {
        let err = Error::action("out of stock");
        assert!(err.is_action_error());
        assert_eq!(err.to_string(), "out of stock");
    }

    #[test]
    fn serde_errors_convert() {
        let parse: std::result::Result<i64, _> = serde_json::from_str("\"nope\"");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serde(_)));
        assert!(!err.is_action_error());
    }
}
