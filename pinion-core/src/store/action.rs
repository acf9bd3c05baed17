//! Actions and the context they run in.

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;

use super::instance::Store;
use crate::error::{Error, Result};
use crate::reactive::ReactiveObject;

pub(crate) type SyncActionFn = Arc<dyn Fn(&ActionContext, Vec<Value>) -> Result<Value> + Send + Sync>;
pub(crate) type AsyncActionFn =
    Arc<dyn Fn(ActionContext, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// An action as registered on a store.
#[derive(Clone)]
pub(crate) enum Action {
    Sync(SyncActionFn),
    Async(AsyncActionFn),
}

impl Action {
    pub(crate) fn sync<F>(f: F) -> Self
    where
        F: Fn(&ActionContext, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Action::Sync(Arc::new(f))
    }

    pub(crate) fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(ActionContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Action::Async(Arc::new(move |ctx, args| f(ctx, args).boxed()))
    }

    pub(crate) fn is_async(&self) -> bool {
        matches!(self, Action::Async(_))
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Sync(_) => f.write_str("Action::Sync"),
            Action::Async(_) => f.write_str("Action::Async"),
        }
    }
}

/// The bound context an action runs against.
///
/// Dereferences to the [`Store`] so an action can read state, call getters
/// and dispatch sibling actions.
#[derive(Clone)]
pub struct ActionContext {
    store: Store,
}

impl ActionContext {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The state object of a declarative store.
    pub fn state(&self) -> Result<ReactiveObject> {
        self.store.state().ok_or_else(|| {
            Error::InvalidState(format!(
                "store `{}` was defined with a setup function and has no state object",
                self.store.id()
            ))
        })
    }

    /// Fetch a positional argument and deserialize it.
    pub fn arg<T: serde::de::DeserializeOwned>(args: &[Value], index: usize) -> Result<T> {
        let value = args.get(index).cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }
}

impl Deref for ActionContext {
    type Target = Store;

    fn deref(&self) -> &Store {
        &self.store
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("store", &self.store.id())
            .finish()
    }
}

/// What plugins see before an action runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEvent {
    pub store_id: String,
    pub action_name: String,
    pub args: Vec<Value>,
}

/// What plugins see after an action ran. Exactly one side is set.
#[derive(Debug, Clone, Copy)]
pub struct ActionOutcome<'a> {
    pub result: Option<&'a Value>,
    pub error: Option<&'a Error>,
}

impl<'a> ActionOutcome<'a> {
    pub(crate) fn from_result(result: &'a Result<Value>) -> Self {
        match result {
            Ok(value) => Self {
                result: Some(value),
                error: None,
            },
            Err(error) => Self {
                result: None,
                error: Some(error),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
