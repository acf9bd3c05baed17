//! Store instances.
//!
//! Both authoring styles end up as the same [`Store`]: an id, a change
//! signal, named state, named getters, named actions and plugin
//! extensions. What differs is only where state and getters live:
//!
//! - declarative stores keep one [`ReactiveObject`] for all state and one
//!   [`Computed`] per getter, evaluated against a [`StoreView`];
//! - setup stores keep whatever named [`StateSource`]s and
//!   [`GetterSource`]s their setup function returned.
//!
//! Every mutation of state created for a store bumps that store's change
//! signal once. Actions do not bump it themselves; only the writes they
//! perform do.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use futures_util::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::action::{Action, ActionContext, ActionEvent, ActionOutcome};
use super::definition::StoreOptions;
use crate::error::{Error, Result};
use crate::plugin::PluginManager;
use crate::reactive::{
    untrack, ChangeSignal, Computed, GetterSource, ReactiveObject, Ref, StateSource, Subscription,
};
use crate::registry::WeakRegistry;

type GetterTable = IndexMap<String, Computed<Value>>;
type Extension = Arc<dyn Any + Send + Sync>;

/// Read access to a declarative store's state and getters, handed to every
/// getter function.
#[derive(Clone)]
pub struct StoreView {
    id: Arc<str>,
    state: ReactiveObject,
    getters: Weak<OnceLock<GetterTable>>,
}

impl StoreView {
    pub(crate) fn new(id: String, state: ReactiveObject, getters: &Arc<OnceLock<GetterTable>>) -> Self {
        Self {
            id: Arc::from(id),
            state,
            getters: Arc::downgrade(getters),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &ReactiveObject {
        &self.state
    }

    /// Read another getter of the same store.
    pub fn getter(&self, name: &str) -> Result<Value> {
        let table = self
            .getters
            .upgrade()
            .ok_or_else(|| Error::InvalidState(format!("store `{}` was dropped", self.id)))?;
        let computed = table
            .get()
            .and_then(|getters| getters.get(name))
            .cloned()
            .ok_or_else(|| Error::UnknownMember {
                store: self.id.to_string(),
                name: name.to_owned(),
            })?;
        computed.get()
    }

    /// A state field, falling back to a getter of the same name.
    pub fn get(&self, name: &str) -> Result<Value> {
        match self.state.get(name) {
            Some(value) => Ok(value),
            None => self.getter(name),
        }
    }

    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        Ok(serde_json::from_value(self.get(name)?)?)
    }
}

impl fmt::Debug for StoreView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreView").field("id", &self.id).finish()
    }
}

pub(crate) enum StoreKind {
    Declarative {
        state: ReactiveObject,
        getters: Arc<OnceLock<GetterTable>>,
        options: Arc<StoreOptions>,
    },
    Setup {
        state: IndexMap<String, Arc<dyn StateSource>>,
        getters: IndexMap<String, Arc<dyn GetterSource>>,
    },
}

/// What a registry hands to a definition when it instantiates a store.
pub(crate) struct StoreParts {
    pub(crate) signal: ChangeSignal,
    pub(crate) plugins: Arc<PluginManager>,
    pub(crate) registry: WeakRegistry,
}

struct StoreInner {
    id: String,
    kind: StoreKind,
    actions: IndexMap<String, Action>,
    signal: ChangeSignal,
    extensions: RwLock<IndexMap<String, Extension>>,
    plugins: Arc<PluginManager>,
    registry: WeakRegistry,
}

/// A live store instance. Cloning is cheap and yields the same instance.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub(crate) fn from_parts(
        id: String,
        kind: StoreKind,
        actions: IndexMap<String, Action>,
        parts: StoreParts,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                id,
                kind,
                actions,
                signal: parts.signal,
                extensions: RwLock::new(IndexMap::new()),
                plugins: parts.plugins,
                registry: parts.registry,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn is_declarative(&self) -> bool {
        matches!(self.inner.kind, StoreKind::Declarative { .. })
    }

    /// The signal render integrations subscribe to.
    pub fn change_signal(&self) -> &ChangeSignal {
        &self.inner.signal
    }

    /// Current value of the change signal.
    pub fn version(&self) -> u64 {
        self.inner.signal.version()
    }

    /// Store-granularity subscription: `listener` receives the new version
    /// after every mutation.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.inner.signal.subscribe(listener)
    }

    /// The state object of a declarative store.
    pub fn state(&self) -> Option<ReactiveObject> {
        match &self.inner.kind {
            StoreKind::Declarative { state, .. } => Some(state.clone()),
            StoreKind::Setup { .. } => None,
        }
    }

    pub fn state_names(&self) -> Vec<String> {
        match &self.inner.kind {
            StoreKind::Declarative { state, .. } => untrack(|| state.keys()),
            StoreKind::Setup { state, .. } => state.keys().cloned().collect(),
        }
    }

    pub fn getter_names(&self) -> Vec<String> {
        match &self.inner.kind {
            StoreKind::Declarative { getters, .. } => getters
                .get()
                .map(|table| table.keys().cloned().collect())
                .unwrap_or_default(),
            StoreKind::Setup { getters, .. } => getters.keys().cloned().collect(),
        }
    }

    pub fn action_names(&self) -> Vec<String> {
        self.inner.actions.keys().cloned().collect()
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.inner.actions.contains_key(name)
    }

    /// Whether `name` must be invoked through [`Store::call`].
    pub fn is_async_action(&self, name: &str) -> bool {
        self.inner.actions.get(name).is_some_and(Action::is_async)
    }

    fn unknown(&self, name: &str) -> Error {
        Error::UnknownMember {
            store: self.inner.id.clone(),
            name: name.to_owned(),
        }
    }

    fn declarative_getter(getters: &OnceLock<GetterTable>, name: &str) -> Option<Computed<Value>> {
        getters.get().and_then(|table| table.get(name)).cloned()
    }

    /// A named state source of a setup store, with its concrete type.
    pub fn state_source<S>(&self, name: &str) -> Result<S>
    where
        S: StateSource + Clone,
    {
        match &self.inner.kind {
            StoreKind::Setup { state, .. } => state
                .get(name)
                .and_then(|source| source.as_any().downcast_ref::<S>())
                .cloned()
                .ok_or_else(|| self.unknown(name)),
            StoreKind::Declarative { .. } => Err(self.unknown(name)),
        }
    }

    /// A named [`Ref`] of a setup store.
    pub fn state_ref<T>(&self, name: &str) -> Result<Ref<T>>
    where
        T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.state_source::<Ref<T>>(name)
    }

    /// A getter as a typed [`Computed`]. Declarative getters are
    /// `Computed<Value>`.
    pub fn computed<T>(&self, name: &str) -> Result<Computed<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let found = match &self.inner.kind {
            StoreKind::Declarative { getters, .. } => Self::declarative_getter(getters, name)
                .and_then(|computed| (&computed as &dyn Any).downcast_ref::<Computed<T>>().cloned()),
            StoreKind::Setup { getters, .. } => getters
                .get(name)
                .and_then(|getter| getter.as_any().downcast_ref::<Computed<T>>())
                .cloned(),
        };
        found.ok_or_else(|| self.unknown(name))
    }

    /// Evaluate a getter by name.
    pub fn getter(&self, name: &str) -> Result<Value> {
        match &self.inner.kind {
            StoreKind::Declarative { getters, .. } => Self::declarative_getter(getters, name)
                .ok_or_else(|| self.unknown(name))?
                .get(),
            StoreKind::Setup { getters, .. } => getters
                .get(name)
                .ok_or_else(|| self.unknown(name))?
                .read(),
        }
    }

    /// Merged read: a state field, else a getter, else a JSON value a plugin
    /// attached under `name`.
    pub fn get(&self, name: &str) -> Result<Value> {
        match &self.inner.kind {
            StoreKind::Declarative { state, getters, .. } => {
                if let Some(value) = state.get(name) {
                    return Ok(value);
                }
                if let Some(computed) = Self::declarative_getter(getters, name) {
                    return computed.get();
                }
            }
            StoreKind::Setup { state, getters } => {
                if let Some(source) = state.get(name) {
                    return source.snapshot();
                }
                if let Some(getter) = getters.get(name) {
                    return getter.read();
                }
            }
        }

        self.extension::<Value>(name)
            .map(|value| Value::clone(&value))
            .ok_or_else(|| self.unknown(name))
    }

    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        Ok(serde_json::from_value(self.get(name)?)?)
    }

    /// Write a state field through the normal reactive path.
    ///
    /// Getters are read-only; names that are neither state nor getter are
    /// unknown.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let read_only = || Error::ReadOnlyViolation {
            name: format!("{}.{name}", self.inner.id),
        };

        match &self.inner.kind {
            StoreKind::Declarative { state, getters, .. } => {
                if Self::declarative_getter(getters, name).is_some() {
                    return Err(read_only());
                }
                if !untrack(|| state.contains_key(name)) {
                    return Err(self.unknown(name));
                }
                state.set(name, value).map(|_| ())
            }
            StoreKind::Setup { state, getters } => {
                if let Some(source) = state.get(name) {
                    return source.assign(value.into());
                }
                if getters.contains_key(name) {
                    return Err(read_only());
                }
                Err(self.unknown(name))
            }
        }
    }

    fn action(&self, name: &str) -> Result<Action> {
        self.inner
            .actions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAction {
                store: self.inner.id.clone(),
                action: name.to_owned(),
            })
    }

    fn event(&self, name: &str, args: Vec<Value>) -> ActionEvent {
        ActionEvent {
            store_id: self.inner.id.clone(),
            action_name: name.to_owned(),
            args,
        }
    }

    /// Invoke a synchronous action.
    ///
    /// Plugin hooks run around it. The action's own error is returned
    /// unchanged after the after-action hooks observed it.
    pub fn dispatch(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let run = match self.action(name)? {
            Action::Sync(run) => run,
            Action::Async(_) => {
                return Err(Error::AsyncAction {
                    store: self.inner.id.clone(),
                    action: name.to_owned(),
                })
            }
        };

        let event = self.event(name, args);
        let before = self.inner.plugins.before_action(&event);
        let context = ActionContext::new(self.clone());
        let result = untrack(|| run(&context, event.args.clone()));
        self.finish_action(&event, result, before)
    }

    /// Invoke any action, synchronous or asynchronous.
    ///
    /// The returned future owns a handle to the store, so the action keeps
    /// its binding across every suspension point.
    pub fn call(&self, name: &str, args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        let store = self.clone();
        let name = name.to_owned();

        async move {
            let action = store.action(&name)?;
            let event = store.event(&name, args);
            let before = store.inner.plugins.before_action(&event);
            let context = ActionContext::new(store.clone());

            let result = match action {
                Action::Sync(run) => untrack(|| run(&context, event.args.clone())),
                Action::Async(run) => run(context, event.args.clone()).await,
            };
            store.finish_action(&event, result, before)
        }
        .boxed()
    }

    fn finish_action(
        &self,
        event: &ActionEvent,
        result: Result<Value>,
        before: Option<Error>,
    ) -> Result<Value> {
        match &result {
            Ok(_) => tracing::trace!(store = %event.store_id, action = %event.action_name, "action finished"),
            Err(err) => tracing::debug!(
                store = %event.store_id,
                action = %event.action_name,
                error = %err,
                "action failed"
            ),
        }

        let after = self
            .inner
            .plugins
            .after_action(event, &ActionOutcome::from_result(&result));

        // The action's own error wins over any hook failure.
        let value = result?;
        match before.or(after) {
            Some(hook_error) => Err(hook_error),
            None => Ok(value),
        }
    }

    /// Raw state as a JSON object. Getters and actions are not included.
    pub fn snapshot(&self) -> Result<Value> {
        match &self.inner.kind {
            StoreKind::Declarative { state, .. } => Ok(state.to_raw()),
            StoreKind::Setup { state, .. } => {
                let mut map = Map::new();
                for (name, source) in state {
                    map.insert(name.clone(), source.to_raw()?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    /// Deep-merge a partial state object. The whole patch bumps the change
    /// signal once.
    pub fn patch(&self, partial: Value) -> Result<()> {
        self.inner.signal.ensure_live()?;
        let map = match partial {
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidState(format!(
                    "cannot patch store `{}` with `{other}`",
                    self.inner.id
                )))
            }
        };

        self.inner.signal.batch(|| match &self.inner.kind {
            StoreKind::Declarative { state, .. } => state.merge(Value::Object(map)),
            StoreKind::Setup { state, .. } => {
                if let Some(unknown) = map.keys().find(|name| !state.contains_key(*name)) {
                    return Err(self.unknown(unknown));
                }
                for (name, value) in map {
                    if let Some(source) = state.get(&name) {
                        source.patch(value)?;
                    }
                }
                Ok(())
            }
        })
    }

    /// Run several writes as one change.
    pub fn patch_with<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Store) -> Result<()>,
    {
        self.inner.signal.ensure_live()?;
        self.inner.signal.batch(|| untrack(|| f(self)))
    }

    /// Restore the state produced by the definition's state factory.
    pub fn reset(&self) -> Result<()> {
        match &self.inner.kind {
            StoreKind::Declarative { state, options, .. } => {
                let fresh = untrack(|| (options.state)());
                tracing::debug!(store = %self.inner.id, "store reset");
                state.replace(fresh)
            }
            StoreKind::Setup { .. } => Err(Error::ResetUnsupported(self.inner.id.clone())),
        }
    }

    /// Apply a serialized state without notifying anyone. Fields the store
    /// does not have are skipped.
    pub(crate) fn hydrate(&self, value: Value) -> Result<()> {
        match &self.inner.kind {
            StoreKind::Declarative { state, .. } => state.hydrate_fields(value),
            StoreKind::Setup { state, .. } => {
                let map = match value {
                    Value::Object(map) => map,
                    other => {
                        return Err(Error::InvalidState(format!(
                            "cannot hydrate store `{}` from `{other}`",
                            self.inner.id
                        )))
                    }
                };
                for (name, value) in map {
                    if let Some(source) = state.get(&name) {
                        source.hydrate(value)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// A value a plugin attached under `key`, if it has type `T`.
    pub fn extension<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.inner.extensions.read().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn has_extension(&self, key: &str) -> bool {
        self.inner.extensions.read().contains_key(key)
    }

    pub fn extension_keys(&self) -> Vec<String> {
        self.inner.extensions.read().keys().cloned().collect()
    }

    pub(crate) fn insert_extension(&self, key: String, value: Extension) {
        self.inner.extensions.write().insert(key, value);
    }

    /// Remove the store from its registry. Its state rejects every later
    /// write; the next lookup builds a fresh instance.
    pub fn dispose(&self) {
        self.inner.signal.detach();
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.forget(self);
        }
        tracing::debug!(store = %self.inner.id, "store disposed");
    }

    pub fn is_disposed(&self) -> bool {
        !self.inner.signal.is_live()
    }

    pub(crate) fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("declarative", &self.is_declarative())
            .field("version", &self.version())
            .field("actions", &self.inner.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}
