//! Store definitions.
//!
//! A definition is the recipe for a store: an id plus either a declarative
//! [`StoreOptions`] or a setup function returning a [`SetupSurface`]. It does
//! nothing until a registry instantiates it on first use.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use serde_json::Value;

use super::action::{Action, ActionContext};
use super::instance::{Store, StoreKind, StoreParts, StoreView};
use crate::error::{Error, Result};
use crate::reactive::{untrack, Computed, GetterSource, OwnerScope, ReactiveObject, StateSource};
use crate::registry::{active_registry, Registry};

pub(crate) type StateFn = Arc<dyn Fn() -> Value + Send + Sync>;
pub(crate) type GetterFn = Arc<dyn Fn(&StoreView) -> Result<Value> + Send + Sync>;
type SetupFn = Arc<dyn Fn() -> Result<SetupSurface> + Send + Sync>;

/// Declarative store: a state factory, getters over that state and actions.
///
/// ```rust,ignore
/// let counter = define_store(
///     "counter",
///     StoreOptions::new(|| json!({ "count": 0 }))
///         .getter("doubled", |view| Ok(json!(view.state().get_as::<i64>("count")?.unwrap_or(0) * 2)))
///         .action("increment", |ctx, _| {
///             let state = ctx.state()?;
///             state.update("count", |v| json!(v.and_then(Value::as_i64).unwrap_or(0) + 1))?;
///             Ok(Value::Null)
///         }),
/// );
/// ```
#[derive(Clone)]
pub struct StoreOptions {
    pub(crate) state: StateFn,
    pub(crate) getters: IndexMap<String, GetterFn>,
    pub(crate) actions: IndexMap<String, Action>,
}

impl StoreOptions {
    /// `state` must produce a JSON object. It is called once per store
    /// instance and again by [`Store::reset`].
    pub fn new<F>(state: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(state),
            getters: IndexMap::new(),
            actions: IndexMap::new(),
        }
    }

    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&StoreView) -> Result<Value> + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&ActionContext, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Action::sync(action));
        self
    }

    pub fn async_action<F, Fut>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(ActionContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.actions.insert(name.into(), Action::asynchronous(action));
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The public surface returned by a setup function.
///
/// Only what is named here becomes part of the store: state sources are
/// serialized and hydrated, getters are readable by name, actions are
/// dispatchable and intercepted by plugins.
#[derive(Default)]
pub struct SetupSurface {
    pub(crate) state: IndexMap<String, Arc<dyn StateSource>>,
    pub(crate) getters: IndexMap<String, Arc<dyn GetterSource>>,
    pub(crate) actions: IndexMap<String, Action>,
}

impl SetupSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, name: impl Into<String>, source: impl StateSource) -> Self {
        self.state.insert(name.into(), Arc::new(source));
        self
    }

    pub fn getter(mut self, name: impl Into<String>, getter: impl GetterSource) -> Self {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&ActionContext, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Action::sync(action));
        self
    }

    pub fn async_action<F, Fut>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(ActionContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.actions.insert(name.into(), Action::asynchronous(action));
        self
    }
}

impl fmt::Debug for SetupSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupSurface")
            .field("state", &self.state.keys().collect::<Vec<_>>())
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone)]
enum Recipe {
    Options(Arc<StoreOptions>),
    Setup(SetupFn),
}

struct DefinitionInner {
    id: String,
    recipe: Recipe,
}

/// A store hook: resolves to the singleton instance of this store in a
/// registry, creating it on first use.
#[derive(Clone)]
pub struct StoreDefinition {
    inner: Arc<DefinitionInner>,
}

/// Define a declarative store.
pub fn define_store(id: impl Into<String>, options: StoreOptions) -> StoreDefinition {
    StoreDefinition::new(id.into(), Recipe::Options(Arc::new(options)))
}

/// Define a store from a setup function.
///
/// The setup function runs once per registry. Refs, reactive objects and
/// collections it creates belong to the store being set up.
pub fn define_setup_store<F>(id: impl Into<String>, setup: F) -> StoreDefinition
where
    F: Fn() -> Result<SetupSurface> + Send + Sync + 'static,
{
    StoreDefinition::new(id.into(), Recipe::Setup(Arc::new(setup)))
}

impl StoreDefinition {
    fn new(id: String, recipe: Recipe) -> Self {
        Self {
            inner: Arc::new(DefinitionInner { id, recipe }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn is_declarative(&self) -> bool {
        matches!(self.inner.recipe, Recipe::Options(_))
    }

    /// Resolve the store in the active registry.
    pub fn use_store(&self) -> Result<Store> {
        self.use_in(&active_registry())
    }

    /// Resolve the store in an explicit registry.
    pub fn use_in(&self, registry: &Registry) -> Result<Store> {
        registry.resolve(self)
    }

    /// Build a fresh instance. `parts` carries everything the registry
    /// provides; the store's state is created under its change signal.
    pub(crate) fn instantiate(&self, parts: StoreParts) -> Result<Store> {
        let _owner = OwnerScope::enter(parts.signal.clone());

        let (kind, actions) = match &self.inner.recipe {
            Recipe::Options(options) => {
                let initial = untrack(|| (options.state)());
                let map = match initial {
                    Value::Object(map) => map,
                    other => {
                        return Err(Error::InvalidState(format!(
                            "state of store `{}` must be a JSON object, found `{other}`",
                            self.inner.id
                        )))
                    }
                };
                let state = ReactiveObject::new(map);
                let getters = Arc::new(OnceLock::new());
                let view = StoreView::new(self.inner.id.clone(), state.clone(), &getters);
                let computed: IndexMap<String, Computed<Value>> = options
                    .getters
                    .iter()
                    .map(|(name, getter)| {
                        let getter = Arc::clone(getter);
                        let view = view.clone();
                        let value = Computed::named(format!("{}.{name}", self.inner.id), move || {
                            getter(&view)
                        });
                        (name.clone(), value)
                    })
                    .collect();
                getters.get_or_init(|| computed);

                let kind = StoreKind::Declarative {
                    state,
                    getters,
                    options: Arc::clone(options),
                };
                (kind, options.actions.clone())
            }
            Recipe::Setup(setup) => {
                let surface = untrack(|| setup())?;
                let kind = StoreKind::Setup {
                    state: surface.state,
                    getters: surface.getters,
                };
                (kind, surface.actions)
            }
        };

        Ok(Store::from_parts(self.inner.id.clone(), kind, actions, parts))
    }
}

impl fmt::Debug for StoreDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreDefinition")
            .field("id", &self.inner.id)
            .field("declarative", &self.is_declarative())
            .finish()
    }
}
