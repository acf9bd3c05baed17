//! Plugin Manager
//!
//! Plugins extend every store of a registry. Installing a plugin runs its
//! install routine once with a [`PluginContext`] through which it can:
//!
//! - observe store creation ([`PluginContext::on_store_created`]), once per
//!   store;
//! - wrap every action call on every store
//!   ([`PluginContext::before_action`], [`PluginContext::after_action`]);
//! - attach typed values to each store ([`PluginContext::extend`]), later
//!   looked up with [`Store::extension`].
//!
//! # Ordering and failures
//!
//! Hooks run in installation order. A failing hook (an `Err` or a panic)
//! never stops other hooks or the action itself; it is logged and, under
//! [`HookPolicy::Strict`], returned from the action call once the action
//! has succeeded.
//!
//! Hooks are registered only if the whole install routine succeeds.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::RwLock;
use serde_json::Value;

use crate::config::HookPolicy;
use crate::error::{BoxError, Error, Result};
use crate::registry::Registry;
use crate::store::{ActionEvent, ActionOutcome, Store};

/// Result type returned by plugin hooks and install routines.
pub type HookResult = std::result::Result<(), BoxError>;

type CreatedHook = Arc<dyn Fn(&StoreCreated) -> HookResult + Send + Sync>;
type BeforeHook = Arc<dyn Fn(&ActionEvent) -> HookResult + Send + Sync>;
type AfterHook = Arc<dyn Fn(&ActionEvent, &ActionOutcome<'_>) -> HookResult + Send + Sync>;
type ExtensionFactory =
    Arc<dyn Fn(&Store) -> std::result::Result<Arc<dyn Any + Send + Sync>, BoxError> + Send + Sync>;

/// A registry extension.
pub trait Plugin: Send + Sync {
    /// Unique name. A second plugin with the same name is not installed.
    fn name(&self) -> &str;

    fn install(&self, ctx: &mut PluginContext<'_>) -> HookResult;
}

/// A plugin built from a closure.
pub struct FnPlugin<F> {
    name: String,
    install: F,
}

/// Build a plugin from a name and an install closure.
pub fn plugin_fn<F>(name: impl Into<String>, install: F) -> FnPlugin<F>
where
    F: Fn(&mut PluginContext<'_>) -> HookResult + Send + Sync,
{
    FnPlugin {
        name: name.into(),
        install,
    }
}

impl<F> Plugin for FnPlugin<F>
where
    F: Fn(&mut PluginContext<'_>) -> HookResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn install(&self, ctx: &mut PluginContext<'_>) -> HookResult {
        (self.install)(ctx)
    }
}

impl<F> fmt::Debug for FnPlugin<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPlugin").field("name", &self.name).finish()
    }
}

/// Passed to `on_store_created` hooks.
#[derive(Debug, Clone)]
pub struct StoreCreated {
    pub id: String,
    pub store: Store,
    pub is_declarative: bool,
}

struct Hook<H> {
    plugin: Arc<str>,
    hook: H,
}

impl<H: Clone> Clone for Hook<H> {
    fn clone(&self) -> Self {
        Self {
            plugin: Arc::clone(&self.plugin),
            hook: self.hook.clone(),
        }
    }
}

#[derive(Default)]
struct Hooks {
    created: Vec<Hook<CreatedHook>>,
    before: Vec<Hook<BeforeHook>>,
    after: Vec<Hook<AfterHook>>,
    extensions: Vec<Hook<(String, ExtensionFactory)>>,
}

impl Hooks {
    fn append(&mut self, other: Hooks) {
        self.created.extend(other.created);
        self.before.extend(other.before);
        self.after.extend(other.after);
        self.extensions.extend(other.extensions);
    }
}

/// What an install routine gets to work with.
pub struct PluginContext<'a> {
    plugin: Arc<str>,
    options: Option<&'a Value>,
    registry: &'a Registry,
    staged: Hooks,
}

impl<'a> PluginContext<'a> {
    pub fn name(&self) -> &str {
        &self.plugin
    }

    /// Options passed to `install_plugin`.
    pub fn options(&self) -> Option<&'a Value> {
        self.options
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn on_store_created<F>(&mut self, hook: F)
    where
        F: Fn(&StoreCreated) -> HookResult + Send + Sync + 'static,
    {
        let plugin = Arc::clone(&self.plugin);
        self.staged.created.push(Hook {
            plugin,
            hook: Arc::new(hook),
        });
    }

    pub fn before_action<F>(&mut self, hook: F)
    where
        F: Fn(&ActionEvent) -> HookResult + Send + Sync + 'static,
    {
        let plugin = Arc::clone(&self.plugin);
        self.staged.before.push(Hook {
            plugin,
            hook: Arc::new(hook),
        });
    }

    pub fn after_action<F>(&mut self, hook: F)
    where
        F: Fn(&ActionEvent, &ActionOutcome<'_>) -> HookResult + Send + Sync + 'static,
    {
        let plugin = Arc::clone(&self.plugin);
        self.staged.after.push(Hook {
            plugin,
            hook: Arc::new(hook),
        });
    }

    /// Attach a value to every store created from now on, under `key`.
    ///
    /// A `serde_json::Value` extension is also readable through
    /// [`Store::get`].
    pub fn extend<T, F>(&mut self, key: impl Into<String>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Store) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        let factory: ExtensionFactory = Arc::new(move |store: &Store| {
            factory(store).map(|value| Arc::new(value) as Arc<dyn Any + Send + Sync>)
        });
        let plugin = Arc::clone(&self.plugin);
        self.staged.extensions.push(Hook {
            plugin,
            hook: (key.into(), factory),
        });
    }
}

/// Per-registry plugin state.
pub(crate) struct PluginManager {
    policy: HookPolicy,
    installed: RwLock<IndexSet<String>>,
    hooks: RwLock<Hooks>,
}

impl PluginManager {
    pub(crate) fn new(policy: HookPolicy) -> Self {
        Self {
            policy,
            installed: RwLock::new(IndexSet::new()),
            hooks: RwLock::new(Hooks::default()),
        }
    }

    pub(crate) fn installed(&self) -> Vec<String> {
        self.installed.read().iter().cloned().collect()
    }

    pub(crate) fn install(
        &self,
        registry: &Registry,
        plugin: &dyn Plugin,
        options: Option<Value>,
    ) -> Result<()> {
        let name = plugin.name().to_owned();
        if self.installed.read().contains(&name) {
            tracing::warn!(plugin = %name, "plugin already installed, skipping");
            return Ok(());
        }

        let mut ctx = PluginContext {
            plugin: Arc::from(name.as_str()),
            options: options.as_ref(),
            registry,
            staged: Hooks::default(),
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| plugin.install(&mut ctx)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        if let Some(message) = failure {
            tracing::warn!(plugin = %name, error = %message, "plugin install failed");
            return Err(Error::Plugin {
                plugin: name,
                message,
            });
        }

        {
            let mut installed = self.installed.write();
            if !installed.insert(name.clone()) {
                tracing::warn!(plugin = %name, "plugin already installed, skipping");
                return Ok(());
            }
            self.hooks.write().append(ctx.staged);
        }

        tracing::info!(plugin = %name, "plugin installed");
        Ok(())
    }

    /// Attach extensions, then run creation hooks.
    pub(crate) fn store_created(&self, store: &Store) -> Option<Error> {
        let (extensions, created) = {
            let hooks = self.hooks.read();
            (hooks.extensions.clone(), hooks.created.clone())
        };

        let mut first_error = None;

        for Hook { plugin, hook } in &extensions {
            let (key, factory) = hook;
            match guard(|| factory(store)) {
                Ok(value) => store.insert_extension(key.clone(), value),
                Err(message) => self.record(plugin, "extend", message, &mut first_error),
            }
        }

        if !created.is_empty() {
            let event = StoreCreated {
                id: store.id().to_owned(),
                store: store.clone(),
                is_declarative: store.is_declarative(),
            };
            for Hook { plugin, hook } in &created {
                if let Err(message) = guard(|| hook(&event)) {
                    self.record(plugin, "store-created", message, &mut first_error);
                }
            }
        }

        first_error
    }

    pub(crate) fn before_action(&self, event: &ActionEvent) -> Option<Error> {
        let hooks = self.hooks.read().before.clone();
        let mut first_error = None;
        for Hook { plugin, hook } in &hooks {
            if let Err(message) = guard(|| hook(event)) {
                self.record(plugin, "before-action", message, &mut first_error);
            }
        }
        first_error
    }

    pub(crate) fn after_action(&self, event: &ActionEvent, outcome: &ActionOutcome<'_>) -> Option<Error> {
        let hooks = self.hooks.read().after.clone();
        let mut first_error = None;
        for Hook { plugin, hook } in &hooks {
            if let Err(message) = guard(|| hook(event, outcome)) {
                self.record(plugin, "after-action", message, &mut first_error);
            }
        }
        first_error
    }

    /// Log a hook failure; keep the first one when running strict.
    fn record(
        &self,
        plugin: &str,
        stage: &'static str,
        message: String,
        first_error: &mut Option<Error>,
    ) {
        tracing::warn!(plugin, stage, error = %message, "plugin hook failed");
        if self.policy == HookPolicy::Strict && first_error.is_none() {
            *first_error = Some(Error::Hook {
                plugin: plugin.to_owned(),
                stage,
                message,
            });
        }
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("policy", &self.policy)
            .field("installed", &*self.installed.read())
            .finish()
    }
}

/// Run a hook, turning both returned errors and panics into a message.
fn guard<T>(f: impl FnOnce() -> std::result::Result<T, BoxError>) -> std::result::Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_owned()
    }
}
