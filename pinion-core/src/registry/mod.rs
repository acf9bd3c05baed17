//! Registry & SSR Scoping
//!
//! A [`Registry`] maps store ids to live [`Store`] instances. Each store is
//! a singleton per registry: the first resolution instantiates it, every
//! later one returns the same instance.
//!
//! On the client a single global registry lives for the whole process. On
//! a server, create one registry per request, resolve stores against it,
//! [`serialize`] it into the response and [`Registry::dispose`] it when the
//! request ends. Any write that reaches one of its stores afterwards (say,
//! from an async action still in flight) fails with
//! [`Error::StaleRegistryWrite`] instead of touching dead state.
//!
//! # Hydration
//!
//! [`hydrate`] overwrites state fields without notifying subscribers or
//! bumping change signals. Entries for stores that do not exist yet are
//! kept and applied when the store is first created, unless
//! [`RegistryConfig::defer_hydration`] is off.

mod active;
mod snapshot;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::plugin::{Plugin, PluginManager};
use crate::reactive::ChangeSignal;
use crate::store::{Store, StoreDefinition, StoreParts};

pub use active::{
    active_registry, create_registry, global_registry, reset_active_registry, set_active_registry,
    ActiveRegistryGuard,
};
pub use snapshot::{hydrate, serialize, StateSnapshot};

struct RegistryInner {
    id: u64,
    config: RegistryConfig,
    stores: RwLock<IndexMap<String, Store>>,
    /// Snapshot entries waiting for their store to be created.
    pending: Mutex<IndexMap<String, Value>>,
    plugins: Arc<PluginManager>,
    /// Shared with the change signal of every store in this registry.
    live: Arc<AtomicBool>,
}

/// A container of store singletons.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

/// Non-owning handle stores keep to the registry they live in.
#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<RegistryInner>);

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<Registry> {
        self.0.upgrade().map(|inner| Registry { inner })
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(registry = id, label = ?config.label, "registry created");

        Self {
            inner: Arc::new(RegistryInner {
                id,
                plugins: Arc::new(PluginManager::new(config.hook_policy)),
                config,
                stores: RwLock::new(IndexMap::new()),
                pending: Mutex::new(IndexMap::new()),
                live: Arc::new(AtomicBool::new(true)),
            }),
        }
    }

    /// Process-unique id, for logging.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.config.label.as_deref()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.inner))
    }

    fn ensure_live(&self, store: &str) -> Result<()> {
        if self.is_disposed() {
            tracing::warn!(registry = self.inner.id, store, "store requested from disposed registry");
            return Err(Error::StaleRegistryWrite {
                store: store.to_owned(),
            });
        }
        Ok(())
    }

    /// The instance of `definition` in this registry, created on first use.
    pub(crate) fn resolve(&self, definition: &StoreDefinition) -> Result<Store> {
        let id = definition.id();
        self.ensure_live(id)?;
        if let Some(store) = self.inner.stores.read().get(id) {
            return Ok(store.clone());
        }

        // Built outside the lock: setup code may resolve other stores.
        let parts = StoreParts {
            signal: ChangeSignal::attached(id, Arc::clone(&self.inner.live)),
            plugins: Arc::clone(&self.inner.plugins),
            registry: self.downgrade(),
        };
        let store = definition.instantiate(parts)?;

        {
            let mut stores = self.inner.stores.write();
            if let Some(existing) = stores.get(id) {
                return Ok(existing.clone());
            }
            if let Some(state) = self.inner.pending.lock().shift_remove(id) {
                tracing::debug!(registry = self.inner.id, store = id, "applying deferred hydration");
                if let Err(err) = store.hydrate(state) {
                    tracing::warn!(
                        registry = self.inner.id,
                        store = id,
                        error = %err,
                        "deferred hydration failed, keeping initial state"
                    );
                }
            }
            stores.insert(id.to_owned(), store.clone());
        }

        tracing::debug!(
            registry = self.inner.id,
            store = id,
            declarative = store.is_declarative(),
            "store created"
        );

        match self.inner.plugins.store_created(&store) {
            Some(err) => Err(err),
            None => Ok(store),
        }
    }

    /// Look up an existing store.
    pub fn store(&self, id: &str) -> Result<Store> {
        self.try_store(id)
            .ok_or_else(|| Error::UnknownStoreId(id.to_owned()))
    }

    pub fn try_store(&self, id: &str) -> Option<Store> {
        self.inner.stores.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.stores.read().contains_key(id)
    }

    /// Ids of the stores created so far, in creation order.
    pub fn ids(&self) -> Vec<String> {
        self.inner.stores.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.stores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop `store` from the table if it is still the registered instance.
    pub(crate) fn forget(&self, store: &Store) {
        let mut stores = self.inner.stores.write();
        if stores.get(store.id()).is_some_and(|current| current.ptr_eq(store)) {
            stores.shift_remove(store.id());
        }
    }

    /// Raw state of every store, plus deferred entries not applied yet.
    pub fn serialize(&self) -> Result<StateSnapshot> {
        let stores: Vec<Store> = self.inner.stores.read().values().cloned().collect();
        let mut snapshot = StateSnapshot::new();
        for store in stores {
            snapshot.insert(store.id(), store.snapshot()?);
        }
        for (id, state) in self.inner.pending.lock().iter() {
            if !snapshot.contains(id) {
                snapshot.insert(id.clone(), state.clone());
            }
        }
        Ok(snapshot)
    }

    /// Apply `snapshot` without bumping change signals or running effects.
    ///
    /// Ids without a live store are deferred or skipped, never an error.
    /// An entry that does not fit its store does not stop the others; the
    /// ids of all such entries come back in [`Error::Hydration`].
    ///
    /// A deferred entry that does not fit is logged when its store is created
    /// and the store keeps its initial state.
    pub fn hydrate(&self, snapshot: &StateSnapshot) -> Result<()> {
        let (mut applied, mut deferred, mut skipped) = (0usize, 0usize, 0usize);
        let mut failed: Vec<(String, Error)> = Vec::new();
        for (id, state) in snapshot.iter() {
            match self.try_store(id) {
                Some(store) => match store.hydrate(state.clone()) {
                    Ok(()) => applied += 1,
                    Err(err) => {
                        tracing::warn!(
                            registry = self.inner.id,
                            store = id,
                            error = %err,
                            "hydration failed"
                        );
                        failed.push((id.to_owned(), err));
                    }
                },
                None if self.inner.config.defer_hydration => {
                    self.inner.pending.lock().insert(id.to_owned(), state.clone());
                    deferred += 1;
                }
                None => skipped += 1,
            }
        }

        tracing::debug!(
            registry = self.inner.id,
            applied,
            deferred,
            skipped,
            failed = failed.len(),
            "registry hydrated"
        );
        match failed.first() {
            None => Ok(()),
            Some((_, first)) => Err(Error::Hydration {
                message: first.to_string(),
                stores: failed.iter().map(|(id, _)| id.clone()).collect(),
            }),
        }
    }

    /// Ids of snapshot entries waiting for their store.
    pub fn pending_hydration(&self) -> Vec<String> {
        self.inner.pending.lock().keys().cloned().collect()
    }

    /// Install a plugin for every store of this registry.
    ///
    /// Stores that already exist are not retrofitted.
    pub fn install_plugin(&self, plugin: impl Plugin, options: Option<Value>) -> Result<()> {
        self.inner.plugins.install(self, &plugin, options)
    }

    pub fn plugins(&self) -> Vec<String> {
        self.inner.plugins.installed()
    }

    /// Tear the registry down. Every store in it rejects later writes and no
    /// new store can be resolved.
    pub fn dispose(&self) {
        if self.inner.live.swap(false, Ordering::AcqRel) {
            self.inner.pending.lock().clear();
            tracing::info!(
                registry = self.inner.id,
                stores = self.len(),
                "registry disposed"
            );
        }
    }

    pub fn is_disposed(&self) -> bool {
        !self.inner.live.load(Ordering::Acquire)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.inner.id)
            .field("label", &self.inner.config.label)
            .field("stores", &self.ids())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Install a plugin on the active registry.
pub fn install_plugin(plugin: impl Plugin, options: Option<Value>) -> Result<()> {
    active_registry().install_plugin(plugin, options)
}
