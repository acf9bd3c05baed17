//! Which registry `use_store` resolves against.
//!
//! Resolution order:
//!
//! 1. the registry of the enclosing [`Registry::scope`] / [`Registry::run`]
//!    (a tokio task-local, so it follows the request across `.await` points
//!    and never leaks into other tasks);
//! 2. the registry set with [`set_active_registry`] or [`Registry::enter`];
//! 3. the global registry.
//!
//! Passing a registry explicitly with `StoreDefinition::use_in` bypasses all
//! of this and is the safer choice on a server.

use std::future::Future;
use std::sync::OnceLock;

use parking_lot::RwLock;

use super::Registry;
use crate::config::RegistryConfig;

tokio::task_local! {
    static TASK_REGISTRY: Registry;
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();
static ACTIVE: RwLock<Option<Registry>> = parking_lot::const_rwlock(None);

/// The long-lived registry used when nothing else is active.
pub fn global_registry() -> Registry {
    GLOBAL
        .get_or_init(|| {
            let config = RegistryConfig::from_env().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "ignoring invalid registry environment");
                RegistryConfig::default()
            });
            let label = config.label.clone().unwrap_or_else(|| "global".to_owned());
            Registry::with_config(config.label(label))
        })
        .clone()
}

/// Create a new empty registry with the default configuration.
pub fn create_registry() -> Registry {
    Registry::new()
}

/// Point the process-wide active registry at `registry`, returning the
/// previously set one.
///
/// Pair every call with [`reset_active_registry`]; prefer
/// [`Registry::scope`] when requests run concurrently.
pub fn set_active_registry(registry: &Registry) -> Option<Registry> {
    tracing::debug!(registry = registry.id(), "active registry set");
    ACTIVE.write().replace(registry.clone())
}

/// Restore the global registry as the active one.
pub fn reset_active_registry() -> Option<Registry> {
    tracing::debug!("active registry reset");
    ACTIVE.write().take()
}

/// The registry `use_store` resolves against right now.
pub fn active_registry() -> Registry {
    if let Ok(registry) = TASK_REGISTRY.try_with(Registry::clone) {
        return registry;
    }
    if let Some(registry) = ACTIVE.read().clone() {
        return registry;
    }
    global_registry()
}

/// Restores the previously active registry when dropped.
#[must_use = "the registry is only active while the guard is alive"]
pub struct ActiveRegistryGuard {
    previous: Option<Registry>,
}

impl Drop for ActiveRegistryGuard {
    fn drop(&mut self) {
        let mut active = ACTIVE.write();
        *active = self.previous.take();
        tracing::debug!(
            registry = active.as_ref().map(Registry::id),
            "active registry restored"
        );
    }
}

impl Registry {
    /// Make this registry the process-wide active one until the guard drops.
    pub fn enter(&self) -> ActiveRegistryGuard {
        ActiveRegistryGuard {
            previous: set_active_registry(self),
        }
    }

    /// Run `future` with this registry active for it, and only for it.
    pub fn scope<F>(&self, future: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        TASK_REGISTRY.scope(self.clone(), future)
    }

    /// Run `f` synchronously with this registry active on this thread.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        TASK_REGISTRY.sync_scope(self.clone(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_scopes_the_active_registry() {
        let registry = create_registry();
        let seen = registry.run(active_registry);
        assert_eq!(seen, registry);
        assert_ne!(active_registry(), registry);
    }

    #[test]
    fn nested_runs_restore_the_outer_registry() {
        let outer = create_registry();
        let inner = create_registry();
        outer.run(|| {
            inner.run(|| assert_eq!(active_registry(), inner));
            assert_eq!(active_registry(), outer);
        });
    }

    #[tokio::test]
    async fn scope_follows_the_task() {
        let registry = create_registry();
        let inside = registry
            .scope(async {
                tokio::task::yield_now().await;
                active_registry()
            })
            .await;
        assert_eq!(inside, registry);
    }
}
