//! Pinion Core
//!
//! This crate provides a fine-grained reactive state runtime for UI
//! applications and server-side rendering. It implements:
//!
//! - Reactive primitives (reactive objects, refs, computed values, effects)
//! - Stores built from either a declarative definition or a setup function
//! - Registries that hold store singletons, with per-request isolation,
//!   serialization and hydration
//! - Plugins that observe store creation, wrap actions and extend stores
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `store`: Store definitions and instances
//! - `registry`: Store singletons, active-registry scoping, snapshots
//! - `plugin`: Plugin lifecycle and action interception
//! - `render`: The subscribe/snapshot interface UI integrations consume
//!
//! # Example
//!
//! ```rust,ignore
//! use pinion_core::prelude::*;
//! use serde_json::{json, Value};
//!
//! let counter = define_store(
//!     "counter",
//!     StoreOptions::new(|| json!({ "count": 0 }))
//!         .getter("doubled", |view| Ok(json!(view.get_as::<i64>("count")? * 2)))
//!         .action("increment", |ctx, _| {
//!             ctx.state()?.update("count", |v| json!(v.and_then(Value::as_i64).unwrap_or(0) + 1))?;
//!             Ok(Value::Null)
//!         }),
//! );
//!
//! let registry = create_registry();
//! let store = counter.use_in(&registry)?;
//! store.dispatch("increment", vec![])?;
//! assert_eq!(store.getter("doubled")?, json!(2));
//! assert_eq!(store.version(), 1);
//! ```

pub mod config;
pub mod error;
pub mod plugin;
pub mod reactive;
pub mod registry;
pub mod render;
pub mod store;

pub use config::{HookPolicy, RegistryConfig};
pub use error::{BoxError, Error, Result};

/// Everything needed to define stores and work with registries.
pub mod prelude {
    pub use crate::config::{HookPolicy, RegistryConfig};
    pub use crate::error::{BoxError, Error, Result};
    pub use crate::plugin::{plugin_fn, HookResult, Plugin, PluginContext, StoreCreated};
    pub use crate::reactive::{
        computed, reactive, untrack, ChangeSignal, Computed, Effect, ReactiveArray, ReactiveMap,
        ReactiveObject, ReactiveSet, Ref, Subscription,
    };
    pub use crate::registry::{
        active_registry, create_registry, global_registry, hydrate, install_plugin,
        reset_active_registry, serialize, set_active_registry, Registry, StateSnapshot,
    };
    pub use crate::store::{
        define_setup_store, define_store, ActionContext, ActionEvent, ActionOutcome, SetupSurface,
        Store, StoreDefinition, StoreOptions, StoreView,
    };
}
