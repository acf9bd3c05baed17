//! Store Runtime
//!
//! A store is a named state container: reactive state, derived getters and
//! actions, observed from the outside through one [`ChangeSignal`].
//!
//! Two authoring styles are supported and converge on the same [`Store`]:
//!
//! - [`define_store`] with [`StoreOptions`]: a state factory returning a JSON
//!   object, getters that read it through a [`StoreView`], and actions that
//!   receive an [`ActionContext`] bound to the store.
//! - [`define_setup_store`] with a setup function: it creates refs, computed
//!   values and collections freely and returns a [`SetupSurface`] naming the
//!   store's public members.
//!
//! A definition is instantiated lazily, once per [`Registry`], the first
//! time it is resolved.
//!
//! [`ChangeSignal`]: crate::reactive::ChangeSignal
//! [`Registry`]: crate::registry::Registry

mod action;
mod definition;
mod instance;

pub use action::{ActionContext, ActionEvent, ActionOutcome};
pub use definition::{define_setup_store, define_store, SetupSurface, StoreDefinition, StoreOptions};
pub use instance::{Store, StoreView};

pub(crate) use instance::StoreParts;
