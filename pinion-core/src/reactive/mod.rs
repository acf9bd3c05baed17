//! Reactive Primitives
//!
//! This module implements the reactive core: tracked containers, refs,
//! computed values and effects. Stores are built entirely out of these.
//!
//! # Concepts
//!
//! ## Sources
//!
//! A source is anything that can be read: a [`Ref`], a property of a
//! [`ReactiveObject`], a position of a [`ReactiveArray`], a key of a
//! [`ReactiveMap`] or [`ReactiveSet`], or a [`Computed`] value. Reading a
//! source within a tracking context registers the running computation as a
//! dependent. Writing a source invalidates every dependent and bumps the
//! [`ChangeSignal`] of the store that owns it.
//!
//! ## Computed values
//!
//! A [`Computed`] caches the result of a getter and re-runs it only after
//! one of the sources it read has changed. Invalidation is pushed eagerly,
//! recomputation is pulled lazily on the next read.
//!
//! ## Effects
//!
//! An [`Effect`] re-runs a side-effecting closure whenever its dependencies
//! change.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to detect
//! dependencies automatically. Edges live in a process-wide graph owned by
//! the [`Runtime`]; see its module docs for the propagation algorithm.

mod array;
mod cell;
mod change;
mod collections;
mod computed;
mod context;
mod effect;
mod object;
mod runtime;
mod source;
mod subscriber;
mod tracked;

pub use array::ReactiveArray;
pub use cell::Ref;
pub use change::{ChangeSignal, Subscription};
pub use collections::{ReactiveMap, ReactiveSet};
pub use computed::{computed, Computed, ComputedState};
pub use context::{untrack, OwnerScope, ReactiveContext};
pub use effect::Effect;
pub use object::{reactive, ReactiveObject};
pub use runtime::{Reactive, ReactiveHandle, Runtime};
pub use source::{GetterSource, StateSource};
pub use subscriber::{Prop, SourceId, SourceKey, SubscriberId};
pub use tracked::Tracked;
