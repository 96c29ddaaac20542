//! Fracture Core -- the producer registry and spawn scheduler behind
//! item generators.
//!
//! A *producer* is a placed block that periodically emits items into the
//! world. This crate owns the in-memory model: who placed which producer
//! where, how each one is configured, when it may next fire, and how the
//! whole set is encoded for durable storage. The host world is reached only
//! through the [`host::WorldHost`] and [`host::Clock`] seams.
//!
//! # Production cycle
//!
//! The host calls [`scheduler::Scheduler::tick`] once per host tick. Every
//! `generator-tick-interval` ticks a cycle runs:
//!
//! 1. **Select** -- enabled, loaded producers whose interval has elapsed,
//!    in creation order, truncated to `max-items-per-tick`.
//! 2. **Apply** -- pick an item, compute a spawn point, stamp the
//!    last-production time.
//! 3. **Emit** -- hand each production to the host.
//!
//! With `async-processing` the select step runs on a worker pool and the
//! rest happens on a later tick, on the ticking context.
//!
//! # Key Types
//!
//! - [`registry::ProducerRegistry`] -- primary store plus location and
//!   owner indices; every create/remove/configure goes through it.
//! - [`producer::Producer`] -- one producer's configuration and timestamp.
//! - [`scheduler::Scheduler`] -- the budgeted production cycle.
//! - [`config::SettingsHandle`] -- hot-swappable runtime settings.
//! - [`serialize`] -- versioned binary save format via bitcode.
//! - [`session::SessionTracker`] -- per-actor UI state, kept apart from the
//!   registry.

pub mod config;
pub mod host;
pub mod id;
pub mod item;
pub mod owners;
pub mod producer;
pub mod registry;
pub mod rng;
pub mod scheduler;
pub mod serialize;
pub mod session;
pub mod spatial;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
