//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`]: event classification and payload metadata
//! - [`Bus`]: thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` (task lifecycle, shutdown), `Shard` (script
//!   reloads and failures), `ShardManager` (registration), fan-out receive loops,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the listener spawned by `SupervisorBuilder::build`, which
//!   forwards everything to the `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
