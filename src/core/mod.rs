//! Runtime core: supervised tasks and shutdown.
//!
//! Internal modules:
//! - [`supervisor`]: spawns and tracks units, drains them on shutdown;
//! - [`registry`]: cancellation tokens of running cancellable units;
//! - [`task`]: task ids and handles;
//! - [`builder`]: wires the bus and subscribers;
//! - [`shutdown`]: OS termination signals.

mod builder;
mod config;
mod registry;
mod shutdown;
mod supervisor;
mod task;

use std::any::Any;

pub use builder::SupervisorBuilder;
pub use config::SupervisorConfig;
pub use supervisor::Supervisor;
pub use task::{TaskHandle, TaskId};

/// Extracts the message of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
