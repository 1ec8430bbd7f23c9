//! # Supervisor configuration.
//!
//! ## Sentinel values
//! - `grace = 0s` → drain does not wait at all (tasks still running are reported)
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

/// Global configuration for the supervisor runtime.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Maximum time [`Supervisor::drain_with_grace`](crate::Supervisor::drain_with_grace)
    /// waits for in-flight tasks.
    pub grace: Duration,

    /// Capacity of the event bus ring buffer.
    pub bus_capacity: usize,

    /// Verbose diagnostics: capture the spawn site of every task and report it
    /// in `TaskStarting` events.
    pub verbose: bool,
}

impl SupervisorConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SupervisorConfig {
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    /// - `verbose = false`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            verbose: false,
        }
    }
}
