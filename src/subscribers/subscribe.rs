//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging custom event handlers into the
//! runtime. Each subscriber is driven by a dedicated worker loop fed by a bounded
//! queue owned by the [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching); they do **not** block the
//!   publisher nor other subscribers.
//! - If a queue overflows, events for that subscriber are **dropped** and a
//!   [`EventKind::SubscriberOverflow`](crate::EventKind::SubscriberOverflow) is published.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use shardvisor::{Event, EventKind, Subscribe};
//!
//! struct ReloadCounter(std::sync::atomic::AtomicUsize);
//!
//! #[async_trait]
//! impl Subscribe for ReloadCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::ScriptReloading {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "reload-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
