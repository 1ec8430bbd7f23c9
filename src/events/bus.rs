//! # Event bus for diagnostics.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`] so that any component (supervisor,
//! shards, receive loops) can report what happened without knowing who listens.
//!
//! ```text
//! Supervisor ──┐
//! Shard      ──┼──► Bus ───► listener (spawned by the builder) ───► SubscriberSet
//! Fan-out    ──┘                                                   └─► LogWriter, ...
//! ```
//!
//! ## Rules
//! - `publish()` never blocks and never fails; events with no receiver are dropped.
//! - One ring buffer of `capacity` events is shared by all receivers.
//! - A receiver that falls behind observes `RecvError::Lagged(n)` and skips `n` events.

use tokio::sync::broadcast;

use super::event::Event;

/// Cloneable handle for publishing and observing runtime events.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus holding at most `capacity` undelivered events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to every current receiver.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates an independent receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_see_events_published_after_subscribe() {
        let bus = Bus::new(8);
        bus.publish(Event::new(EventKind::TaskStarting));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::ShardConnected).with_shard(1));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::ShardConnected);
        assert_eq!(ev.shard, Some(1));
    }

    #[test]
    fn publish_without_receivers_is_silent() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::AllDrained));
    }
}
