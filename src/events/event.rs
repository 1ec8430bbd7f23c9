//! # Runtime events emitted by the supervisor, shards and subscriptions.
//!
//! The [`EventKind`] enum classifies event types across four areas:
//! - **Task events**: supervised unit lifecycle (starting, stopped, failed, panicked)
//! - **Shutdown events**: shutdown initiation and drain outcome
//! - **Store events**: shard registration, script reloads and failures
//! - **Subscription events**: pub/sub handle lifecycle
//!
//! The [`Event`] struct carries additional metadata such as timestamps, task ids,
//! shard ids, addresses and reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use shardvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ShardRejected)
//!     .with_shard(3)
//!     .with_addr("10.0.0.1:6379")
//!     .with_reason("duplicate shard id");
//!
//! assert_eq!(ev.kind, EventKind::ShardRejected);
//! assert_eq!(ev.shard, Some(3));
//! assert_eq!(ev.addr.as_deref(), Some("10.0.0.1:6379"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets `task` (subscriber name) and `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `task` (subscriber name) and `reason` ("full" / "closed").
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown initiated (explicit call or OS signal).
    ShutdownRequested,

    /// Every supervised task completed during a drain.
    AllDrained,

    /// Grace period exceeded; some tasks were still in flight.
    ///
    /// Sets `in_flight`.
    GraceExceeded,

    // === Task events ===
    /// A supervised unit is starting.
    ///
    /// Sets `task`, `task_id`, `in_flight` and, in verbose mode, `origin`.
    TaskStarting,

    /// A supervised unit returned `Ok` or exited on cancellation.
    ///
    /// Sets `task`, `task_id`, `in_flight`.
    TaskStopped,

    /// A supervised unit returned an error.
    ///
    /// Sets `task`, `task_id`, `in_flight`, `reason`.
    TaskFailed,

    /// A supervised unit panicked; the panic was contained at the task boundary.
    ///
    /// Sets `task`, `task_id`, `in_flight`, `reason`.
    TaskPanicked,

    /// A cancellable unit was refused because shutdown already began.
    ///
    /// Sets `task`.
    TaskRejected,

    // === Store events ===
    /// A shard connection was established and registered.
    ///
    /// Sets `shard`, `addr`.
    ShardConnected,

    /// A shard registration was rejected (id already present).
    ///
    /// Sets `shard`, `addr`, `reason`.
    ShardRejected,

    /// Opening a shard connection failed.
    ///
    /// Sets `shard`, `addr`, `reason`.
    ShardConnectFailed,

    /// A shard connection was closed during shutdown.
    ///
    /// Sets `shard`, `addr`.
    ShardClosed,

    /// The store reported a script unknown; reloading its source.
    ///
    /// Sets `shard`, `command`, `commit`.
    ScriptReloading,

    /// Reloading a script into the store failed.
    ///
    /// Sets `shard`, `command`, `commit`, `reason`.
    ScriptReloadFailed,

    /// Script execution failed and was surfaced as a backend error.
    ///
    /// Sets `shard`, `command`, `reason`; `commit` when known.
    ScriptFailed,

    // === Subscription events ===
    /// A subscription handle was opened for an address.
    ///
    /// Sets `addr`, `reason` (channel list).
    SubscriptionOpened,

    /// Opening a subscription for an address failed.
    ///
    /// Sets `addr`, `reason`.
    SubscriptionFailed,

    /// A subscription handle was closed (channel set replaced or shutdown).
    ///
    /// Sets `addr`.
    SubscriptionClosed,

    /// A receive loop exited on a non-transient error.
    ///
    /// Sets `addr`, `reason`.
    SubscriptionEnded,

    /// A message handler panicked; the receive loop kept running.
    ///
    /// Sets `addr`, `reason` (panic message).
    HandlerPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Task or subscriber name.
    pub task: Option<Arc<str>>,
    /// Supervisor-assigned task id.
    pub task_id: Option<u64>,
    /// Spawn site, captured only in verbose mode.
    pub origin: Option<Arc<str>>,
    /// Number of supervised tasks in flight when the event was produced.
    pub in_flight: Option<usize>,
    /// Logical shard id.
    pub shard: Option<u32>,
    /// Backing-store address.
    pub addr: Option<Arc<str>>,
    /// Script command id.
    pub command: Option<u64>,
    /// Commit/version label of a script.
    pub commit: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, channel lists).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            task_id: None,
            origin: None,
            in_flight: None,
            shard: None,
            addr: None,
            command: None,
            commit: None,
            reason: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a task name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    #[inline]
    pub fn with_task_id(mut self, id: u64) -> Self {
        self.task_id = Some(id);
        self
    }

    #[inline]
    pub fn with_origin(mut self, origin: Option<Arc<str>>) -> Self {
        self.origin = origin;
        self
    }

    #[inline]
    pub fn with_in_flight(mut self, n: usize) -> Self {
        self.in_flight = Some(n);
        self
    }

    #[inline]
    pub fn with_shard(mut self, shard: u32) -> Self {
        self.shard = Some(shard);
        self
    }

    #[inline]
    pub fn with_addr(mut self, addr: impl Into<Arc<str>>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    #[inline]
    pub fn with_command(mut self, command: u64) -> Self {
        self.command = Some(command);
        self
    }

    #[inline]
    pub fn with_commit(mut self, commit: impl Into<Arc<str>>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}
