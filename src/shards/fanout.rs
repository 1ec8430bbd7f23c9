//! # Subscription fan-out: one pub/sub stream per store address.
//!
//! Holds the process-wide channel set and handler plus one binding per
//! distinct store address. Several shards may share an address; they share
//! its binding, so the address is subscribed once.
//!
//! ## Architecture
//! ```text
//! subscribe(channels, handler)             register_address(addr, conn)
//!   ├─ (a) close every handle                ├─ addr known? → no-op
//!   ├─ (b) conn.subscribe(channels)          └─ channel set active?
//!   │      for every known address               → open handle now
//!   └─ (c) spawn_cancellable(receive_loop)
//!
//! receive_loop (one per handle)
//!   loop select! {
//!     token.cancelled()        → exit
//!     stream.next_message()
//!       ├─ Ok(msg)             → handler.on_message(channel, payload)
//!       │                          (panic → HandlerPanicked, keep looping)
//!       ├─ Err(transient)      → continue
//!       └─ Err(other)          → Terminated, publish SubscriptionEnded, exit
//!   }
//! ```
//!
//! ## Rules
//! - Handle state: `Unsubscribed → Active → Closing → Unsubscribed`,
//!   or `Active → Terminated` whenever the loop exits without being cancelled.
//! - Closing waits for the receive loop to exit, so a replaced handler is never
//!   invoked once `subscribe` returns.
//! - The state lock is held across store calls; bindings change only under it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::FutureExt;

use tokio::sync::RwLock;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::core::{Supervisor, TaskHandle, panic_message};
use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::store::{Connection, MessageStream, StoreError};

/// Receives every message of the active channel set.
///
/// Runs inline on the receive loop's task: it must not block for long.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, channel: &str, payload: &str);
}

impl<F> MessageHandler for F
where
    F: Fn(&str, &str) + Send + Sync + 'static,
{
    fn on_message(&self, channel: &str, payload: &str) {
        self(channel, payload)
    }
}

/// Lifecycle state of a subscription handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriptionState {
    Unsubscribed = 0,
    Active = 1,
    Closing = 2,
    /// Receive loop exited on a non-transient error; stale until the next subscribe.
    Terminated = 3,
}

impl SubscriptionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Active,
            2 => Self::Closing,
            3 => Self::Terminated,
            _ => Self::Unsubscribed,
        }
    }
}

/// Snapshot of one address binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub addr: String,
    /// Channels of the live handle; empty when there is none.
    pub channels: Vec<String>,
    pub state: SubscriptionState,
}

#[derive(Clone, Default)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn get(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SubscriptionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

struct Handle {
    channels: Arc<[String]>,
    state: StateCell,
    task: TaskHandle,
    exited: CancellationToken,
}

struct Binding {
    conn: Arc<dyn Connection>,
    handle: Option<Handle>,
}

#[derive(Default)]
struct FanoutState {
    channels: Option<Arc<[String]>>,
    handler: Option<Arc<dyn MessageHandler>>,
    bindings: BTreeMap<Arc<str>, Binding>,
}

pub(crate) struct Fanout {
    supervisor: Arc<Supervisor>,
    state: RwLock<FanoutState>,
}

impl Fanout {
    pub(crate) fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            state: RwLock::new(FanoutState::default()),
        }
    }

    /// Adds `addr` to the address table; subscribes it right away when a
    /// channel set is active.
    ///
    /// Returns `false` if the address was already known.
    pub(crate) async fn register_address(&self, addr: &str, conn: Arc<dyn Connection>) -> bool {
        let mut st = self.state.write().await;
        if st.bindings.contains_key(addr) {
            return false;
        }

        let addr: Arc<str> = Arc::from(addr);
        let handle = match (st.channels.clone(), st.handler.clone()) {
            (Some(channels), Some(handler)) => self.open(&addr, &conn, channels, handler).await,
            _ => None,
        };
        st.bindings.insert(addr, Binding { conn, handle });
        true
    }

    /// Replaces the channel set and handler and resubscribes every known
    /// address. An empty channel set only closes the current handles.
    ///
    /// Returns the number of handles opened.
    pub(crate) async fn subscribe(
        &self,
        channels: Vec<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> usize {
        let mut st = self.state.write().await;
        let bus = self.supervisor.bus();

        for (addr, binding) in st.bindings.iter_mut() {
            if let Some(handle) = binding.handle.take() {
                close_handle(handle).await;
                bus.publish(Event::new(EventKind::SubscriptionClosed).with_addr(Arc::clone(addr)));
            }
        }

        if channels.is_empty() {
            st.channels = None;
            st.handler = None;
            return 0;
        }
        let channels: Arc<[String]> = channels.into();
        st.channels = Some(Arc::clone(&channels));
        st.handler = Some(Arc::clone(&handler));

        let mut opened = 0;
        for (addr, binding) in st.bindings.iter_mut() {
            binding.handle = self
                .open(addr, &binding.conn, Arc::clone(&channels), Arc::clone(&handler))
                .await;
            opened += usize::from(binding.handle.is_some());
        }
        opened
    }

    /// Closes every handle and forgets the channel set.
    pub(crate) async fn close_all(&self) {
        let mut st = self.state.write().await;
        st.channels = None;
        st.handler = None;
        for (addr, binding) in st.bindings.iter_mut() {
            if let Some(handle) = binding.handle.take() {
                close_handle(handle).await;
                self.supervisor
                    .bus()
                    .publish(Event::new(EventKind::SubscriptionClosed).with_addr(Arc::clone(addr)));
            }
        }
    }

    pub(crate) async fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let st = self.state.read().await;
        st.bindings
            .iter()
            .map(|(addr, binding)| match &binding.handle {
                Some(h) => SubscriptionInfo {
                    addr: addr.to_string(),
                    channels: h.channels.to_vec(),
                    state: h.state.get(),
                },
                None => SubscriptionInfo {
                    addr: addr.to_string(),
                    channels: Vec::new(),
                    state: SubscriptionState::Unsubscribed,
                },
            })
            .collect()
    }

    async fn open(
        &self,
        addr: &Arc<str>,
        conn: &Arc<dyn Connection>,
        channels: Arc<[String]>,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Handle> {
        let bus = self.supervisor.bus().clone();

        let stream = match conn.subscribe(&channels).await {
            Ok(stream) => stream,
            Err(e) => {
                bus.publish(
                    Event::new(EventKind::SubscriptionFailed)
                        .with_addr(Arc::clone(addr))
                        .with_reason(e.to_string()),
                );
                return None;
            }
        };

        let state = StateCell::default();
        state.set(SubscriptionState::Active);
        let exited = CancellationToken::new();

        let receiver = Receiver {
            addr: Arc::clone(addr),
            handler,
            state: state.clone(),
            bus: bus.clone(),
        };
        let guard = exited.clone();
        let spawned = self
            .supervisor
            .spawn_cancellable(format!("subscription:{addr}"), move |token| {
                receiver.run(stream, token, guard.drop_guard())
            });

        match spawned {
            Ok(task) => {
                bus.publish(
                    Event::new(EventKind::SubscriptionOpened)
                        .with_addr(Arc::clone(addr))
                        .with_reason(channels.join(",")),
                );
                Some(Handle {
                    channels,
                    state,
                    task,
                    exited,
                })
            }
            Err(e) => {
                bus.publish(
                    Event::new(EventKind::SubscriptionFailed)
                        .with_addr(Arc::clone(addr))
                        .with_reason(e.to_string()),
                );
                None
            }
        }
    }
}

async fn close_handle(handle: Handle) {
    if handle.state.get() == SubscriptionState::Active {
        handle.state.set(SubscriptionState::Closing);
    }
    handle.task.cancel();
    handle.exited.cancelled().await;
    handle.state.set(SubscriptionState::Unsubscribed);
}

struct Receiver {
    addr: Arc<str>,
    handler: Arc<dyn MessageHandler>,
    state: StateCell,
    bus: Bus,
}

impl Receiver {
    async fn run(
        self,
        stream: Box<dyn MessageStream>,
        token: CancellationToken,
        _exited: DropGuard,
    ) -> Result<(), TaskError> {
        let reason = match AssertUnwindSafe(self.receive(stream, &token))
            .catch_unwind()
            .await
        {
            Ok(None) => return Ok(()),
            Ok(Some(err)) => err.to_string(),
            Err(panic) => format!("receive loop panicked: {}", panic_message(panic.as_ref())),
        };

        if !token.is_cancelled() {
            self.state.set(SubscriptionState::Terminated);
            self.bus.publish(
                Event::new(EventKind::SubscriptionEnded)
                    .with_addr(Arc::clone(&self.addr))
                    .with_reason(reason),
            );
        }
        Ok(())
    }

    /// Delivers messages until cancelled (`None`) or a non-transient error.
    async fn receive(
        &self,
        mut stream: Box<dyn MessageStream>,
        token: &CancellationToken,
    ) -> Option<StoreError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                next = stream.next_message() => next,
            };

            match next {
                Ok(msg) => {
                    if token.is_cancelled() {
                        return None;
                    }
                    self.deliver(&msg.channel, &msg.payload);
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(addr = %self.addr, err = %e, "transient receive error");
                }
                Err(e) => return Some(e),
            }
        }
    }

    fn deliver(&self, channel: &str, payload: &str) {
        let handler = &self.handler;
        if let Err(panic) =
            std::panic::catch_unwind(AssertUnwindSafe(|| handler.on_message(channel, payload)))
        {
            self.bus.publish(
                Event::new(EventKind::HandlerPanicked)
                    .with_addr(Arc::clone(&self.addr))
                    .with_reason(panic_message(panic.as_ref())),
            );
        }
    }
}
