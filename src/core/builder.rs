use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::SupervisorConfig;
use super::supervisor::Supervisor;
use crate::events::{Bus, Event};
use crate::subscribers::{LogWriter, Subscribe, SubscriberSet};

/// Builder for a [`Supervisor`] and its event plumbing.
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    log_writer: bool,
}

impl SupervisorBuilder {
    /// Creates a builder; [`LogWriter`] is installed unless
    /// [`without_log_writer`](Self::without_log_writer) is called.
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            log_writer: true,
        }
    }

    /// Adds event subscribers (metrics, audit, test recorders).
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers.extend(subscribers);
        self
    }

    /// Skips the default `tracing` subscriber.
    pub fn without_log_writer(mut self) -> Self {
        self.log_writer = false;
        self
    }

    /// Builds the supervisor and starts forwarding bus events to the subscribers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Arc<Supervisor> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());

        let mut subscribers = self.subscribers;
        if self.log_writer {
            subscribers.push(Arc::new(LogWriter::new()));
        }
        let feed = (!subscribers.is_empty()).then(|| {
            let set = SubscriberSet::new(subscribers, bus.clone());
            EventFeed::start(bus.subscribe(), set)
        });

        Arc::new(Supervisor::new_internal(self.cfg, bus, feed))
    }
}

/// Listener forwarding bus events to the subscriber set.
pub(crate) struct EventFeed {
    flush: CancellationToken,
    listener: JoinHandle<()>,
}

impl EventFeed {
    fn start(rx: broadcast::Receiver<Event>, set: SubscriberSet) -> Self {
        let flush = CancellationToken::new();
        let listener = tokio::spawn(listen(rx, set, flush.clone()));
        Self { flush, listener }
    }

    /// Delivers every event published so far, then stops the listener and
    /// waits for the subscribers to process their queues.
    pub(crate) async fn flush(self) {
        self.flush.cancel();
        if let Err(e) = self.listener.await {
            tracing::warn!(error = %e, "event listener aborted");
        }
    }
}

async fn listen(mut rx: broadcast::Receiver<Event>, set: SubscriberSet, flush: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            res = rx.recv() => match res {
                Ok(ev) => set.emit(ev),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event listener lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = flush.cancelled() => {
                loop {
                    match rx.try_recv() {
                        Ok(ev) => set.emit(ev),
                        Err(TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
                break;
            }
        }
    }
    set.shutdown().await;
}
