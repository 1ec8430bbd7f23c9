//! # Supervisor: tracked background tasks and graceful drain.
//!
//! The [`Supervisor`] spawns units of work onto the tokio runtime, counts how many
//! are in flight, hands cancellable units a [`CancellationToken`], and lets the
//! owner wait for all of them during shutdown.
//!
//! ## Architecture
//! ```text
//! spawn(name, unit) ─────────────┐
//! spawn_cancellable(name, f) ────┤  (refused once shutdown began)
//!     └─► runtime_token.child()  │
//!         registry.insert(id)    ▼
//!                          launch(task, unit)
//!                            ├─► in_flight += 1, publish TaskStarting
//!                            └─► tracker.spawn(
//!                                  catch_unwind(unit)
//!                                    ├─ Ok / Canceled → TaskStopped
//!                                    ├─ Err(e)        → TaskFailed
//!                                    └─ panic         → TaskPanicked
//!                                  registry.finish(id)   (fires token)
//!                                  in_flight -= 1)
//!
//! shutdown():  running = false ─► publish ShutdownRequested ─► runtime_token.cancel()
//! drain_all(): tracker.close() ─► tracker.wait() ─► publish AllDrained ─► flush subscribers
//! ```
//!
//! ## Rules
//! - The in-flight counter is incremented before a unit starts and decremented
//!   exactly once when it ends, whatever the outcome (including panics and the
//!   future being dropped by the runtime).
//! - Panics and errors stop at the task boundary; siblings and callers are unaffected.
//! - A cancellable unit's token fires exactly once: on request, on shutdown, or
//!   when the unit exits by itself.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use shardvisor::{Supervisor, SupervisorConfig, TaskError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let sup = Supervisor::builder(SupervisorConfig::default()).build();
//!
//!     sup.spawn("hello", async { Ok::<(), TaskError>(()) });
//!     let ticker = sup
//!         .spawn_cancellable("ticker", |stop| async move {
//!             while !stop.is_cancelled() {
//!                 tokio::time::sleep(Duration::from_millis(10)).await;
//!             }
//!             Ok(())
//!         })
//!         .expect("runtime is running");
//!
//!     ticker.cancel();
//!     sup.shutdown();
//!     sup.drain_all().await;
//!     assert_eq!(sup.in_flight(), 0);
//! }
//! ```

use std::future::Future;
use std::panic::{AssertUnwindSafe, Location};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::builder::{EventFeed, SupervisorBuilder};
use super::config::SupervisorConfig;
use super::registry::CancelRegistry;
use super::task::{Task, TaskHandle, TaskId};
use super::{panic_message, shutdown};
use crate::error::{RuntimeError, TaskError};
use crate::events::{Bus, Event, EventKind};

/// Tracks background tasks and coordinates their shutdown.
pub struct Supervisor {
    cfg: SupervisorConfig,
    bus: Bus,
    tracker: TaskTracker,
    in_flight: Arc<AtomicUsize>,
    next_id: AtomicU64,
    running: AtomicBool,
    runtime_token: CancellationToken,
    registry: Arc<CancelRegistry>,
    feed: Mutex<Option<EventFeed>>,
}

impl Supervisor {
    /// Returns a builder; see [`SupervisorBuilder`].
    pub fn builder(cfg: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(cfg: SupervisorConfig, bus: Bus, feed: Option<EventFeed>) -> Self {
        Self {
            cfg,
            bus,
            tracker: TaskTracker::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(0),
            running: AtomicBool::new(true),
            runtime_token: CancellationToken::new(),
            registry: Arc::new(CancelRegistry::default()),
            feed: Mutex::new(feed),
        }
    }

    /// Event bus shared with every component built on this supervisor.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Runs `unit` as an independent task. Always starts, even during shutdown.
    #[track_caller]
    pub fn spawn<F>(&self, name: impl Into<Arc<str>>, unit: F) -> TaskId
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let task = Task {
            id: self.next_task_id(),
            name: name.into(),
            cancel: None,
            origin: self.origin(Location::caller()),
        };
        let id = task.id;
        self.launch(task, unit);
        id
    }

    /// Runs the future produced by `unit` with its own cancellation token.
    ///
    /// Returns [`RuntimeError::ShuttingDown`] without calling `unit` once
    /// [`shutdown`](Self::shutdown) has been initiated.
    #[track_caller]
    pub fn spawn_cancellable<F, Fut>(
        &self,
        name: impl Into<Arc<str>>,
        unit: F,
    ) -> Result<TaskHandle, RuntimeError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let name = name.into();
        if !self.is_running() {
            self.bus
                .publish(Event::new(EventKind::TaskRejected).with_task(name));
            return Err(RuntimeError::ShuttingDown);
        }

        let token = self.runtime_token.child_token();
        let task = Task {
            id: self.next_task_id(),
            name,
            cancel: Some(token.clone()),
            origin: self.origin(Location::caller()),
        };
        let handle = TaskHandle::new(task.id, token.clone());

        let fut = unit(token.clone());
        self.registry.insert(task.id, token);
        self.launch(task, fut);
        Ok(handle)
    }

    /// Fires the cancellation token of a running cancellable task.
    ///
    /// Returns `false` if no such task is running.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.registry.cancel(id)
    }

    /// False once shutdown has been initiated.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of tasks currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Number of cancellable tasks currently registered.
    pub fn cancellable_len(&self) -> usize {
        self.registry.len()
    }

    /// Initiates shutdown: `is_running()` turns false and every cancellable
    /// task's token fires.
    ///
    /// Returns `true` for the call that actually initiated it.
    pub fn shutdown(&self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.runtime_token.cancel();
        true
    }

    /// Waits until every spawned task has completed, then delivers every
    /// pending event (including `AllDrained`) to the subscribers.
    ///
    /// Tasks spawned while draining are waited for as well. Events published
    /// after the first drain are no longer forwarded to subscribers.
    pub async fn drain_all(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.bus.publish(Event::new(EventKind::AllDrained));
        self.flush_events().await;
    }

    /// [`drain_all`](Self::drain_all) bounded by [`SupervisorConfig::grace`].
    pub async fn drain_with_grace(&self) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        match tokio::time::timeout(grace, self.drain_all()).await {
            Ok(()) => Ok(()),
            Err(_elapsed) => {
                let in_flight = self.in_flight();
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_in_flight(in_flight),
                );
                self.flush_events().await;
                Err(RuntimeError::GraceExceeded { grace, in_flight })
            }
        }
    }

    /// Waits for a termination signal (or an explicit [`shutdown`](Self::shutdown)),
    /// then shuts down and drains within the grace period.
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        let signal = async {
            if let Err(e) = shutdown::wait_for_shutdown_signal().await {
                tracing::error!(error = %e, "cannot install signal handlers");
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = signal => {}
            _ = self.runtime_token.cancelled() => {}
        }
        self.shutdown();
        self.drain_with_grace().await
    }

    async fn flush_events(&self) {
        let feed = self.feed.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(feed) = feed {
            feed.flush().await;
        }
    }

    fn next_task_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn origin(&self, at: &'static Location<'static>) -> Option<Arc<str>> {
        self.cfg
            .verbose
            .then(|| Arc::from(format!("{}:{}", at.file(), at.line())))
    }

    fn launch<F>(&self, task: Task, unit: F)
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let count = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.bus.publish(
            Event::new(EventKind::TaskStarting)
                .with_task(task.name.clone())
                .with_task_id(task.id.get())
                .with_in_flight(count)
                .with_origin(task.origin.clone()),
        );

        let completion = Completion {
            in_flight: Some(Arc::clone(&self.in_flight)),
            registry: task.cancel.as_ref().map(|_| Arc::clone(&self.registry)),
            id: task.id,
        };
        let bus = self.bus.clone();

        self.tracker.spawn(async move {
            let outcome = AssertUnwindSafe(unit).catch_unwind().await;
            let left = completion.release();

            let ev = match outcome {
                Ok(Ok(())) | Ok(Err(TaskError::Canceled)) => Event::new(EventKind::TaskStopped),
                Ok(Err(e)) => Event::new(EventKind::TaskFailed).with_reason(e.to_string()),
                Err(panic) => Event::new(EventKind::TaskPanicked)
                    .with_reason(panic_message(panic.as_ref())),
            };
            bus.publish(
                ev.with_task(task.name)
                    .with_task_id(task.id.get())
                    .with_in_flight(left),
            );
        });
    }
}

/// End-of-task bookkeeping; runs on release or, if the future is dropped early, on drop.
struct Completion {
    in_flight: Option<Arc<AtomicUsize>>,
    registry: Option<Arc<CancelRegistry>>,
    id: TaskId,
}

impl Completion {
    /// Returns the number of tasks still in flight.
    fn release(mut self) -> usize {
        self.complete()
    }

    fn complete(&mut self) -> usize {
        if let Some(registry) = self.registry.take() {
            registry.finish(self.id);
        }
        match self.in_flight.take() {
            Some(counter) => counter.fetch_sub(1, Ordering::AcqRel) - 1,
            None => 0,
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn supervisor(cfg: SupervisorConfig) -> Arc<Supervisor> {
        Supervisor::builder(cfg).without_log_writer().build()
    }

    #[tokio::test]
    async fn drain_leaves_nothing_in_flight() {
        let sup = supervisor(SupervisorConfig::default());
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..20u64 {
            let done = Arc::clone(&done);
            sup.spawn(format!("unit-{i}"), async move {
                tokio::time::sleep(Duration::from_millis(i % 5)).await;
                done.fetch_add(1, Ordering::SeqCst);
                if i % 3 == 0 {
                    return Err(TaskError::Fail { error: "nope".into() });
                }
                Ok(())
            });
        }
        for i in 0..5 {
            sup.spawn_cancellable(format!("c-{i}"), |_stop| async { Ok(()) })
                .unwrap();
        }

        sup.drain_all().await;
        assert_eq!(sup.in_flight(), 0);
        assert_eq!(sup.cancellable_len(), 0);
        assert_eq!(done.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn panic_is_contained_at_task_boundary() {
        let sup = supervisor(SupervisorConfig::default());
        let mut events = sup.bus().subscribe();
        let sibling = Arc::new(AtomicBool::new(false));

        let explode = true;
        let id = sup.spawn("bad", async move {
            if explode {
                panic!("kaboom");
            }
            Ok(())
        });
        let flag = Arc::clone(&sibling);
        sup.spawn("good", async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        sup.drain_all().await;
        assert!(sibling.load(Ordering::SeqCst));
        assert_eq!(sup.in_flight(), 0);

        let mut saw_panic = false;
        while let Ok(ev) = events.try_recv() {
            if ev.kind == EventKind::TaskPanicked {
                assert_eq!(ev.task_id, Some(id.get()));
                assert_eq!(ev.reason.as_deref(), Some("kaboom"));
                saw_panic = true;
            }
        }
        assert!(saw_panic);
    }

    #[tokio::test]
    async fn cancellable_refused_after_shutdown() {
        let sup = supervisor(SupervisorConfig::default());
        assert!(sup.shutdown());
        assert!(!sup.shutdown());
        assert!(!sup.is_running());

        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let res = sup.spawn_cancellable("late", move |_stop| {
            flag.store(true, Ordering::SeqCst);
            async { Ok(()) }
        });

        assert!(matches!(res, Err(RuntimeError::ShuttingDown)));
        assert!(!started.load(Ordering::SeqCst));
        assert_eq!(sup.in_flight(), 0);
    }

    #[tokio::test]
    async fn panicking_setup_leaves_no_table_entry() {
        let sup = supervisor(SupervisorConfig::default());
        let fail = true;

        let res = std::panic::catch_unwind(AssertUnwindSafe(|| {
            sup.spawn_cancellable("setup", |_stop| {
                if fail {
                    panic!("bad setup");
                }
                async { Ok(()) }
            })
        }));

        assert!(res.is_err());
        assert_eq!(sup.cancellable_len(), 0);
        assert_eq!(sup.in_flight(), 0);
    }

    struct Recorder(std::sync::Mutex<Vec<EventKind>>);

    #[async_trait::async_trait]
    impl crate::subscribers::Subscribe for Recorder {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().unwrap().push(ev.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn subscribers_see_final_events_when_drain_returns() {
        let recorder = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        let sup = Supervisor::builder(SupervisorConfig::default())
            .without_log_writer()
            .with_subscribers(vec![recorder.clone() as Arc<dyn crate::subscribers::Subscribe>])
            .build();

        sup.spawn("last", async { Err(TaskError::Fail { error: "late".into() }) });
        sup.shutdown();
        sup.drain_all().await;

        let seen = recorder.0.lock().unwrap().clone();
        assert!(seen.contains(&EventKind::TaskFailed), "seen: {seen:?}");
        assert_eq!(seen.last(), Some(&EventKind::AllDrained));

        // A second drain finds nothing left to flush.
        sup.drain_all().await;
    }

    #[tokio::test]
    async fn token_fires_when_unit_exits_on_its_own() {
        let sup = supervisor(SupervisorConfig::default());
        let handle = sup
            .spawn_cancellable("short", |_stop| async { Ok(()) })
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle.done())
            .await
            .expect("token must fire after the unit returns");
        assert!(handle.is_signalled());
        sup.drain_all().await;
        assert!(!sup.cancel(handle.id()));
    }

    #[tokio::test]
    async fn shutdown_reaches_every_cancellable_unit() {
        let sup = supervisor(SupervisorConfig::default());
        for i in 0..4 {
            sup.spawn_cancellable(format!("waiter-{i}"), |stop| async move {
                stop.cancelled().await;
                Err(TaskError::Canceled)
            })
            .unwrap();
        }
        assert_eq!(sup.in_flight(), 4);

        sup.shutdown();
        sup.drain_all().await;
        assert_eq!(sup.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancel_by_id_targets_one_task() {
        let sup = supervisor(SupervisorConfig::default());
        let a = sup
            .spawn_cancellable("a", |stop| async move {
                stop.cancelled().await;
                Ok(())
            })
            .unwrap();
        let b = sup
            .spawn_cancellable("b", |stop| async move {
                stop.cancelled().await;
                Ok(())
            })
            .unwrap();

        assert!(sup.cancel(a.id()));
        a.done().await;
        assert!(!b.is_signalled());

        b.cancel();
        sup.drain_all().await;
        assert_eq!(sup.in_flight(), 0);
    }

    #[tokio::test]
    async fn task_ids_increase() {
        let sup = supervisor(SupervisorConfig::default());
        let first = sup.spawn("one", async { Ok(()) });
        let second = sup
            .spawn_cancellable("two", |_| async { Ok(()) })
            .unwrap()
            .id();
        let third = sup.spawn("three", async { Ok(()) });

        assert_eq!(first.get(), 1);
        assert!(first < second && second < third);
        sup.drain_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn grace_exceeded_reports_stuck_tasks() {
        let sup = supervisor(SupervisorConfig {
            grace: Duration::from_millis(50),
            ..SupervisorConfig::default()
        });
        sup.spawn("stubborn", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });

        sup.shutdown();
        match sup.drain_with_grace().await {
            Err(RuntimeError::GraceExceeded { in_flight, .. }) => assert_eq!(in_flight, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verbose_mode_records_spawn_site() {
        let sup = supervisor(SupervisorConfig {
            verbose: true,
            ..SupervisorConfig::default()
        });
        let mut events = sup.bus().subscribe();
        sup.spawn("traced", async { Ok(()) });
        sup.drain_all().await;

        let ev = events.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::TaskStarting);
        let origin = ev.origin.expect("origin captured in verbose mode");
        assert!(origin.contains("supervisor.rs"), "origin was {origin}");
    }

    #[tokio::test]
    async fn quiet_mode_skips_spawn_site() {
        let sup = supervisor(SupervisorConfig::default());
        let mut events = sup.bus().subscribe();
        sup.spawn("plain", async { Ok(()) });
        sup.drain_all().await;

        let ev = events.recv().await.unwrap();
        assert!(ev.origin.is_none());
    }
}
