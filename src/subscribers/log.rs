//! # LogWriter: events to `tracing`
//!
//! Maps every [`Event`] onto a `tracing` record so diagnostics end up wherever
//! the application's subscriber sends logs. Installed by default by
//! [`SupervisorBuilder`](crate::SupervisorBuilder).
//!
//! | Level   | Events                                                              |
//! |---------|---------------------------------------------------------------------|
//! | `debug` | task starting/stopped                                               |
//! | `info`  | shard connected/closed, script reload, subscriptions, drain, shutdown |
//! | `warn`  | duplicate shard, rejected task, subscriber overflow, loop exits     |
//! | `error` | task/handler panics, task failures, connect/reload/script failures  |

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that forwards events to `tracing`.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        let addr = e.addr.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        let commit = e.commit.as_deref().unwrap_or("-");

        match e.kind {
            EventKind::TaskStarting => debug!(
                task,
                id = e.task_id,
                count = e.in_flight,
                from = e.origin.as_deref(),
                "task start"
            ),
            EventKind::TaskStopped => {
                debug!(task, id = e.task_id, count = e.in_flight, "task end")
            }
            EventKind::TaskFailed => {
                error!(task, id = e.task_id, err = reason, "task returned error")
            }
            EventKind::TaskPanicked => {
                error!(task, id = e.task_id, panic = reason, "task panicked")
            }
            EventKind::TaskRejected => warn!(task, "task refused: shutting down"),
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllDrained => info!("all tasks drained"),
            EventKind::GraceExceeded => {
                error!(in_flight = e.in_flight, "shutdown grace exceeded")
            }
            EventKind::ShardConnected => info!(shard = e.shard, addr, "connect to store"),
            EventKind::ShardRejected => {
                warn!(shard = e.shard, addr, reason, "store already has shard id")
            }
            EventKind::ShardConnectFailed => {
                error!(shard = e.shard, addr, err = reason, "store connect failed")
            }
            EventKind::ShardClosed => info!(shard = e.shard, addr, "store connection closed"),
            EventKind::ScriptReloading => {
                info!(shard = e.shard, cmd = e.command, commit, "try reload store script")
            }
            EventKind::ScriptReloadFailed => error!(
                shard = e.shard,
                cmd = e.command,
                commit,
                err = reason,
                "store script load failed"
            ),
            EventKind::ScriptFailed => error!(
                shard = e.shard,
                cmd = e.command,
                commit,
                err = reason,
                "store script error"
            ),
            EventKind::SubscriptionOpened => info!(addr, channels = reason, "subscribed"),
            EventKind::SubscriptionFailed => error!(addr, err = reason, "subscribe failed"),
            EventKind::SubscriptionClosed => info!(addr, "subscription closed"),
            EventKind::SubscriptionEnded => {
                warn!(addr, err = reason, "subscription receive loop ended")
            }
            EventKind::HandlerPanicked => {
                error!(addr, panic = reason, "message handler panicked")
            }
            EventKind::SubscriberOverflow => warn!(subscriber = task, reason, "event dropped"),
            EventKind::SubscriberPanicked => {
                error!(subscriber = task, panic = reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
