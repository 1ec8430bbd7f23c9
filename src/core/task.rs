//! Task identity and the handle returned for cancellable tasks.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Supervisor-assigned task id (monotonic, starts at 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Bookkeeping for one supervised unit, owned by the spawned future.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) name: Arc<str>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) origin: Option<Arc<str>>,
}

/// Handle to a task started with [`Supervisor::spawn_cancellable`](crate::Supervisor::spawn_cancellable).
///
/// The token is fired when cancellation is requested **or** when the task
/// exits on its own, so [`TaskHandle::done`] never waits forever.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: TaskId,
    token: CancellationToken,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, token: CancellationToken) -> Self {
        Self { id, token }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once cancellation was requested or the task has exited.
    pub fn is_signalled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until cancellation was requested or the task has exited.
    pub async fn done(&self) {
        self.token.cancelled().await;
    }
}
