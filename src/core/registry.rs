//! # Cancellation table for cancellable tasks.
//!
//! Maps live task ids to their cancellation tokens so a single task can be
//! cancelled by id. Tokens are children of the supervisor's runtime token, so
//! shutdown reaches every entry without walking the table.
//!
//! ## Rules
//! - An entry exists exactly while its task is running.
//! - [`CancelRegistry::finish`] removes the entry and fires the token; firing an
//!   already-cancelled token is a no-op, so waiters are released exactly once.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio_util::sync::CancellationToken;

use super::task::TaskId;

#[derive(Default)]
pub(crate) struct CancelRegistry {
    tokens: RwLock<HashMap<TaskId, CancellationToken>>,
}

impl CancelRegistry {
    pub(crate) fn insert(&self, id: TaskId, token: CancellationToken) {
        self.tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, token);
    }

    /// Fires the token registered under `id`; `false` if the task already finished.
    pub(crate) fn cancel(&self, id: TaskId) -> bool {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        match tokens.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Removes the entry for a completed task and releases anyone waiting on its token.
    pub(crate) fn finish(&self, id: TaskId) {
        let token = self
            .tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(token) = token {
            token.cancel();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
