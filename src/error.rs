//! Error types used by the runtime, supervised tasks and the store client.
//!
//! - [`RuntimeError`]: failures of the supervisor itself (grace exceeded, shutting down).
//! - [`TaskError`]: results of individual supervised units.
//! - [`ShardError`]: shard registration failures.
//! - [`ScriptError`]: the only error kinds script callers ever observe.
//! - [`DomainError`]: an integer reply translated through an [`ErrorTable`](crate::ErrorTable).
//!
//! Every enum provides `as_label` for logs/metrics.

use std::borrow::Cow;
use std::time::Duration;

use thiserror::Error;

use crate::shards::ShardId;
use crate::store::StoreError;

/// # Errors produced by the supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Drain did not finish within the grace period.
    #[error("shutdown timeout {grace:?} exceeded; {in_flight} task(s) still running")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Tasks still in flight when the grace period ran out.
        in_flight: usize,
    },

    /// A cancellable task was refused because shutdown already began.
    #[error("runtime is shutting down")]
    ShuttingDown,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use shardvisor::RuntimeError;
    ///
    /// assert_eq!(RuntimeError::ShuttingDown.as_label(), "runtime_shutting_down");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::ShuttingDown => "runtime_shutting_down",
        }
    }
}

/// # Outcome of a supervised unit.
///
/// Returned by units handed to [`Supervisor::spawn`](crate::Supervisor::spawn);
/// the supervisor logs it and never propagates it.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Non-recoverable error.
    #[error("fatal error: {error}")]
    Fatal { error: String },

    /// Unit failed.
    #[error("execution failed: {error}")]
    Fail { error: String },

    /// Unit observed its cancellation signal and stopped.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }
}

/// # Errors produced while registering a shard.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ShardError {
    /// The shard id is already registered; the existing connection was kept.
    #[error("shard {0} already registered")]
    Duplicate(ShardId),

    /// Connecting to the shard's address failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: StoreError,
    },
}

impl ShardError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ShardError::Duplicate(_) => "shard_duplicate",
            ShardError::Connect { .. } => "shard_connect",
        }
    }
}

/// # Structured error carried by an integer script reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name} (code {code})")]
pub struct DomainError {
    /// Raw integer returned by the script.
    pub code: i64,
    /// Name registered for the code, or `"unknown"`.
    pub name: Cow<'static, str>,
}

impl DomainError {
    pub fn new(code: i64, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            name: name.into(),
        }
    }

    /// Error for a code absent from the table.
    pub fn unknown(code: i64) -> Self {
        Self::new(code, "unknown")
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }
}

/// # Errors observed by script callers.
///
/// Raw store errors never reach callers; they are logged and collapsed into
/// [`ScriptError::Backend`].
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The store interaction failed or could not be classified.
    #[error("backend error")]
    Backend,

    /// The store replied with a type the call did not expect.
    #[error("unexpected reply data type")]
    DataType,

    /// The script replied with an error code.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ScriptError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use shardvisor::{DomainError, ScriptError};
    ///
    /// assert_eq!(ScriptError::Backend.as_label(), "script_backend");
    /// assert_eq!(ScriptError::from(DomainError::new(7, "NotFound")).as_label(), "script_domain");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ScriptError::Backend => "script_backend",
            ScriptError::DataType => "script_data_type",
            ScriptError::Domain(_) => "script_domain",
        }
    }

    /// Returns the domain error, if this is one.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ScriptError::Domain(e) => Some(e),
            _ => None,
        }
    }
}
