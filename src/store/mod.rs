//! # Backing-store seam.
//!
//! The shard manager talks to the store only through these traits, so the
//! retry/dedup logic is independent of the client library:
//!
//! ```text
//! Connector::connect(ShardConfig) ──► Connection
//!                                       ├─ eval_sha(hash, keys, args)   EVALSHA
//!                                       ├─ script_load(source)          SCRIPT LOAD
//!                                       └─ subscribe(channels) ──► MessageStream
//!                                                                    └─ next_message()
//! ```
//!
//! The redis-rs implementation lives in [`redis`] (feature `redis`, on by default).

#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::shards::ShardConfig;

/// Prefix of the store's "script not found" error message (case-sensitive).
pub const NOSCRIPT_PREFIX: &str = "NOSCRIPT ";

/// Raw failure reported by a store call.
///
/// Internal to the client: script callers only ever see
/// [`ScriptError`](crate::ScriptError).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Error reply from the server, e.g. `NOSCRIPT No matching script`.
    #[error("{0}")]
    Server(String),

    /// Network-level failure (I/O, timeout, dropped connection).
    #[error("network error: {0}")]
    Network(String),

    /// The connection or stream is closed for good.
    #[error("connection closed")]
    Closed,
}

impl StoreError {
    /// True when the server reported the script hash unknown.
    pub fn is_noscript(&self) -> bool {
        matches!(self, StoreError::Server(msg) if msg.starts_with(NOSCRIPT_PREFIX))
    }

    /// True for network-level failures a receive loop may ride out.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Network(_))
    }
}

/// Reply of a script execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Int(i64),
    Text(String),
    Nil,
    Array(Vec<Reply>),
    /// Any other reply type (maps, doubles, booleans...), rendered for diagnostics.
    Other(String),
}

/// A pub/sub message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

/// Opens connections for shard configurations.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, cfg: &ShardConfig) -> Result<Arc<dyn Connection>, StoreError>;
}

/// One shard's connection to the store.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// `EVALSHA hash numkeys keys... args...`
    async fn eval_sha(&self, hash: &str, keys: &[&str], args: &[&str])
    -> Result<Reply, StoreError>;

    /// `SCRIPT LOAD source`; returns the store-assigned hash.
    async fn script_load(&self, source: &str) -> Result<String, StoreError>;

    /// Opens a dedicated pub/sub stream subscribed to `channels`.
    async fn subscribe(&self, channels: &[String]) -> Result<Box<dyn MessageStream>, StoreError>;

    /// Closes the connection; later calls fail with [`StoreError::Closed`].
    async fn close(&self);
}

/// Receiving side of a subscription. Dropping it unsubscribes.
#[async_trait]
pub trait MessageStream: Send + 'static {
    /// Waits for the next message. Must be cancel-safe.
    async fn next_message(&mut self) -> Result<Message, StoreError>;
}
