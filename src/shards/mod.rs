//! Sharded store client.
//!
//! - [`ShardManager`]: shard id → connection registry, script execution, pub/sub;
//! - [`Shard`]: one shard's connection and the reload-and-retry script path;
//! - [`ErrorTable`]: integer reply codes → domain errors;
//! - [`ShardConfig`]: per-shard connection settings.

mod codes;
mod config;
mod fanout;
mod manager;
mod shard;

pub use codes::ErrorTable;
pub use config::ShardConfig;
pub use fanout::{MessageHandler, SubscriptionInfo, SubscriptionState};
pub use manager::{ShardManager, ShardManagerBuilder};
pub use shard::Shard;

/// Logical shard id.
pub type ShardId = u32;

/// Id of the global/default shard.
pub const GLOBAL_SHARD: ShardId = 0;
