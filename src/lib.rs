//! # shardvisor
//!
//! **Shardvisor** pairs a supervised tokio task runtime with a sharded
//! key-value store client that executes server-side scripts by cached hash.
//!
//! It provides:
//! - tracked background tasks with graceful drain and one-shot cancellation;
//! - a script registry caching the store-assigned hash of every script;
//! - one connection per logical shard, with reload-and-retry-once on `NOSCRIPT`;
//! - pub/sub fan-out keeping a single subscription per physical store address.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!          ┌────────────────┐          ┌──────────────────┐
//!          │ ScriptRegistry │          │    ErrorTable    │
//!          │ id → source,   │          │ code → DomainErr │
//!          │      hash      │          └────────┬─────────┘
//!          └───────┬────────┘                   │
//!                  ▼                            ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  ShardManager                                                    │
//! │  - shards: RwLock<id → Shard>   (Shard: config + Connection)     │
//! │  - fan-out: RwLock<addr → Binding>, channel set, handler         │
//! └──────┬──────────────────────────────────────┬────────────────────┘
//!        │ execute_script                       │ spawn receive loops
//!        ▼                                      ▼
//!  Connection (EVALSHA / SCRIPT LOAD)   ┌─────────────────────────┐
//!        │                              │ Supervisor              │
//!        ▼                              │ - in-flight counter     │
//!  backing store ◄── SUBSCRIBE ──────── │ - cancel registry       │
//!                                       │ - TaskTracker / drain   │
//!                                       └────────────┬────────────┘
//!                                                    ▼
//!                               Bus ──► SubscriberSet ──► LogWriter (tracing)
//! ```
//!
//! ### Script execution
//! ```text
//! execute_script(shard, cmd, keys, args)
//!   ├─ unknown cmd/shard      ─► Backend
//!   ├─ EVALSHA cached hash
//!   │    ├─ Ok(text)          ─► payload
//!   │    ├─ Ok(int)           ─► Domain(ErrorTable[int])
//!   │    ├─ Ok(other)         ─► DataType
//!   │    ├─ NOSCRIPT          ─► SCRIPT LOAD ─► EVALSHA once more
//!   │    └─ other error       ─► Backend
//! ```
//!
//! ## Features
//! | Area              | Description                                         | Key types / traits                      |
//! |-------------------|-----------------------------------------------------|-----------------------------------------|
//! | **Supervision**   | Tracked tasks, cancellation, drain, OS signals      | [`Supervisor`], [`TaskHandle`]          |
//! | **Scripts**       | Registered scripts and their cached hashes          | [`ScriptRegistry`], [`CommandId`]       |
//! | **Shards**        | Shard registry, script execution, pub/sub           | [`ShardManager`], [`Shard`]             |
//! | **Store seam**    | Pluggable store client                              | [`Connector`], [`Connection`]           |
//! | **Subscriber API**| Hook into runtime events (logging, metrics, tests)  | [`Subscribe`], [`LogWriter`]            |
//! | **Errors**        | Typed errors with stable labels                     | [`ScriptError`], [`RuntimeError`]       |
//!
//! ## Optional features
//! - `redis` (default): [`store::redis::RedisConnector`] built on redis-rs.
//!
//! ## Example
//! ```rust
//! use shardvisor::{ScriptRegistry, Supervisor, SupervisorConfig, TaskError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let sup = Supervisor::builder(SupervisorConfig::default()).build();
//!     let scripts = ScriptRegistry::new();
//!     let id = scripts.register("v1", "return ARGV[1]");
//!     assert_eq!(id.get(), 1);
//!
//!     sup.spawn("warmup", async { Ok::<(), TaskError>(()) });
//!     sup.shutdown();
//!     sup.drain_all().await;
//!     assert_eq!(sup.in_flight(), 0);
//! }
//! ```
mod core;
mod error;
mod events;
mod scripts;
mod shards;
mod subscribers;

pub mod store;

// ---- Public re-exports ----

pub use core::{Supervisor, SupervisorBuilder, SupervisorConfig, TaskHandle, TaskId};
pub use error::{DomainError, RuntimeError, ScriptError, ShardError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use scripts::{CommandId, ResolvedScript, ScriptRegistry};
pub use shards::{
    ErrorTable, GLOBAL_SHARD, MessageHandler, Shard, ShardConfig, ShardId, ShardManager,
    ShardManagerBuilder, SubscriptionInfo, SubscriptionState,
};
pub use store::{Connection, Connector, Message, MessageStream, Reply, StoreError};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
