//! # Shard manager: shard registry, script execution and pub/sub.
//!
//! The [`ShardManager`] owns one connection per logical shard id and shares a
//! [`ScriptRegistry`] and an [`ErrorTable`] with every shard. Subscriptions are
//! delegated to the fan-out, which keeps one stream per distinct address.
//!
//! ## Architecture
//! ```text
//! add_shard(id, cfg)
//!   ├─ id present?          → ShardRejected, Err(Duplicate)
//!   ├─ connector.connect()  → ShardConnectFailed, Err(Connect)
//!   ├─ write lock: id present? (lost race) → close new conn, Err(Duplicate)
//!   ├─ insert, publish ShardConnected
//!   └─ fanout.register_address(addr)     (subscribes if a channel set is active)
//!
//! execute_script(shard, cmd, keys, args)
//!   ├─ cmd unknown          → Backend (no store call)
//!   ├─ shard unknown        → Backend
//!   └─ Shard::script_str(cmd, keys, args)
//! ```
//!
//! ## Rules
//! - A shard id is registered at most once; the first connection stays.
//! - Lookups take the read lock; only registration takes the write lock.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use shardvisor::store::redis::RedisConnector;
//! use shardvisor::{ErrorTable, ScriptRegistry, ShardConfig, ShardManager, Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = Supervisor::builder(SupervisorConfig::default()).build();
//!     let scripts = Arc::new(ScriptRegistry::new());
//!     let get = scripts.register("v1", "return redis.call('GET', KEYS[1]) or 7");
//!
//!     let mgr = ShardManager::builder(Arc::clone(&sup), Arc::new(RedisConnector))
//!         .with_scripts(scripts)
//!         .with_codes(ErrorTable::new().with(7, "NotFound"))
//!         .connect(ShardConfig::new("127.0.0.1:6379"))
//!         .await?;
//!
//!     mgr.subscribe(["events"], |channel: &str, payload: &str| {
//!         println!("{channel}: {payload}");
//!     })
//!     .await;
//!
//!     let value = mgr.execute_script(0, get, &["user:1"], &[]).await;
//!     println!("{value:?}");
//!
//!     mgr.close_all().await;
//!     sup.shutdown();
//!     sup.drain_with_grace().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::fanout::{Fanout, MessageHandler, SubscriptionInfo};
use super::shard::Shard;
use super::{ErrorTable, GLOBAL_SHARD, ShardConfig, ShardId};
use crate::core::Supervisor;
use crate::error::{ScriptError, ShardError};
use crate::events::{Event, EventKind};
use crate::scripts::{CommandId, ScriptRegistry};
use crate::store::Connector;

/// Builder for a [`ShardManager`].
pub struct ShardManagerBuilder {
    supervisor: Arc<Supervisor>,
    connector: Arc<dyn Connector>,
    scripts: Option<Arc<ScriptRegistry>>,
    codes: ErrorTable,
}

impl ShardManagerBuilder {
    /// Shares an existing script registry; a fresh one is created otherwise.
    pub fn with_scripts(mut self, scripts: Arc<ScriptRegistry>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    /// Sets the table used to translate integer replies.
    pub fn with_codes(mut self, codes: ErrorTable) -> Self {
        self.codes = codes;
        self
    }

    pub fn build(self) -> Arc<ShardManager> {
        Arc::new(ShardManager {
            fanout: Fanout::new(Arc::clone(&self.supervisor)),
            supervisor: self.supervisor,
            connector: self.connector,
            scripts: self.scripts.unwrap_or_default(),
            codes: Arc::new(self.codes),
            shards: RwLock::new(HashMap::new()),
        })
    }

    /// Builds the manager and registers `global` as shard 0.
    pub async fn connect(self, global: ShardConfig) -> Result<Arc<ShardManager>, ShardError> {
        let mgr = self.build();
        mgr.add_shard(GLOBAL_SHARD, global).await?;
        Ok(mgr)
    }
}

/// Registry of shard connections.
pub struct ShardManager {
    supervisor: Arc<Supervisor>,
    connector: Arc<dyn Connector>,
    scripts: Arc<ScriptRegistry>,
    codes: Arc<ErrorTable>,
    shards: RwLock<HashMap<ShardId, Arc<Shard>>>,
    fanout: Fanout,
}

impl ShardManager {
    pub fn builder(supervisor: Arc<Supervisor>, connector: Arc<dyn Connector>) -> ShardManagerBuilder {
        ShardManagerBuilder {
            supervisor,
            connector,
            scripts: None,
            codes: ErrorTable::new(),
        }
    }

    pub fn scripts(&self) -> &Arc<ScriptRegistry> {
        &self.scripts
    }

    pub fn codes(&self) -> &ErrorTable {
        &self.codes
    }

    /// Connects and registers shard `id`.
    ///
    /// A duplicate id is rejected with [`ShardError::Duplicate`] and leaves the
    /// registered shard untouched.
    pub async fn add_shard(&self, id: ShardId, cfg: ShardConfig) -> Result<Arc<Shard>, ShardError> {
        if self.shards.read().await.contains_key(&id) {
            return Err(self.rejected(id, &cfg.addr));
        }

        let conn = match self.connector.connect(&cfg).await {
            Ok(conn) => conn,
            Err(source) => {
                self.supervisor.bus().publish(
                    Event::new(EventKind::ShardConnectFailed)
                        .with_shard(id)
                        .with_addr(cfg.addr.as_str())
                        .with_reason(source.to_string()),
                );
                return Err(ShardError::Connect {
                    addr: cfg.addr,
                    source,
                });
            }
        };

        let shard = Arc::new(Shard::new(
            id,
            cfg,
            Arc::clone(&conn),
            Arc::clone(&self.scripts),
            Arc::clone(&self.codes),
            self.supervisor.bus().clone(),
        ));

        {
            let mut shards = self.shards.write().await;
            if shards.contains_key(&id) {
                drop(shards);
                conn.close().await;
                return Err(self.rejected(id, shard.addr()));
            }
            shards.insert(id, Arc::clone(&shard));
        }

        self.supervisor.bus().publish(
            Event::new(EventKind::ShardConnected)
                .with_shard(id)
                .with_addr(shard.addr()),
        );
        self.fanout.register_address(shard.addr(), conn).await;
        Ok(shard)
    }

    pub async fn by_id(&self, id: ShardId) -> Option<Arc<Shard>> {
        self.shards.read().await.get(&id).cloned()
    }

    /// Shard 0.
    pub async fn global(&self) -> Option<Arc<Shard>> {
        self.by_id(GLOBAL_SHARD).await
    }

    /// Ids of every registered shard, ascending.
    pub async fn shard_ids(&self) -> Vec<ShardId> {
        let mut ids: Vec<_> = self.shards.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Runs a string-returning script on shard `id`.
    ///
    /// See [`Shard::script_str`] for reply interpretation.
    pub async fn execute_script(
        &self,
        id: ShardId,
        cmd: CommandId,
        keys: &[&str],
        args: &[&str],
    ) -> Result<String, ScriptError> {
        let shard = self.shard_for(id, cmd).await?;
        shard.script_str(cmd, keys, args).await
    }

    /// Runs an integer-returning script on shard `id`.
    pub async fn execute_script_int(
        &self,
        id: ShardId,
        cmd: CommandId,
        keys: &[&str],
        args: &[&str],
    ) -> Result<i64, ScriptError> {
        let shard = self.shard_for(id, cmd).await?;
        shard.script_int(cmd, keys, args).await
    }

    /// Replaces the process-wide channel set and handler.
    ///
    /// Every current subscription is closed first, then each known address is
    /// subscribed to `channels`. Returns the number of subscriptions opened.
    pub async fn subscribe<I, S, H>(&self, channels: I, handler: H) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        H: MessageHandler,
    {
        let channels = channels.into_iter().map(Into::into).collect();
        self.fanout.subscribe(channels, Arc::new(handler)).await
    }

    /// Snapshot of every address binding, ordered by address.
    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.fanout.snapshot().await
    }

    /// Closes every subscription and every shard connection.
    pub async fn close_all(&self) {
        self.fanout.close_all().await;

        let shards: Vec<_> = self.shards.read().await.values().cloned().collect();
        for shard in shards {
            shard.connection().close().await;
            self.supervisor.bus().publish(
                Event::new(EventKind::ShardClosed)
                    .with_shard(shard.id())
                    .with_addr(shard.addr()),
            );
        }
    }

    async fn shard_for(&self, id: ShardId, cmd: CommandId) -> Result<Arc<Shard>, ScriptError> {
        let reason = if self.scripts.resolve(cmd).is_none() {
            "command not registered"
        } else if let Some(shard) = self.by_id(id).await {
            return Ok(shard);
        } else {
            "shard not registered"
        };

        self.supervisor.bus().publish(
            Event::new(EventKind::ScriptFailed)
                .with_shard(id)
                .with_command(cmd.get())
                .with_reason(reason),
        );
        Err(ScriptError::Backend)
    }

    fn rejected(&self, id: ShardId, addr: &str) -> ShardError {
        self.supervisor.bus().publish(
            Event::new(EventKind::ShardRejected)
                .with_shard(id)
                .with_addr(addr)
                .with_reason("shard id already registered"),
        );
        ShardError::Duplicate(id)
    }
}
