//! # Shard handle and cached-script execution.
//!
//! A [`Shard`] owns one store connection and runs registered scripts against
//! it by cached hash.
//!
//! ## Flow
//! ```text
//! script(cmd, keys, args)
//!   ├─ registry.resolve(cmd) ── None ──► Backend (no store call)
//!   ├─ hash cached? ── yes ──► EVALSHA hash
//!   │                            ├─ Ok            ──► reply
//!   │                            ├─ "NOSCRIPT …"  ──► reload ↓
//!   │                            └─ other error   ──► Backend
//!   └─ reload: SCRIPT LOAD source ── Err ──► Backend
//!              update_cached_hash(cmd, fresh)
//!              EVALSHA fresh ── Ok ──► reply
//!                            └─ Err ──► Backend (cache cleared on NOSCRIPT)
//! ```
//!
//! Per call: at most one `SCRIPT LOAD` and at most two `EVALSHA`.

use std::sync::Arc;

use crate::error::ScriptError;
use crate::events::{Bus, Event, EventKind};
use crate::scripts::{CommandId, ResolvedScript, ScriptRegistry};
use crate::shards::{ErrorTable, ShardConfig, ShardId};
use crate::store::{Connection, Reply, StoreError};

/// One logical shard: id, configuration and its live connection.
pub struct Shard {
    id: ShardId,
    config: ShardConfig,
    conn: Arc<dyn Connection>,
    scripts: Arc<ScriptRegistry>,
    codes: Arc<ErrorTable>,
    bus: Bus,
}

impl Shard {
    pub(crate) fn new(
        id: ShardId,
        config: ShardConfig,
        conn: Arc<dyn Connection>,
        scripts: Arc<ScriptRegistry>,
        codes: Arc<ErrorTable>,
        bus: Bus,
    ) -> Self {
        Self {
            id,
            config,
            conn,
            scripts,
            codes,
            bus,
        }
    }

    pub fn id(&self) -> ShardId {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.config.addr
    }

    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    pub(crate) fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    /// Runs a string-returning script.
    ///
    /// - text reply → `Ok(text)`
    /// - integer reply → [`ScriptError::Domain`] via the error table
    /// - any other reply → [`ScriptError::DataType`]
    pub async fn script_str(
        &self,
        cmd: CommandId,
        keys: &[&str],
        args: &[&str],
    ) -> Result<String, ScriptError> {
        match self.script(cmd, keys, args).await? {
            Reply::Text(payload) => Ok(payload),
            Reply::Int(code) => Err(ScriptError::Domain(self.codes.lookup(code))),
            _ => Err(ScriptError::DataType),
        }
    }

    /// Runs an integer-returning script; the integer is the payload.
    pub async fn script_int(
        &self,
        cmd: CommandId,
        keys: &[&str],
        args: &[&str],
    ) -> Result<i64, ScriptError> {
        match self.script(cmd, keys, args).await? {
            Reply::Int(n) => Ok(n),
            _ => Err(ScriptError::DataType),
        }
    }

    /// Runs a script and returns the raw reply.
    ///
    /// Store failures are published as events and surfaced as
    /// [`ScriptError::Backend`].
    pub async fn script(
        &self,
        cmd: CommandId,
        keys: &[&str],
        args: &[&str],
    ) -> Result<Reply, ScriptError> {
        let Some(script) = self.scripts.resolve(cmd) else {
            self.bus.publish(
                Event::new(EventKind::ScriptFailed)
                    .with_shard(self.id)
                    .with_command(cmd.get())
                    .with_reason("command not registered"),
            );
            return Err(ScriptError::Backend);
        };

        let reason = match script.hash.as_deref() {
            Some(hash) => match self.conn.eval_sha(hash, keys, args).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_noscript() => e.to_string(),
                Err(e) => return Err(self.failed(&script, &e)),
            },
            None => "hash not cached".to_string(),
        };

        self.reload_and_retry(&script, reason, keys, args).await
    }

    async fn reload_and_retry(
        &self,
        script: &ResolvedScript,
        reason: String,
        keys: &[&str],
        args: &[&str],
    ) -> Result<Reply, ScriptError> {
        self.bus.publish(
            self.script_event(EventKind::ScriptReloading, script)
                .with_reason(reason),
        );

        let hash = match self.conn.script_load(&script.source).await {
            Ok(hash) => hash,
            Err(e) => {
                self.bus.publish(
                    self.script_event(EventKind::ScriptReloadFailed, script)
                        .with_reason(e.to_string()),
                );
                return Err(ScriptError::Backend);
            }
        };
        self.scripts.update_cached_hash(script.id, hash.as_str());

        match self.conn.eval_sha(&hash, keys, args).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                // A hash the store forgot right after loading must not be reused.
                if e.is_noscript() {
                    self.scripts.clear_cached_hash(script.id);
                }
                Err(self.failed(script, &e))
            }
        }
    }

    fn failed(&self, script: &ResolvedScript, err: &StoreError) -> ScriptError {
        self.bus.publish(
            self.script_event(EventKind::ScriptFailed, script)
                .with_reason(err.to_string()),
        );
        ScriptError::Backend
    }

    fn script_event(&self, kind: EventKind, script: &ResolvedScript) -> Event {
        Event::new(kind)
            .with_shard(self.id)
            .with_command(script.id.get())
            .with_commit(Arc::clone(&script.commit))
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.id)
            .field("addr", &self.config.addr)
            .finish_non_exhaustive()
    }
}
