//! # redis-rs connector.
//!
//! Each shard gets `pool_size` multiplexed connections used round-robin for
//! script calls; every subscription opens its own dedicated pub/sub connection.
//!
//! A pub/sub stream that ends on its own is reported as a network error and
//! reopened (and resubscribed) on the next read. Only [`Connection::close`]
//! makes a stream yield [`StoreError::Closed`].

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::{ErrorKind, RedisError, Value};

use super::{Connection, Connector, Message, MessageStream, NOSCRIPT_PREFIX, Reply, StoreError};
use crate::shards::ShardConfig;

/// Pause before reopening a lost pub/sub connection.
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

type MsgStream = Pin<Box<dyn Stream<Item = redis::Msg> + Send>>;

/// Connects shards with redis-rs.
#[derive(Clone, Copy, Debug, Default)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, cfg: &ShardConfig) -> Result<Arc<dyn Connection>, StoreError> {
        let client = redis::Client::open(connection_url(cfg)).map_err(store_error)?;

        let mut pool = Vec::with_capacity(cfg.pool_size_clamped());
        for _ in 0..cfg.pool_size_clamped() {
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(store_error)?;
            pool.push(conn);
        }

        Ok(Arc::new(RedisConnection::new(client, pool)))
    }
}

struct RedisConnection {
    client: redis::Client,
    pool: Mutex<Vec<MultiplexedConnection>>,
    next: AtomicUsize,
    closed: Arc<AtomicBool>,
}

impl RedisConnection {
    fn new(client: redis::Client, pool: Vec<MultiplexedConnection>) -> Self {
        Self {
            client,
            pool: Mutex::new(pool),
            next: AtomicUsize::new(0),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn pick(&self) -> Result<MultiplexedConnection, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        if pool.is_empty() {
            return Err(StoreError::Closed);
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % pool.len();
        Ok(pool[i].clone())
    }
}

#[async_trait]
impl Connection for RedisConnection {
    async fn eval_sha(
        &self,
        hash: &str,
        keys: &[&str],
        args: &[&str],
    ) -> Result<Reply, StoreError> {
        let mut conn = self.pick()?;
        let value: Value = redis::cmd("EVALSHA")
            .arg(hash)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(reply_from(value))
    }

    async fn script_load(&self, source: &str) -> Result<String, StoreError> {
        let mut conn = self.pick()?;
        let hash: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(source)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(hash)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Box<dyn MessageStream>, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let inner = open_messages(&self.client, channels).await?;
        Ok(Box::new(RedisMessages {
            client: self.client.clone(),
            channels: channels.to_vec(),
            closed: Arc::clone(&self.closed),
            inner: Some(inner),
        }))
    }

    /// Drops the pooled connections; later calls fail with [`StoreError::Closed`].
    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.pool.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

async fn open_messages(client: &redis::Client, channels: &[String]) -> Result<MsgStream, StoreError> {
    let mut pubsub = client.get_async_pubsub().await.map_err(store_error)?;
    pubsub.subscribe(channels).await.map_err(store_error)?;
    Ok(Box::pin(pubsub.into_on_message()))
}

struct RedisMessages {
    client: redis::Client,
    channels: Vec<String>,
    closed: Arc<AtomicBool>,
    /// `None` after the connection was lost; reopened on the next read.
    inner: Option<MsgStream>,
}

#[async_trait]
impl MessageStream for RedisMessages {
    async fn next_message(&mut self) -> Result<Message, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            self.inner = None;
            return Err(StoreError::Closed);
        }

        if self.inner.is_none() {
            tokio::time::sleep(RECONNECT_DELAY).await;
            self.inner = Some(open_messages(&self.client, &self.channels).await?);
            tracing::debug!(channels = ?self.channels, "pub/sub connection reopened");
        }

        let next = match self.inner.as_mut() {
            Some(inner) => inner.next().await,
            None => None,
        };
        match next {
            Some(msg) => Ok(Message {
                channel: msg.get_channel_name().to_string(),
                payload: String::from_utf8_lossy(msg.get_payload_bytes()).into_owned(),
            }),
            None => {
                self.inner = None;
                Err(StoreError::Network("pub/sub connection lost".into()))
            }
        }
    }
}

fn connection_url(cfg: &ShardConfig) -> String {
    match cfg.password() {
        Some(pw) => format!("redis://:{}@{}/", urlencoding::encode(pw), cfg.addr),
        None => format!("redis://{}/", cfg.addr),
    }
}

fn store_error(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        return StoreError::Network(err.to_string());
    }
    match (err.kind(), err.code()) {
        (ErrorKind::NoScriptError, _) => StoreError::Server(format!(
            "{NOSCRIPT_PREFIX}{}",
            err.detail().unwrap_or("No matching script.")
        )),
        (_, Some(code)) => {
            StoreError::Server(format!("{code} {}", err.detail().unwrap_or_default()))
        }
        _ => StoreError::Server(err.to_string()),
    }
}

fn reply_from(value: Value) -> Reply {
    match value {
        Value::Int(n) => Reply::Int(n),
        Value::BulkString(bytes) => Reply::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Value::SimpleString(s) => Reply::Text(s),
        Value::Okay => Reply::Text("OK".to_string()),
        Value::Nil => Reply::Nil,
        Value::Array(items) => Reply::Array(items.into_iter().map(reply_from).collect()),
        other => Reply::Other(format!("{other:?}")),
    }
}
