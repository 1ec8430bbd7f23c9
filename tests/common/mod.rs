//! In-memory store double shared by the integration tests.
#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shardvisor::{
    Connection, Connector, ErrorTable, Event, Message, MessageStream, Reply, ScriptRegistry,
    ShardConfig, ShardManager, StoreError, SubscriptionState, Supervisor, SupervisorConfig,
};
use tokio::sync::{broadcast, mpsc};

pub const NOSCRIPT_REPLY: &str = "NOSCRIPT No matching script. Please use EVAL.";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Sub {
    id: u64,
    channels: Vec<String>,
    tx: mpsc::UnboundedSender<Result<Message, StoreError>>,
}

#[derive(Default)]
struct ServerState {
    loaded: HashMap<String, String>,
    replies: HashMap<String, Reply>,
    fail_loads: bool,
    forget_loads: bool,
    fail_evalsha: Option<StoreError>,
    subs: Vec<Sub>,
}

/// One fake store address.
#[derive(Default)]
pub struct MemoryServer {
    state: Mutex<ServerState>,
    next_sub: AtomicU64,
    pub evalsha_calls: AtomicUsize,
    pub load_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
}

impl MemoryServer {
    /// Reply returned whenever the script with this source runs.
    pub fn set_reply(&self, source: &str, reply: Reply) {
        self.lock().replies.insert(source.to_string(), reply);
    }

    /// Forgets every loaded script, like `SCRIPT FLUSH` or a restart.
    pub fn flush_scripts(&self) {
        self.lock().loaded.clear();
    }

    pub fn fail_loads(&self, fail: bool) {
        self.lock().fail_loads = fail;
    }

    /// Loads succeed but the script is never retained.
    pub fn forget_loads(&self, forget: bool) {
        self.lock().forget_loads = forget;
    }

    pub fn fail_evalsha(&self, err: Option<StoreError>) {
        self.lock().fail_evalsha = err;
    }

    /// Delivers a message to every stream subscribed to `channel`.
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        let st = self.lock();
        st.subs
            .iter()
            .filter(|s| s.channels.iter().any(|c| c == channel))
            .filter(|s| {
                s.tx
                    .send(Ok(Message {
                        channel: channel.to_string(),
                        payload: payload.to_string(),
                    }))
                    .is_ok()
            })
            .count()
    }

    /// Sends an error to every live stream.
    pub fn inject_error(&self, err: StoreError) {
        for s in &self.lock().subs {
            let _ = s.tx.send(Err(err.clone()));
        }
    }

    /// Drops the sending side of every stream; receivers observe `Closed`.
    pub fn close_streams(&self) {
        self.lock().subs.clear();
    }

    /// Channel lists of the live streams.
    pub fn active_subscriptions(&self) -> Vec<Vec<String>> {
        self.lock().subs.iter().map(|s| s.channels.clone()).collect()
    }

    pub fn evalsha(&self) -> usize {
        self.evalsha_calls.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }
}

fn script_hash(source: &str) -> String {
    let mut h = DefaultHasher::new();
    source.hash(&mut h);
    format!("{:016x}", h.finish())
}

/// Connector handing out connections to per-address [`MemoryServer`]s.
#[derive(Default)]
pub struct MemoryConnector {
    servers: Mutex<HashMap<String, Arc<MemoryServer>>>,
    refused: Mutex<HashSet<String>>,
    pub connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn server(&self, addr: &str) -> Arc<MemoryServer> {
        Arc::clone(
            self.servers
                .lock()
                .unwrap()
                .entry(addr.to_string())
                .or_default(),
        )
    }

    pub fn refuse(&self, addr: &str) {
        self.refused.lock().unwrap().insert(addr.to_string());
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, cfg: &ShardConfig) -> Result<Arc<dyn Connection>, StoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refused.lock().unwrap().contains(&cfg.addr) {
            return Err(StoreError::Network("connection refused".into()));
        }
        Ok(Arc::new(MemoryConnection {
            server: self.server(&cfg.addr),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    server: Arc<MemoryServer>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn eval_sha(
        &self,
        hash: &str,
        _keys: &[&str],
        _args: &[&str],
    ) -> Result<Reply, StoreError> {
        self.check_open()?;
        self.server.evalsha_calls.fetch_add(1, Ordering::SeqCst);
        let st = self.server.lock();
        if let Some(err) = &st.fail_evalsha {
            return Err(err.clone());
        }
        match st.loaded.get(hash) {
            Some(source) => Ok(st.replies.get(source).cloned().unwrap_or(Reply::Nil)),
            None => Err(StoreError::Server(NOSCRIPT_REPLY.into())),
        }
    }

    async fn script_load(&self, source: &str) -> Result<String, StoreError> {
        self.check_open()?;
        self.server.load_calls.fetch_add(1, Ordering::SeqCst);
        let mut st = self.server.lock();
        if st.fail_loads {
            return Err(StoreError::Server("ERR load refused".into()));
        }
        let hash = script_hash(source);
        if !st.forget_loads {
            st.loaded.insert(hash.clone(), source.to_string());
        }
        Ok(hash)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Box<dyn MessageStream>, StoreError> {
        self.check_open()?;
        self.server.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.server.next_sub.fetch_add(1, Ordering::SeqCst);
        self.server.lock().subs.push(Sub {
            id,
            channels: channels.to_vec(),
            tx,
        });
        Ok(Box::new(MemoryStream {
            id,
            rx,
            server: Arc::clone(&self.server),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MemoryStream {
    id: u64,
    rx: mpsc::UnboundedReceiver<Result<Message, StoreError>>,
    server: Arc<MemoryServer>,
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn next_message(&mut self) -> Result<Message, StoreError> {
        self.rx.recv().await.unwrap_or(Err(StoreError::Closed))
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        let id = self.id;
        self.server.lock().subs.retain(|s| s.id != id);
    }
}

/// Supervisor, fake store and manager wired together.
pub struct Harness {
    pub sup: Arc<Supervisor>,
    pub connector: Arc<MemoryConnector>,
    pub scripts: Arc<ScriptRegistry>,
    pub mgr: Arc<ShardManager>,
    pub events: broadcast::Receiver<Event>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let sup = Supervisor::builder(SupervisorConfig::default()).build();
        let events = sup.bus().subscribe();
        let connector = Arc::new(MemoryConnector::default());
        let scripts = Arc::new(ScriptRegistry::new());
        let mgr = ShardManager::builder(Arc::clone(&sup), Arc::clone(&connector) as Arc<dyn Connector>)
            .with_scripts(Arc::clone(&scripts))
            .with_codes(ErrorTable::new().with(7, "NotFound").with(9, "Conflict"))
            .build();
        Self {
            sup,
            connector,
            scripts,
            mgr,
            events,
        }
    }

    /// Events published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }

    /// Waits until the binding for `addr` reaches `state`.
    pub async fn wait_state(&self, addr: &str, state: SubscriptionState) {
        let mgr = Arc::clone(&self.mgr);
        let addr = addr.to_string();
        tokio::time::timeout(Duration::from_secs(2), async move {
            loop {
                let snapshot = mgr.subscriptions().await;
                if snapshot.iter().any(|s| s.addr == addr && s.state == state) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscription never reached the expected state");
    }
}

/// Handler forwarding every message into a channel.
pub fn recording_handler() -> (
    impl Fn(&str, &str) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<(String, String)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |channel: &str, payload: &str| {
        let _ = tx.send((channel.to_string(), payload.to_string()));
    };
    (handler, rx)
}

/// Receives the next recorded message or panics after a second.
pub async fn next_message(rx: &mut mpsc::UnboundedReceiver<(String, String)>) -> (String, String) {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("no message delivered")
        .expect("handler dropped")
}
