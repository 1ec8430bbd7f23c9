//! # Script registry: source text and cached store hashes.
//!
//! Scripts are registered once (usually at startup) and addressed by a
//! [`CommandId`]. The store-assigned hash is cached per command and refreshed
//! whenever the store reports the script unknown.
//!
//! ## Rules
//! - Ids come from an atomic counter starting at 1; they are never reused and never zero.
//! - The registry is append-only.
//! - The hash cache is shared mutable state behind a read/write lock; the lock
//!   is never held across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Process-local script id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(NonZeroU64);

impl CommandId {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Entry {
    commit: Arc<str>,
    source: Arc<str>,
    hash: Option<Arc<str>>,
}

/// Snapshot of one registered script.
#[derive(Clone, Debug)]
pub struct ResolvedScript {
    pub id: CommandId,
    /// Commit/version label used in diagnostics.
    pub commit: Arc<str>,
    pub source: Arc<str>,
    /// Store-assigned hash, absent until the script has been loaded once.
    pub hash: Option<Arc<str>>,
}

/// Registry of scripts executed through shards.
#[derive(Default)]
pub struct ScriptRegistry {
    last_id: AtomicU64,
    entries: RwLock<HashMap<CommandId, Entry>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a script and returns its id. The cached hash starts absent.
    pub fn register(&self, commit: impl Into<Arc<str>>, source: impl Into<Arc<str>>) -> CommandId {
        let prev = self.last_id.fetch_add(1, Ordering::Relaxed);
        let id = CommandId(NonZeroU64::MIN.saturating_add(prev));

        self.entries.write().unwrap_or_else(|e| e.into_inner()).insert(
            id,
            Entry {
                commit: commit.into(),
                source: source.into(),
                hash: None,
            },
        );
        id
    }

    /// Looks up a script; `None` means the id was never registered.
    pub fn resolve(&self, id: CommandId) -> Option<ResolvedScript> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&id).map(|e| ResolvedScript {
            id,
            commit: Arc::clone(&e.commit),
            source: Arc::clone(&e.source),
            hash: e.hash.clone(),
        })
    }

    /// Stores the hash returned by a successful load.
    pub fn update_cached_hash(&self, id: CommandId, hash: impl Into<Arc<str>>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(&id) {
            entry.hash = Some(hash.into());
        }
    }

    /// Forgets the cached hash so the next execution loads the source first.
    pub fn clear_cached_hash(&self, id: CommandId) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(&id) {
            entry.hash = None;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn ids_start_at_one_and_increase() {
        let reg = ScriptRegistry::new();
        let a = reg.register("v1", "return 1");
        let b = reg.register("v1", "return 2");
        let c = reg.register("v2", "return 3");

        assert_eq!(a.get(), 1);
        assert!(a < b && b < c);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn concurrent_registration_yields_unique_nonzero_ids() {
        let reg = Arc::new(ScriptRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    (0..100)
                        .map(|i| reg.register(format!("t{t}"), format!("return {i}")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            let ids = h.join().unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]), "per-thread order broken");
            for id in ids {
                assert_ne!(id.get(), 0);
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 800);
        assert_eq!(seen.iter().max().map(|id| id.get()), Some(800));
    }

    #[test]
    fn resolve_returns_source_label_and_hash() {
        let reg = ScriptRegistry::new();
        let id = reg.register("abc123", "return redis.call('GET', KEYS[1])");

        let script = reg.resolve(id).unwrap();
        assert_eq!(&*script.commit, "abc123");
        assert_eq!(&*script.source, "return redis.call('GET', KEYS[1])");
        assert!(script.hash.is_none());

        reg.update_cached_hash(id, "deadbeef");
        assert_eq!(reg.resolve(id).unwrap().hash.as_deref(), Some("deadbeef"));

        reg.clear_cached_hash(id);
        assert!(reg.resolve(id).unwrap().hash.is_none());
    }

    #[test]
    fn unknown_id_is_not_found() {
        let reg = ScriptRegistry::new();
        let other = ScriptRegistry::new();
        let foreign = other.register("x", "return 0");
        other.register("y", "return 0");
        let missing = other.register("z", "return 0");

        reg.register("only", "return 1");
        assert!(reg.resolve(missing).is_none());
        assert!(reg.resolve(foreign).is_some());
    }
}
