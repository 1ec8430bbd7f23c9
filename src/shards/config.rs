//! # Per-shard connection settings.
//!
//! Exactly three options are recognised: address, credential and pool size.
//!
//! ## Sentinel values
//! - `password = ""` → no authentication
//! - `pool_size = 0` → 1 connection

/// Connection settings of one shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardConfig {
    /// Store address as `host:port`.
    pub addr: String,
    /// Authentication credential; empty for none.
    pub password: String,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
}

impl ShardConfig {
    /// Config for `addr` with no credential and the default pool size.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Returns the credential, or `None` when empty.
    pub fn password(&self) -> Option<&str> {
        (!self.password.is_empty()).then_some(self.password.as_str())
    }

    /// Returns the pool size, never less than 1.
    #[inline]
    pub fn pool_size_clamped(&self) -> usize {
        self.pool_size.max(1)
    }
}

impl Default for ShardConfig {
    /// Local store, no credential, pool of 10.
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            password: String::new(),
            pool_size: 10,
        }
    }
}
