//! Store configuration

use serde::{Deserialize, Serialize};
use stashdb_core::{Error, KeyPolicy, Result, TextEncoding};
use stashdb_engine::{EnvOptions, SyncMode};

/// Default number of buffered operations that triggers a flush
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Configuration for an [`ObjectStore`](crate::ObjectStore)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Buffered operations that trigger an automatic flush
    pub batch_size: usize,
    /// Whether reads flush the buffer before consulting the engine
    pub autoflush_on_read: bool,
    /// How raw keys are canonicalized
    pub key: KeyPolicy,
    /// Environment options
    pub env: EnvOptions,
    /// Upper bound for automatic map growth; `None` means unbounded
    pub max_map_size: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            autoflush_on_read: true,
            key: KeyPolicy::default(),
            env: EnvOptions::default(),
            max_map_size: None,
        }
    }
}

impl StoreConfig {
    /// Set the flush threshold
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable or disable flushing on reads
    pub fn with_autoflush_on_read(mut self, enabled: bool) -> Self {
        self.autoflush_on_read = enabled;
        self
    }

    /// Set the key policy
    pub fn with_key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key = policy;
        self
    }

    /// Accept text keys in the given encoding
    pub fn with_key_encoding(mut self, encoding: TextEncoding) -> Self {
        self.key.encoding = Some(encoding);
        self
    }

    /// Set the initial map size
    pub fn with_map_size(mut self, map_size: u64) -> Self {
        self.env.map_size = map_size;
        self
    }

    /// Cap automatic map growth
    pub fn with_max_map_size(mut self, max_map_size: u64) -> Self {
        self.max_map_size = Some(max_map_size);
        self
    }

    /// Set the commit sync mode
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.env.sync_mode = sync_mode;
        self
    }

    /// Open read-only
    pub fn readonly(mut self) -> Self {
        self.env.readonly = true;
        self
    }

    /// Replace the environment options
    pub fn with_env(mut self, env: EnvOptions) -> Self {
        self.env = env;
        self
    }

    /// Check the configuration for contradictions
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if let Some(max) = self.max_map_size {
            if max < self.env.map_size {
                return Err(Error::Config(format!(
                    "max_map_size ({}) is smaller than the initial map size ({})",
                    max, self.env.map_size
                )));
            }
        }
        Ok(())
    }
}
