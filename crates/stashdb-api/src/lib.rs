//! # StashDB
//!
//! A thread-safe embedded object store. Values of any `serde` type are
//! stored under byte or text keys in a memory-mapped, transactional map.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stashdb::{GetManyOptions, ObjectStore, StoreConfig, TextEncoding};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoreConfig::default()
//!         .with_key_encoding(TextEncoding::Utf8)
//!         .with_batch_size(500);
//!     let store = ObjectStore::open("./objects", config)?;
//!
//!     // Buffered; committed in batches of 500 or on flush/close
//!     store.put("user:1", &vec!["admin", "ops"])?;
//!     store.put(b"raw-key", &42u64)?;
//!
//!     // Reads see buffered writes immediately
//!     let roles: Option<Vec<String>> = store.get("user:1")?;
//!     assert_eq!(roles.unwrap().len(), 2);
//!
//!     // One atomic transaction, growing the map if needed
//!     store.put_many((0..1000u32).map(|i| (format!("n:{i}"), i)))?;
//!
//!     let many = store.get_many::<_, _, u32>(["n:1", "n:2", "zzz"], GetManyOptions::decode_keys())?;
//!     assert_eq!(many.found.len(), 2);
//!
//!     store.close(true)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Behavior
//!
//! - Single-key writes are buffered and flushed once `batch_size` operations
//!   are pending, on [`ObjectStore::flush`], before [`ObjectStore::put_many`],
//!   and on close.
//! - Reads answer from the buffer first. A read that has to consult the
//!   engine flushes the buffer first unless `autoflush_on_read` is off.
//! - A write transaction that overflows the map grows it (doubling, at least
//!   64 MiB per step) and is retried, up to `max_map_size`.
//! - Closing waits for in-flight operations, then flushes; operations started
//!   after close begins fail with [`Error::StoreClosed`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod gate;
pub mod growth;
pub mod logging;
pub mod store;

pub use config::{StoreConfig, DEFAULT_BATCH_SIZE};
pub use growth::{next_map_size, GROWTH_STEP};
pub use store::{GetMany, GetManyOptions, ObjectStore, StoreStats};

pub use stashdb_core::{
    AsRawKey, Bincode, CanonicalKey, EncodingErrors, EngineError, Environment, Error, Json,
    KeyCodec, KeyPolicy, NormalizationForm, OwnedKey, RawKey, Result, Serializer, TextEncoding,
    ValueOrigin,
};
pub use stashdb_engine::{EnvOptions, MapEnv, SyncMode};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
