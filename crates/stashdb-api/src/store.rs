//! The object store facade
//!
//! [`ObjectStore`] maps keys to serialized values on top of a transactional
//! [`Environment`]. Single-key writes are staged in a [`WriteBuffer`] and
//! committed in batches; reads consult the buffer first, so callers always
//! observe their own writes whether or not they have been flushed yet.

use crate::buffer::{PendingOp, WriteBuffer};
use crate::config::StoreConfig;
use crate::gate::{Gate, Phase, WriteStanding};
use crate::growth::Growth;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use stashdb_core::{
    display_key, display_raw_key, AsRawKey, Bincode, CanonicalKey, Environment, Error, KeyCodec,
    OwnedKey, RawKey, ReadTxn, Result, Serializer, ValueOrigin, WriteTxn,
};
use stashdb_engine::MapEnv;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Options for [`ObjectStore::get_many`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetManyOptions {
    /// Return found keys as text decoded with the key encoding
    pub decode_keys: bool,
    /// Return byte keys in `not_found` as text; defaults to `decode_keys`
    pub decode_not_found: Option<bool>,
}

impl GetManyOptions {
    /// Decode found keys (and, unless overridden, missing byte keys) to text
    pub fn decode_keys() -> Self {
        Self {
            decode_keys: true,
            decode_not_found: None,
        }
    }

    /// Override decoding of missing keys
    pub fn with_decode_not_found(mut self, decode: bool) -> Self {
        self.decode_not_found = Some(decode);
        self
    }
}

/// Result of [`ObjectStore::get_many`]
#[derive(Debug, Clone, PartialEq)]
pub struct GetMany<V> {
    /// Values for keys that resolved
    pub found: HashMap<OwnedKey, V>,
    /// Keys that did not resolve, in input order
    pub not_found: Vec<OwnedKey>,
}

/// Store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Keys with a pending operation in the write buffer
    pub buffered_ops: usize,
    /// Approximate size of the write buffer
    pub buffered_bytes: u64,
    /// Buffer flushes committed so far
    pub flushes: u64,
    /// Times the map has been grown
    pub growth_events: u64,
    /// Current map size in bytes
    pub map_size: u64,
    /// Bytes used by committed data
    pub used_bytes: u64,
    /// Committed entries
    pub stored_entries: u64,
}

/// A thread-safe, buffered object store.
///
/// Share it across threads with an `Arc`. Dropping the store closes it,
/// flushing pending writes on a best-effort basis; call
/// [`close`](Self::close) with `strict` set to observe a failing final flush.
///
/// # Examples
///
/// ```rust,no_run
/// use stashdb::{ObjectStore, StoreConfig, TextEncoding};
///
/// let store = ObjectStore::open(
///     "./objects",
///     StoreConfig::default().with_key_encoding(TextEncoding::Utf8),
/// )?;
/// store.put("user:1", &("Alice".to_string(), 30u32))?;
/// let user: Option<(String, u32)> = store.get("user:1")?;
/// assert_eq!(user, Some(("Alice".to_string(), 30)));
/// store.close(true)?;
/// # Ok::<(), stashdb::Error>(())
/// ```
pub struct ObjectStore<E: Environment = MapEnv, S: Serializer = Bincode> {
    env: E,
    serializer: S,
    keys: KeyCodec,
    gate: Gate,
    buffer: RwLock<WriteBuffer>,
    growth: Growth,
    batch_size: usize,
    autoflush_on_read: bool,
    readonly: bool,
    flushes: AtomicU64,
}

impl ObjectStore {
    /// Opens (or creates) a store at `path` with the default serializer.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        Self::open_with_serializer(path, config, Bincode)
    }
}

impl<S: Serializer> ObjectStore<MapEnv, S> {
    /// Opens (or creates) a store at `path` with a custom value serializer.
    pub fn open_with_serializer(
        path: impl AsRef<Path>,
        config: StoreConfig,
        serializer: S,
    ) -> Result<Self> {
        config.validate()?;
        let env = MapEnv::open(path, config.env.clone())?;
        Self::with_env(env, serializer, &config)
    }
}

impl<E: Environment, S: Serializer> ObjectStore<E, S> {
    /// Builds a store over an already opened environment.
    ///
    /// `config.env` is ignored; everything else applies.
    pub fn with_env(env: E, serializer: S, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let readonly = env.is_readonly();
        info!(
            batch_size = config.batch_size,
            autoflush_on_read = config.autoflush_on_read,
            readonly,
            map_size = env.map_size(),
            max_map_size = ?config.max_map_size,
            "Opened object store"
        );
        Ok(Self {
            env,
            serializer,
            keys: KeyCodec::new(config.key.clone()),
            gate: Gate::new(),
            buffer: RwLock::new(WriteBuffer::new()),
            growth: Growth::new(config.max_map_size),
            batch_size: config.batch_size,
            autoflush_on_read: config.autoflush_on_read,
            readonly,
            flushes: AtomicU64::new(0),
        })
    }

    /// The underlying environment
    pub fn env(&self) -> &E {
        &self.env
    }

    /// The key codec in use
    pub fn key_codec(&self) -> &KeyCodec {
        &self.keys
    }

    /// Flush threshold
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns true if the store rejects writes
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Returns true once closing has begun
    pub fn is_closed(&self) -> bool {
        self.gate.phase() != Phase::Open
    }

    // ---- writes ----------------------------------------------------------

    /// Buffers `key -> value`, flushing once the buffer reaches the batch size.
    pub fn put<K, V>(&self, key: &K, value: &V) -> Result<()>
    where
        K: AsRawKey + ?Sized,
        V: Serialize + ?Sized,
    {
        let key = self.canonical(key)?;
        let value = self.encode(value)?;
        let standing = self.gate.acquire_write()?;
        self.ensure_writable()?;
        self.stage(&standing, |buffer| buffer.put(key, value))
    }

    /// Buffers a deletion. Deleting a key that does not exist is not an error.
    pub fn delete<K: AsRawKey + ?Sized>(&self, key: &K) -> Result<()> {
        let key = self.canonical(key)?;
        let standing = self.gate.acquire_write()?;
        self.ensure_writable()?;
        self.stage(&standing, |buffer| buffer.delete(key))
    }

    /// Deletes a key that must exist, failing with [`Error::KeyNotFound`]
    /// otherwise. The containment check does not flush.
    pub fn remove<K: AsRawKey + ?Sized>(&self, key: &K) -> Result<()> {
        let canonical = self.canonical(key)?;
        let standing = self.gate.acquire_write()?;
        self.ensure_writable()?;
        let present = {
            let buffer = self.buffer.read();
            self.is_present(&buffer, &canonical)?
        };
        if !present {
            return Err(Error::KeyNotFound(display_raw_key(key.as_raw_key())));
        }
        self.stage(&standing, |buffer| buffer.delete(canonical))
    }

    /// Writes every pair in one atomic transaction, bypassing the buffer.
    ///
    /// Pending buffered operations are flushed first so the batch lands on
    /// top of them. Keys and values are all encoded before anything is
    /// written; an encoding failure leaves the store untouched.
    pub fn put_many<I, K, V>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRawKey,
        V: Serialize,
    {
        let batch = items
            .into_iter()
            .map(|(key, value)| -> Result<(CanonicalKey, Bytes)> {
                Ok((self.canonical(&key)?, self.encode(&value)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let standing = self.gate.acquire_write()?;
        self.ensure_writable()?;
        self.flush_locked(&standing)?;
        if batch.is_empty() {
            return Ok(());
        }

        self.growth.run(&self.env, || {
            let mut txn = self.env.begin_write()?;
            for (key, value) in &batch {
                txn.put(key.as_bytes(), value)?;
            }
            txn.commit()
        })?;
        debug!(items = batch.len(), "Committed put_many batch");
        Ok(())
    }

    /// Commits every buffered operation.
    pub fn flush(&self) -> Result<()> {
        let standing = self.gate.acquire_write()?;
        self.ensure_writable()?;
        self.flush_locked(&standing)
    }

    // ---- reads -----------------------------------------------------------

    /// Looks up a key, buffer first.
    ///
    /// Returns `None` for a missing key and for a key with a pending delete.
    pub fn get<K, V>(&self, key: &K) -> Result<Option<V>>
    where
        K: AsRawKey + ?Sized,
        V: DeserializeOwned,
    {
        let key = self.canonical(key)?;
        self.read_view(
            self.autoflush_on_read,
            |buffer| buffer.lookup(key.as_bytes()).is_none(),
            |buffer| self.resolve(buffer, &key),
        )
    }

    /// Like [`get`](Self::get), substituting `default` for a missing key.
    pub fn get_or<K, V>(&self, key: &K, default: V) -> Result<V>
    where
        K: AsRawKey + ?Sized,
        V: DeserializeOwned,
    {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Like [`get`](Self::get), failing with [`Error::KeyNotFound`] for a
    /// missing key.
    pub fn get_required<K, V>(&self, key: &K) -> Result<V>
    where
        K: AsRawKey + ?Sized,
        V: DeserializeOwned,
    {
        self.get(key)?
            .ok_or_else(|| Error::KeyNotFound(display_raw_key(key.as_raw_key())))
    }

    /// Returns true if the key resolves to a value.
    ///
    /// `flush` overrides the configured flush-on-read behavior for this call.
    pub fn exists<K: AsRawKey + ?Sized>(&self, key: &K, flush: Option<bool>) -> Result<bool> {
        let key = self.canonical(key)?;
        self.read_view(
            flush.unwrap_or(self.autoflush_on_read),
            |buffer| buffer.lookup(key.as_bytes()).is_none(),
            |buffer| self.is_present(buffer, &key),
        )
    }

    /// Containment check that never flushes.
    pub fn contains<K: AsRawKey + ?Sized>(&self, key: &K) -> Result<bool> {
        self.exists(key, Some(false))
    }

    /// Looks up many keys against one consistent view.
    ///
    /// Missing keys keep their input form (bytes or text) in `not_found`
    /// unless byte keys are asked to be decoded.
    pub fn get_many<I, K, V>(&self, keys: I, options: GetManyOptions) -> Result<GetMany<V>>
    where
        I: IntoIterator<Item = K>,
        K: AsRawKey,
        V: DeserializeOwned,
    {
        let decode_not_found = options.decode_not_found.unwrap_or(options.decode_keys);
        if (options.decode_keys || decode_not_found) && !self.keys.decodes_text() {
            return Err(Error::Config(
                "key decoding requested but no key encoding is configured".to_string(),
            ));
        }

        let inputs: Vec<K> = keys.into_iter().collect();
        let canonical = inputs
            .iter()
            .map(|key| self.canonical(key))
            .collect::<Result<Vec<_>>>()?;

        let resolved: HashMap<CanonicalKey, V> = self.read_view(
            self.autoflush_on_read,
            |buffer| canonical.iter().any(|k| buffer.lookup(k.as_bytes()).is_none()),
            |buffer| self.resolve_many(buffer, &canonical),
        )?;

        let mut not_found = Vec::new();
        for (input, key) in inputs.iter().zip(&canonical) {
            if resolved.contains_key(key) {
                continue;
            }
            let missing = match input.as_raw_key() {
                RawKey::Bytes(bytes) if decode_not_found => {
                    OwnedKey::Text(self.keys.decanonicalize(bytes)?)
                }
                raw => raw.to_owned_key(),
            };
            not_found.push(missing);
        }

        let mut found = HashMap::with_capacity(resolved.len());
        for (key, value) in resolved {
            let out = if options.decode_keys {
                OwnedKey::Text(self.keys.decanonicalize(key.as_bytes())?)
            } else {
                OwnedKey::Bytes(key.as_bytes().to_vec())
            };
            found.insert(out, value);
        }

        Ok(GetMany { found, not_found })
    }

    /// Current statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let _standing = self.gate.acquire_read()?;
        let info = self.env.info()?;
        let buffer = self.buffer.read();
        Ok(StoreStats {
            buffered_ops: buffer.len(),
            buffered_bytes: buffer.size_bytes(),
            flushes: self.flushes.load(Ordering::Relaxed),
            growth_events: self.growth.events(),
            map_size: info.map_size,
            used_bytes: info.used_bytes,
            stored_entries: info.entries,
        })
    }

    // ---- lifecycle -------------------------------------------------------

    /// Closes the store.
    ///
    /// New operations are rejected immediately; the close waits for
    /// operations already in progress, flushes the buffer and releases the
    /// environment. A failing final flush is logged and, with `strict`,
    /// returned as [`Error::FinalFlush`] after the environment is released.
    /// Closing an already closed store does nothing; a close racing another
    /// close returns once the first one finishes.
    pub fn close(&self, strict: bool) -> Result<()> {
        if !self.gate.begin_close() {
            self.gate.await_closed();
            return Ok(());
        }
        let Some(standing) = self.gate.await_quiescent() else {
            return Ok(());
        };

        let flushed = if self.readonly {
            Ok(())
        } else {
            self.flush_locked(&standing)
        };
        if let Err(err) = &flushed {
            error!(error = %err, "Final flush failed during close");
        }
        if let Err(err) = self.env.sync() {
            warn!(error = %err, "Environment sync failed during close");
        }
        let released = self.env.close();
        drop(standing);
        info!("Closed object store");

        released?;
        match flushed {
            Err(err) if strict => Err(Error::FinalFlush(Box::new(err))),
            _ => Ok(()),
        }
    }

    // ---- internals -------------------------------------------------------

    fn canonical<K: AsRawKey + ?Sized>(&self, key: &K) -> Result<CanonicalKey> {
        self.keys.canonicalize(key.as_raw_key())
    }

    fn encode<V: Serialize + ?Sized>(&self, value: &V) -> Result<Bytes> {
        self.serializer
            .encode(value)
            .map(Bytes::from)
            .map_err(|e| Error::Encode(e.0))
    }

    fn decode<V: DeserializeOwned>(
        &self,
        key: &CanonicalKey,
        bytes: &[u8],
        origin: ValueOrigin,
    ) -> Result<V> {
        self.serializer.decode(bytes).map_err(|e| Error::Decode {
            key: display_key(key.as_bytes()),
            origin,
            message: e.0,
        })
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Apply `op` to the buffer and flush if it reached the batch size.
    fn stage(
        &self,
        standing: &WriteStanding<'_>,
        op: impl FnOnce(&mut WriteBuffer),
    ) -> Result<()> {
        let full = {
            let mut buffer = self.buffer.write();
            op(&mut buffer);
            buffer.len() >= self.batch_size
        };
        if full {
            self.flush_locked(standing)?;
        }
        Ok(())
    }

    /// Drain the buffer into one engine transaction.
    ///
    /// Drained operations are not restored if the commit fails.
    fn flush_locked(&self, _standing: &WriteStanding<'_>) -> Result<()> {
        let batch = self.buffer.write().drain();
        if batch.is_empty() {
            return Ok(());
        }

        let result = self.growth.run(&self.env, || {
            let mut txn = self.env.begin_write()?;
            for (key, op) in batch.iter() {
                match op {
                    PendingOp::Put(value) => txn.put(key.as_bytes(), value)?,
                    PendingOp::Tombstone => {
                        txn.delete(key.as_bytes())?;
                    }
                }
            }
            txn.commit()
        });
        if let Err(err) = &result {
            warn!(ops = batch.len(), error = %err, "Flush failed, buffered operations dropped");
            return result;
        }

        self.flushes.fetch_add(1, Ordering::Relaxed);
        debug!(ops = batch.len(), "Flushed write buffer");
        Ok(())
    }

    /// Run `body` against a consistent view of buffer and engine.
    ///
    /// With `flush` set, a non-empty buffer is flushed first unless
    /// `needs_engine` says the buffer alone answers the query. Flushing
    /// needs exclusive standing, so the shared standing is given up first
    /// and the query is answered under the exclusive one.
    fn read_view<R>(
        &self,
        flush: bool,
        needs_engine: impl Fn(&WriteBuffer) -> bool,
        body: impl FnOnce(&WriteBuffer) -> Result<R>,
    ) -> Result<R> {
        let shared = self.gate.acquire_read()?;
        let must_flush = flush && {
            let buffer = self.buffer.read();
            !buffer.is_empty() && needs_engine(&buffer)
        };
        if !must_flush {
            let buffer = self.buffer.read();
            let result = body(&buffer);
            drop(buffer);
            drop(shared);
            return result;
        }

        drop(shared);
        let exclusive = self.gate.acquire_write()?;
        self.flush_locked(&exclusive)?;
        let buffer = self.buffer.read();
        body(&buffer)
    }

    fn resolve<V: DeserializeOwned>(
        &self,
        buffer: &WriteBuffer,
        key: &CanonicalKey,
    ) -> Result<Option<V>> {
        match buffer.lookup(key.as_bytes()) {
            Some(PendingOp::Put(bytes)) => self.decode(key, bytes, ValueOrigin::Buffered).map(Some),
            Some(PendingOp::Tombstone) => Ok(None),
            None => {
                let txn = self.env.begin_read()?;
                let value = match txn.get(key.as_bytes())? {
                    Some(bytes) => Some(self.decode(key, bytes, ValueOrigin::Stored)?),
                    None => None,
                };
                Ok(value)
            }
        }
    }

    fn resolve_many<V: DeserializeOwned>(
        &self,
        buffer: &WriteBuffer,
        keys: &[CanonicalKey],
    ) -> Result<HashMap<CanonicalKey, V>> {
        let mut found = HashMap::new();
        let mut from_engine = Vec::new();
        let mut seen = HashSet::new();

        for key in keys {
            if !seen.insert(key) {
                continue;
            }
            match buffer.lookup(key.as_bytes()) {
                Some(PendingOp::Put(bytes)) => {
                    let value = self.decode(key, bytes, ValueOrigin::Buffered)?;
                    found.insert(key.clone(), value);
                }
                Some(PendingOp::Tombstone) => {}
                None => from_engine.push(key),
            }
        }

        if !from_engine.is_empty() {
            let txn = self.env.begin_read()?;
            for key in from_engine {
                if let Some(bytes) = txn.get(key.as_bytes())? {
                    let value = self.decode(key, bytes, ValueOrigin::Stored)?;
                    found.insert(key.clone(), value);
                }
            }
        }
        Ok(found)
    }

    fn is_present(&self, buffer: &WriteBuffer, key: &CanonicalKey) -> Result<bool> {
        match buffer.lookup(key.as_bytes()) {
            Some(PendingOp::Put(_)) => Ok(true),
            Some(PendingOp::Tombstone) => Ok(false),
            None => {
                let txn = self.env.begin_read()?;
                let present = txn.get(key.as_bytes())?.is_some();
                Ok(present)
            }
        }
    }
}

impl<E: Environment, S: Serializer> Drop for ObjectStore<E, S> {
    fn drop(&mut self) {
        if self.gate.phase() != Phase::Open {
            return;
        }
        if let Err(err) = self.close(false) {
            warn!(error = %err, "Failed to close object store on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_core::TextEncoding;
    use tempfile::TempDir;

    fn open(config: StoreConfig) -> (TempDir, ObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path(), config).unwrap();
        (dir, store)
    }

    fn text_config() -> StoreConfig {
        StoreConfig::default()
            .with_key_encoding(TextEncoding::Utf8)
            .with_map_size(1 << 20)
    }

    #[test]
    fn test_put_is_buffered() {
        let (_dir, store) = open(text_config());
        store.put("a", &1u32).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.buffered_ops, 1);
        assert_eq!(stats.stored_entries, 0);
        assert_eq!(stats.flushes, 0);
    }

    #[test]
    fn test_get_answers_from_buffer_without_flushing() {
        let (_dir, store) = open(text_config());
        store.put("a", &1u32).unwrap();

        let value: Option<u32> = store.get("a").unwrap();
        assert_eq!(value, Some(1));
        assert_eq!(store.stats().unwrap().buffered_ops, 1);
    }

    #[test]
    fn test_get_of_unbuffered_key_flushes() {
        let (_dir, store) = open(text_config());
        store.put("a", &1u32).unwrap();

        let value: Option<u32> = store.get("b").unwrap();
        assert_eq!(value, None);
        let stats = store.stats().unwrap();
        assert_eq!(stats.buffered_ops, 0);
        assert_eq!(stats.stored_entries, 1);
    }

    #[test]
    fn test_batch_size_triggers_flush() {
        let (_dir, store) = open(text_config().with_batch_size(3));
        store.put("a", &1u32).unwrap();
        store.put("b", &2u32).unwrap();
        assert_eq!(store.stats().unwrap().flushes, 0);

        store.delete("c").unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.buffered_ops, 0);
        assert_eq!(stats.stored_entries, 2);
    }

    #[test]
    fn test_decode_error_names_origin() {
        let (_dir, store) = open(text_config());
        store.put("n", &"not a number").unwrap();

        match store.get::<_, Vec<u64>>("n") {
            Err(Error::Decode { key, origin, .. }) => {
                assert_eq!(key, "'n'");
                assert_eq!(origin, ValueOrigin::Buffered);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        store.flush().unwrap();
        assert!(matches!(
            store.get::<_, Vec<u64>>("n"),
            Err(Error::Decode {
                origin: ValueOrigin::Stored,
                ..
            })
        ));
    }

    #[test]
    fn test_text_key_without_encoding_rejected() {
        let (_dir, store) = open(StoreConfig::default().with_map_size(1 << 20));
        assert!(matches!(store.put("a", &1u8), Err(Error::KeyEncode(_))));
        store.put(b"a", &1u8).unwrap();
    }

    #[test]
    fn test_drop_flushes() {
        let dir = TempDir::new().unwrap();
        {
            let store = ObjectStore::open(dir.path(), text_config()).unwrap();
            store.put("kept", &"yes").unwrap();
        }
        let store = ObjectStore::open(dir.path(), text_config()).unwrap();
        let value: Option<String> = store.get("kept").unwrap();
        assert_eq!(value.as_deref(), Some("yes"));
    }
}
