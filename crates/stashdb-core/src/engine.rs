//! Storage engine seam.
//!
//! The object store never touches files directly. It drives an ordered,
//! transactional key-value [`Environment`] through these traits: short read
//! transactions that hand out zero-copy views, a single write transaction at
//! a time that is all-or-nothing on commit, and a resizable map whose size
//! bounds how much a write transaction may hold.

use crate::EngineResult;

/// Point-in-time statistics for an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvInfo {
    /// Current map size in bytes
    pub map_size: u64,
    /// Bytes occupied by committed data, including the file header
    pub used_bytes: u64,
    /// Number of committed entries
    pub entries: u64,
}

/// A read-only view of committed data.
pub trait ReadTxn {
    /// Look up a key. The returned slice borrows from the transaction.
    fn get(&self, key: &[u8]) -> EngineResult<Option<&[u8]>>;
}

/// A write transaction. Nothing it does is visible outside until
/// [`WriteTxn::commit`]; dropping it uncommitted aborts it.
pub trait WriteTxn: ReadTxn {
    /// Insert or overwrite a key.
    ///
    /// Fails with [`EngineError::CapacityExceeded`](crate::EngineError::CapacityExceeded)
    /// when the transaction would no longer fit in the map.
    fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()>;

    /// Remove a key. Returns true if a row was removed.
    fn delete(&mut self, key: &[u8]) -> EngineResult<bool>;

    /// Atomically publish every change made in this transaction.
    fn commit(self) -> EngineResult<()>;

    /// Discard every change made in this transaction.
    fn abort(self);
}

/// An open storage environment.
pub trait Environment: Send + Sync {
    /// Read transaction type
    type Ro<'env>: ReadTxn
    where
        Self: 'env;

    /// Write transaction type
    type Rw<'env>: WriteTxn
    where
        Self: 'env;

    /// Begin a read transaction over the latest committed state.
    fn begin_read(&self) -> EngineResult<Self::Ro<'_>>;

    /// Begin the write transaction, waiting for any other writer to finish.
    fn begin_write(&self) -> EngineResult<Self::Rw<'_>>;

    /// Current map size in bytes.
    fn map_size(&self) -> u64;

    /// Change the map size. Must not be called while a write transaction is open.
    fn resize(&self, new_size: u64) -> EngineResult<()>;

    /// Usage statistics.
    fn info(&self) -> EngineResult<EnvInfo>;

    /// Flush committed data to stable storage.
    fn sync(&self) -> EngineResult<()>;

    /// Release the environment. Later transactions fail with `Closed`.
    fn close(&self) -> EngineResult<()>;

    /// Whether the environment rejects writes.
    fn is_readonly(&self) -> bool;
}
