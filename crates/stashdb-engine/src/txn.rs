//! Read and write transactions over a [`MapEnv`](crate::MapEnv).
//!
//! A read transaction pins the committed snapshot it started from, so values
//! it hands out stay valid for its whole lifetime no matter what commits
//! afterwards. The write transaction keeps an overlay of changes on top of
//! its base snapshot; commit persists only that overlay and publishes it in
//! one step.

use crate::frame::{snapshot_frame_len, Changes};
use crate::{MapEnv, Tree};
use parking_lot::MutexGuard;
use stashdb_core::format_version::DATA_START;
use stashdb_core::{EngineError, EngineResult, ReadTxn, WriteTxn};
use std::sync::Arc;

/// Encoded size of one entry in a snapshot: two u64 length prefixes plus bytes.
pub(crate) fn entry_cost(key: &[u8], value: &[u8]) -> u64 {
    16 + key.len() as u64 + value.len() as u64
}

/// Encoded size of an empty snapshot payload: the u64 length prefix.
pub(crate) const EMPTY_PAYLOAD_LEN: u64 = 8;

/// Read transaction over a committed snapshot.
pub struct MapReadTxn {
    pub(crate) snapshot: Arc<Tree>,
}

impl ReadTxn for MapReadTxn {
    fn get(&self, key: &[u8]) -> EngineResult<Option<&[u8]>> {
        Ok(self.snapshot.get(key).map(Vec::as_slice))
    }
}

impl MapReadTxn {
    /// Number of entries visible to this transaction
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    /// Returns true if no entries are visible
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// Iterate visible entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.snapshot
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }
}

/// The single write transaction of an environment.
pub struct MapWriteTxn<'env> {
    pub(crate) env: &'env MapEnv,
    pub(crate) _writer: MutexGuard<'env, ()>,
    pub(crate) base: Arc<Tree>,
    /// `None` marks a deletion of a key present in `base`
    pub(crate) changes: Changes,
    /// Snapshot payload size of the merged view
    pub(crate) payload_len: u64,
}

impl MapWriteTxn<'_> {
    fn current(&self, key: &[u8]) -> Option<&[u8]> {
        match self.changes.get(key) {
            Some(change) => change.as_deref(),
            None => self.base.get(key).map(Vec::as_slice),
        }
    }

    /// The merged view must at least fit the map as a single snapshot.
    fn check_fits(&self, payload_len: u64) -> EngineResult<()> {
        let required = DATA_START as u64 + snapshot_frame_len(payload_len);
        let map_size = self.env.map_size_now();
        if required > map_size {
            return Err(EngineError::CapacityExceeded { required, map_size });
        }
        Ok(())
    }
}

impl ReadTxn for MapWriteTxn<'_> {
    fn get(&self, key: &[u8]) -> EngineResult<Option<&[u8]>> {
        Ok(self.current(key))
    }
}

impl WriteTxn for MapWriteTxn<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let old = self.current(key).map(|v| entry_cost(key, v)).unwrap_or(0);
        let next = self.payload_len - old + entry_cost(key, value);
        self.check_fits(next)?;

        self.changes.insert(key.to_vec(), Some(value.to_vec()));
        self.payload_len = next;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<bool> {
        let Some(old) = self.current(key).map(|v| entry_cost(key, v)) else {
            return Ok(false);
        };
        if self.base.contains_key(key) {
            self.changes.insert(key.to_vec(), None);
        } else {
            self.changes.remove(key);
        }
        self.payload_len -= old;
        Ok(true)
    }

    fn commit(self) -> EngineResult<()> {
        if self.changes.is_empty() {
            return Ok(());
        }
        self.check_fits(self.payload_len)?;

        let MapWriteTxn {
            env,
            _writer,
            base,
            changes,
            payload_len,
        } = self;
        env.publish(base, changes, payload_len)
    }

    fn abort(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_cost_matches_bincode() {
        let mut tree = Tree::new();
        tree.insert(b"alpha".to_vec(), b"one".to_vec());
        tree.insert(b"beta".to_vec(), vec![0u8; 300]);

        let expected: u64 = EMPTY_PAYLOAD_LEN
            + tree
                .iter()
                .map(|(k, v)| entry_cost(k, v))
                .sum::<u64>();
        let encoded = bincode::serialize(&tree).unwrap();
        assert_eq!(encoded.len() as u64, expected);
    }

    #[test]
    fn test_empty_tree_encoding() {
        let encoded = bincode::serialize(&Tree::new()).unwrap();
        assert_eq!(encoded.len() as u64, EMPTY_PAYLOAD_LEN);
    }
}
