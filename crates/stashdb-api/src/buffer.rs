//! WriteBuffer - pending operations not yet committed to the engine
//!
//! Small writes are batched here and answered from here by reads until a
//! flush drains them into one engine transaction. Each key holds at most one
//! pending operation; a later put or delete for the same key replaces the
//! earlier one in place, so draining yields keys in first-insertion order.

use bytes::Bytes;
use stashdb_core::CanonicalKey;
use std::collections::HashMap;

/// A buffered operation for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp {
    /// Store these encoded value bytes
    Put(Bytes),
    /// Treat the key as deleted
    Tombstone,
}

impl PendingOp {
    /// Approximate size of this operation in bytes
    pub fn size(&self) -> usize {
        match self {
            PendingOp::Put(v) => v.len() + 1, // +1 for type tag
            PendingOp::Tombstone => 1,
        }
    }
}

/// Operations drained from the buffer, in insertion order.
///
/// Immutable once drained, so a commit that has to be retried replays
/// exactly the same operations every time.
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<(CanonicalKey, PendingOp)>,
}

impl Batch {
    /// Number of operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterate operations in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalKey, &PendingOp)> {
        self.ops.iter().map(|(k, op)| (k, op))
    }
}

/// The write buffer
#[derive(Debug, Default)]
pub struct WriteBuffer {
    slots: Vec<(CanonicalKey, PendingOp)>,
    index: HashMap<CanonicalKey, usize>,
    size_bytes: u64,
}

impl WriteBuffer {
    /// Creates a new empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a put, replacing any pending operation for the key
    pub fn put(&mut self, key: CanonicalKey, value: Bytes) {
        self.insert(key, PendingOp::Put(value));
    }

    /// Buffer a tombstone, replacing any pending operation for the key
    pub fn delete(&mut self, key: CanonicalKey) {
        self.insert(key, PendingOp::Tombstone);
    }

    fn insert(&mut self, key: CanonicalKey, op: PendingOp) {
        let new_size = (key.len() + op.size()) as u64;
        match self.index.get(&key) {
            Some(&slot) => {
                let (old_key, old_op) = &self.slots[slot];
                self.size_bytes -= (old_key.len() + old_op.size()) as u64;
                self.slots[slot].1 = op;
            }
            None => {
                self.index.insert(key.clone(), self.slots.len());
                self.slots.push((key, op));
            }
        }
        self.size_bytes += new_size;
    }

    /// Pending operation for a key, without consulting the engine
    pub fn lookup(&self, key: &[u8]) -> Option<&PendingOp> {
        self.index.get(key).map(|&slot| &self.slots[slot].1)
    }

    /// Number of keys with a pending operation
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Approximate size of the pending operations in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Remove and return every pending operation, leaving the buffer empty
    pub fn drain(&mut self) -> Batch {
        self.index.clear();
        self.size_bytes = 0;
        Batch {
            ops: std::mem::take(&mut self.slots),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CanonicalKey {
        CanonicalKey::from_bytes(s.as_bytes().to_vec())
    }

    fn value(s: &str) -> Bytes {
        Bytes::from(s.as_bytes().to_vec())
    }

    #[test]
    fn test_buffer_new() {
        let buf = WriteBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.size_bytes(), 0);
    }

    #[test]
    fn test_put_lookup() {
        let mut buf = WriteBuffer::new();
        buf.put(key("a"), value("1"));

        assert_eq!(buf.lookup(b"a"), Some(&PendingOp::Put(value("1"))));
        assert_eq!(buf.lookup(b"b"), None);
    }

    #[test]
    fn test_last_writer_wins() {
        let mut buf = WriteBuffer::new();
        buf.put(key("a"), value("1"));
        buf.delete(key("a"));
        assert_eq!(buf.lookup(b"a"), Some(&PendingOp::Tombstone));

        buf.put(key("a"), value("2"));
        assert_eq!(buf.lookup(b"a"), Some(&PendingOp::Put(value("2"))));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_delete_of_unknown_key_is_buffered() {
        let mut buf = WriteBuffer::new();
        buf.delete(key("ghost"));
        assert_eq!(buf.lookup(b"ghost"), Some(&PendingOp::Tombstone));
    }

    #[test]
    fn test_size_tracking() {
        let mut buf = WriteBuffer::new();
        buf.put(key("k"), value("12345"));
        assert_eq!(buf.size_bytes(), 1 + 6);

        buf.put(key("k"), value("1"));
        assert_eq!(buf.size_bytes(), 1 + 2);

        buf.delete(key("k"));
        assert_eq!(buf.size_bytes(), 1 + 1);
    }

    #[test]
    fn test_drain_insertion_order() {
        let mut buf = WriteBuffer::new();
        buf.put(key("c"), value("3"));
        buf.put(key("a"), value("1"));
        buf.delete(key("b"));
        buf.put(key("c"), value("33"));

        let batch = buf.drain();
        assert!(buf.is_empty());
        assert_eq!(buf.size_bytes(), 0);
        assert_eq!(buf.lookup(b"c"), None);

        let keys: Vec<_> = batch.iter().map(|(k, _)| k.as_bytes().to_vec()).collect();
        assert_eq!(keys, vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]);
        let ops: Vec<_> = batch.iter().map(|(_, op)| op.clone()).collect();
        assert_eq!(ops[0], PendingOp::Put(value("33")));
        assert_eq!(ops[2], PendingOp::Tombstone);
    }

    #[test]
    fn test_batch_replays_identically() {
        let mut buf = WriteBuffer::new();
        buf.put(key("x"), value("1"));
        buf.put(key("y"), value("2"));
        let batch = buf.drain();

        let first: Vec<_> = batch.iter().map(|(k, op)| (k.clone(), op.clone())).collect();
        let second: Vec<_> = batch.iter().map(|(k, op)| (k.clone(), op.clone())).collect();
        assert_eq!(first, second);
        assert_eq!(batch.len(), 2);
    }
}
