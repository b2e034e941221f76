// Commit log frame format and encoding/decoding
//
// Frame format (binary):
// [length: u64 LE] [type: u8] [payload bytes] [crc32: u32 LE]
//
// Types:
// - SNAPSHOT (1): every live entry; replaces whatever state came before it
// - BATCH (2): the puts and deletes of one write transaction
//
// `length` counts the type byte and the payload. The CRC covers both.

use crate::Tree;
use crc32fast::Hasher;
use stashdb_core::{EngineError, EngineResult};
use std::collections::BTreeMap;

/// Bytes a frame adds around its payload
pub const FRAME_OVERHEAD: u64 = 8 + 1 + 4;

/// Pending changes of a write transaction; `None` deletes the key.
pub(crate) type Changes = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Snapshot = 1,
    Batch = 2,
}

impl TryFrom<u8> for FrameType {
    type Error = EngineError;

    fn try_from(value: u8) -> EngineResult<Self> {
        match value {
            1 => Ok(FrameType::Snapshot),
            2 => Ok(FrameType::Batch),
            _ => Err(EngineError::Corrupted(format!(
                "Unknown frame type: {}",
                value
            ))),
        }
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Snapshot(Vec<(Vec<u8>, Vec<u8>)>),
    Batch(Vec<(Vec<u8>, Option<Vec<u8>>)>),
}

impl Frame {
    /// Decode the frame at the start of `data`, returning it and its length.
    pub fn decode(data: &[u8]) -> EngineResult<(Self, usize)> {
        if (data.len() as u64) < FRAME_OVERHEAD {
            return Err(EngineError::Corrupted("Incomplete frame".to_string()));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&data[..8]);
        let length = u64::from_le_bytes(len_bytes);
        let total = length
            .checked_add(12)
            .filter(|&total| length >= 1 && total <= data.len() as u64)
            .ok_or_else(|| {
                EngineError::Corrupted(format!(
                    "Frame of {} bytes does not fit in {} remaining bytes",
                    length,
                    data.len()
                ))
            })? as usize;

        let content = &data[8..total - 4];
        let crc_bytes = &data[total - 4..total];
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = checksum(content);
        if actual != expected {
            return Err(EngineError::Corrupted(format!(
                "Frame CRC mismatch: expected {}, got {}",
                expected, actual
            )));
        }

        let payload = &content[1..];
        let frame = match FrameType::try_from(content[0])? {
            FrameType::Snapshot => Frame::Snapshot(deserialize(payload)?),
            FrameType::Batch => Frame::Batch(deserialize(payload)?),
        };
        Ok((frame, total))
    }

    /// Apply this frame on top of `tree`
    pub fn apply(self, tree: &mut Tree) {
        match self {
            Frame::Snapshot(entries) => *tree = entries.into_iter().collect(),
            Frame::Batch(changes) => {
                for (key, change) in changes {
                    match change {
                        Some(value) => {
                            tree.insert(key, value);
                        }
                        None => {
                            tree.remove(&key);
                        }
                    }
                }
            }
        }
    }
}

/// Encode the changes of one transaction as a batch frame
pub fn encode_batch(changes: &Changes) -> EngineResult<Vec<u8>> {
    let entries: Vec<(&[u8], Option<&[u8]>)> = changes
        .iter()
        .map(|(key, change)| (key.as_slice(), change.as_deref()))
        .collect();
    encode(FrameType::Batch, &entries)
}

/// Encode the live state `base` + `changes` as a snapshot frame
pub fn encode_snapshot(base: &Tree, changes: &Changes) -> EngineResult<Vec<u8>> {
    let entries: Vec<(&[u8], &[u8])> = base
        .iter()
        .filter(|(key, _)| !changes.contains_key(*key))
        .map(|(key, value)| (key.as_slice(), value.as_slice()))
        .chain(
            changes
                .iter()
                .filter_map(|(key, change)| change.as_deref().map(|value| (key.as_slice(), value))),
        )
        .collect();
    encode(FrameType::Snapshot, &entries)
}

/// Length of the snapshot frame of a state whose payload is `payload_len` bytes
pub fn snapshot_frame_len(payload_len: u64) -> u64 {
    FRAME_OVERHEAD + payload_len
}

/// Rebuild the committed tree from the frames in `log`.
pub fn replay(log: &[u8]) -> EngineResult<Tree> {
    let mut tree = Tree::new();
    let mut pos = 0;
    while pos < log.len() {
        let (frame, used) = Frame::decode(&log[pos..])?;
        frame.apply(&mut tree);
        pos += used;
    }
    Ok(tree)
}

fn encode<T: serde::Serialize>(kind: FrameType, payload: &T) -> EngineResult<Vec<u8>> {
    let payload = bincode::serialize(payload)
        .map_err(|e| EngineError::Serialization(format!("Failed to encode frame: {}", e)))?;

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD as usize + payload.len());
    frame.extend_from_slice(&(1 + payload.len() as u64).to_le_bytes());
    frame.push(kind as u8);
    frame.extend_from_slice(&payload);
    let crc = checksum(&frame[8..]);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

fn deserialize<T: serde::de::DeserializeOwned>(payload: &[u8]) -> EngineResult<T> {
    bincode::deserialize(payload)
        .map_err(|e| EngineError::Corrupted(format!("Failed to decode frame: {}", e)))
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
