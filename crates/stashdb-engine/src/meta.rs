// Meta page encoding/decoding
//
// The file starts with two meta pages. A commit always writes the page that
// is not current, so a torn meta write leaves the other page, and the commit
// it describes, intact. On open the valid page with the highest txn id wins.
//
// Meta page format (64 bytes, little endian):
// [magic: u32] [version: u16] [flags: u16] [txn_id: u64] [log_start: u64]
// [log_end: u64] [entries: u64] [crc32: u32] [reserved: 20 bytes]
//
// `log_start..log_end` is the committed part of the frame log. An all-zero
// page was never written and stands for the empty map at txn 0.

use crc32fast::Hasher;
use stashdb_core::format_version::{
    magic, map_version, DATA_START, MAP_FORMAT_VERSION, META_PAGES, META_PAGE_LEN,
};
use stashdb_core::{EngineError, EngineResult};

const CRC_OFFSET: usize = 40;

/// One decoded meta page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaPage {
    pub txn_id: u64,
    pub log_start: u64,
    pub log_end: u64,
    pub entries: u64,
}

impl MetaPage {
    /// State of a file nothing was ever committed to
    pub fn empty() -> Self {
        Self {
            txn_id: 0,
            log_start: DATA_START as u64,
            log_end: DATA_START as u64,
            entries: 0,
        }
    }

    /// Byte offset of the page slot this txn id is written to
    pub fn page_offset(&self) -> usize {
        (self.txn_id % META_PAGES as u64) as usize * META_PAGE_LEN
    }

    /// Bytes of log before `log_start` that no committed state refers to
    pub fn front_gap(&self) -> u64 {
        self.log_start - DATA_START as u64
    }

    pub fn encode(&self) -> [u8; META_PAGE_LEN] {
        let mut out = [0u8; META_PAGE_LEN];
        out[0..4].copy_from_slice(&magic::MAP.to_le_bytes());
        out[4..6].copy_from_slice(&MAP_FORMAT_VERSION.to_le_bytes());
        out[8..16].copy_from_slice(&self.txn_id.to_le_bytes());
        out[16..24].copy_from_slice(&self.log_start.to_le_bytes());
        out[24..32].copy_from_slice(&self.log_end.to_le_bytes());
        out[32..40].copy_from_slice(&self.entries.to_le_bytes());
        let crc = checksum(&out[..CRC_OFFSET]);
        out[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decode one page. Returns `None` for an all-zero (never written) page.
    pub fn decode(page: &[u8]) -> EngineResult<Option<Self>> {
        if page.len() < META_PAGE_LEN {
            return Err(EngineError::Corrupted(format!(
                "meta page too small: {} bytes",
                page.len()
            )));
        }
        let page = &page[..META_PAGE_LEN];
        if page.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        let found_magic = read_u32(page, 0);
        if found_magic != magic::MAP {
            return Err(EngineError::Corrupted(format!(
                "bad magic: expected {:#010x}, got {:#010x}",
                magic::MAP,
                found_magic
            )));
        }

        let expected = read_u32(page, CRC_OFFSET);
        let actual = checksum(&page[..CRC_OFFSET]);
        if expected != actual {
            return Err(EngineError::Corrupted(format!(
                "meta CRC mismatch: expected {}, got {}",
                expected, actual
            )));
        }

        let version = u16::from_le_bytes([page[4], page[5]]);
        if !map_version().can_read(version) {
            return Err(EngineError::Corrupted(format!(
                "unsupported format version {}",
                version
            )));
        }

        let meta = Self {
            txn_id: read_u64(page, 8),
            log_start: read_u64(page, 16),
            log_end: read_u64(page, 24),
            entries: read_u64(page, 32),
        };
        if meta.log_start < DATA_START as u64 || meta.log_end < meta.log_start {
            return Err(EngineError::Corrupted(format!(
                "meta page {} has invalid log bounds {}..{}",
                meta.txn_id, meta.log_start, meta.log_end
            )));
        }
        Ok(Some(meta))
    }

    /// Pick the newest valid meta page of a file image.
    ///
    /// Fails only if no page is usable.
    pub fn select(data: &[u8]) -> EngineResult<Self> {
        if data.len() < DATA_START {
            return Err(EngineError::Corrupted(format!(
                "file too small for meta pages: {} bytes",
                data.len()
            )));
        }

        let mut newest: Option<Self> = None;
        let mut first_error = None;
        for slot in 0..META_PAGES {
            let offset = slot * META_PAGE_LEN;
            let candidate = match Self::decode(&data[offset..offset + META_PAGE_LEN]) {
                Ok(Some(meta)) if meta.log_end > data.len() as u64 => {
                    first_error.get_or_insert(EngineError::Corrupted(format!(
                        "meta page {} points past end of file ({} > {})",
                        meta.txn_id,
                        meta.log_end,
                        data.len()
                    )));
                    continue;
                }
                Ok(Some(meta)) => meta,
                Ok(None) => Self::empty(),
                Err(err) => {
                    first_error.get_or_insert(err);
                    continue;
                }
            };
            if newest.map_or(true, |n| candidate.txn_id > n.txn_id) {
                newest = Some(candidate);
            }
        }

        match (newest, first_error) {
            (Some(meta), _) => Ok(meta),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(Self::empty()),
        }
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}
