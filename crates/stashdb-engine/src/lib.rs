//! # StashDB Engine
//!
//! Memory-mapped, transactional, ordered key-value environment for StashDB.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of StashDB.**
//!
//! Users should depend on the main `stashdb` crate instead, which provides
//! the stable public API. This crate's API may change without notice
//! between minor versions.
//!
//! ---
//!
//! The environment keeps its data in a single file of exactly `map_size`
//! bytes, mapped into memory with `memmap2`:
//!
//! ```text
//! +--------+--------+---------------------------------------+-------------+
//! | meta 0 | meta 1 | frame log: SNAPSHOT, BATCH, BATCH ... | free / dead |
//! +--------+--------+---------------------------------------+-------------+
//!                   |<-- log_start               log_end -->|
//! ```
//!
//! - **Reads** pin an immutable snapshot of the committed map.
//! - **Writes** go through one write transaction at a time. A commit appends
//!   one batch frame holding only its changes, flushes it, then writes the
//!   meta page that is not current. Live frames are never overwritten, so a
//!   crash at any point reopens at the last fully written meta page.
//! - **Compaction**: when the log runs out of room, the commit writes a
//!   snapshot frame of the whole map instead, into dead space before the
//!   log or after it, and the log restarts there.
//! - **Capacity**: a write transaction whose state cannot be placed in the
//!   map fails with `CapacityExceeded`; the caller may `resize` the map and
//!   retry.

use memmap2::{Mmap, MmapMut};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use stashdb_core::format_version::{DATA_START, META_PAGE_LEN};
use stashdb_core::{EngineError, EngineResult, EnvInfo, Environment};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub mod frame;
pub mod meta;
pub mod txn;

pub use frame::Frame;
pub use meta::MetaPage;
pub use txn::{MapReadTxn, MapWriteTxn};

use frame::{snapshot_frame_len, Changes};
use txn::{entry_cost, EMPTY_PAYLOAD_LEN};

/// Committed entries in key order.
pub(crate) type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

/// Data file name inside the environment directory
pub const DATA_FILE: &str = "data.sdb";

/// Default map size (10MB)
pub const DEFAULT_MAP_SIZE: u64 = 10 * 1024 * 1024;

/// Smallest map size accepted
pub const MIN_MAP_SIZE: u64 = 4096;

/// Durability of commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Flush the map synchronously on every commit (strongest durability)
    Sync,
    /// Schedule an asynchronous flush on every commit (balanced)
    Async,
    /// Leave flushing to the OS (fastest, unsafe for power loss)
    None,
}

/// Environment options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvOptions {
    /// Initial map size in bytes
    pub map_size: u64,
    /// If true, the path is a directory holding the data file; otherwise it is the data file
    pub subdir: bool,
    /// Open without write access
    pub readonly: bool,
    /// Flush policy for commits
    pub sync_mode: SyncMode,
    /// Create the data file (and directory) if missing
    pub create: bool,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            map_size: DEFAULT_MAP_SIZE,
            subdir: true,
            readonly: false,
            sync_mode: SyncMode::Sync,
            create: true,
        }
    }
}

impl EnvOptions {
    /// Set the initial map size
    pub fn with_map_size(mut self, map_size: u64) -> Self {
        self.map_size = map_size;
        self
    }

    /// Treat the path as the data file itself
    pub fn file_path(mut self) -> Self {
        self.subdir = false;
        self
    }

    /// Open read-only
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Set the sync mode
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }
}

enum Region {
    Writable(MmapMut),
    ReadOnly(Mmap),
}

impl Region {
    fn as_slice(&self) -> &[u8] {
        match self {
            Region::Writable(map) => &map[..],
            Region::ReadOnly(map) => &map[..],
        }
    }

    fn flush(&self) -> EngineResult<()> {
        if let Region::Writable(map) = self {
            map.flush()?;
        }
        Ok(())
    }
}

struct Committed {
    tree: Arc<Tree>,
    meta: MetaPage,
    payload_len: u64,
}

/// Where a commit writes its frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Append the batch frame at `log_end`
    Append,
    /// Write a snapshot frame at `at` and restart the log there
    Compact { at: u64 },
}

/// Choose where a commit goes, or `None` if nothing fits.
///
/// Appends keep room for a later snapshot: either the dead space before the
/// log already holds one, or the append leaves `snapshot_len` free behind it.
/// Frames are never placed over `log_start..log_end`.
pub(crate) fn place(
    meta: &MetaPage,
    map_size: u64,
    batch_len: u64,
    snapshot_len: u64,
) -> Option<Placement> {
    let reserve = if meta.front_gap() >= snapshot_len {
        0
    } else {
        snapshot_len
    };
    let appended = meta.log_end.saturating_add(batch_len);
    if appended.saturating_add(reserve) <= map_size {
        return Some(Placement::Append);
    }
    if meta.front_gap() >= snapshot_len {
        return Some(Placement::Compact {
            at: DATA_START as u64,
        });
    }
    if meta.log_end.saturating_add(snapshot_len) <= map_size {
        return Some(Placement::Compact { at: meta.log_end });
    }
    if appended <= map_size {
        return Some(Placement::Append);
    }
    None
}

/// A memory-mapped map environment.
pub struct MapEnv {
    path: PathBuf,
    options: EnvOptions,
    file: File,
    region: RwLock<Option<Region>>,
    map_size: AtomicU64,
    committed: RwLock<Committed>,
    writer: Mutex<()>,
    closed: AtomicBool,
}

impl MapEnv {
    /// Open or create an environment at the given path
    pub fn open(path: impl AsRef<Path>, options: EnvOptions) -> EngineResult<Self> {
        let path = path.as_ref();
        if options.map_size < MIN_MAP_SIZE {
            return Err(EngineError::InvalidMapSize {
                requested: options.map_size,
                used: MIN_MAP_SIZE,
            });
        }

        let data_path = if options.subdir {
            if options.create && !options.readonly {
                std::fs::create_dir_all(path)?;
            }
            path.join(DATA_FILE)
        } else {
            path.to_path_buf()
        };

        let file = if options.readonly {
            OpenOptions::new().read(true).open(&data_path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(options.create)
                .truncate(false)
                .open(&data_path)?
        };

        let file_len = file.metadata()?.len();
        let map_size = if options.readonly {
            file_len
        } else {
            file_len.max(options.map_size)
        };
        if file_len < map_size {
            file.set_len(map_size)?;
        }

        // SAFETY: the data file is owned by this environment for its lifetime;
        // other processes mutating it concurrently is unsupported.
        let region = unsafe {
            if options.readonly {
                Region::ReadOnly(Mmap::map(&file)?)
            } else {
                Region::Writable(MmapMut::map_mut(&file)?)
            }
        };

        let (meta, tree) = load(region.as_slice())?;
        let payload_len = payload_len_of(&tree);
        info!(
            path = %data_path.display(),
            map_size,
            entries = tree.len(),
            txn_id = meta.txn_id,
            readonly = options.readonly,
            "Opened map environment"
        );

        Ok(Self {
            path: data_path,
            options,
            file,
            region: RwLock::new(Some(region)),
            map_size: AtomicU64::new(map_size),
            committed: RwLock::new(Committed {
                tree: Arc::new(tree),
                meta,
                payload_len,
            }),
            writer: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Path of the data file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Options the environment was opened with
    pub fn options(&self) -> &EnvOptions {
        &self.options
    }

    pub(crate) fn map_size_now(&self) -> u64 {
        self.map_size.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    fn flush_range(&self, map: &MmapMut, offset: usize, len: usize) -> EngineResult<()> {
        match self.options.sync_mode {
            SyncMode::Sync => map.flush_range(offset, len)?,
            SyncMode::Async => map.flush_async_range(offset, len)?,
            SyncMode::None => {}
        }
        Ok(())
    }

    /// Persist `changes` on top of `base` and make the result visible.
    ///
    /// Nothing visible changes unless the frame and the new meta page were
    /// both written. The in-memory tree is updated in place unless a reader
    /// still pins it.
    pub(crate) fn publish(
        &self,
        base: Arc<Tree>,
        changes: Changes,
        payload_len: u64,
    ) -> EngineResult<()> {
        let current = self.committed.read().meta;
        let batch = frame::encode_batch(&changes)?;

        let mut region = self.region.write();
        let map = match region.as_mut() {
            Some(Region::Writable(map)) => map,
            Some(Region::ReadOnly(_)) => return Err(EngineError::ReadOnly),
            None => return Err(EngineError::Closed),
        };
        let map_size = map.len() as u64;

        let placement = place(
            &current,
            map_size,
            batch.len() as u64,
            snapshot_frame_len(payload_len),
        )
        .ok_or(EngineError::CapacityExceeded {
            required: current.log_end + batch.len() as u64,
            map_size,
        })?;
        let (at, bytes) = match placement {
            Placement::Append => (current.log_end, batch),
            Placement::Compact { at } => (at, frame::encode_snapshot(&base, &changes)?),
        };

        let start = at as usize;
        let end = start + bytes.len();
        let limit = match placement {
            Placement::Compact { at } if at < current.log_start => current.log_start,
            _ => map_size,
        };
        if end as u64 > limit {
            return Err(EngineError::CapacityExceeded {
                required: end as u64,
                map_size,
            });
        }
        map[start..end].copy_from_slice(&bytes);
        self.flush_range(map, start, bytes.len())?;

        let entries = changes.iter().fold(current.entries, |n, (key, change)| {
            match (base.contains_key(key), change.is_some()) {
                (false, true) => n + 1,
                (true, false) => n - 1,
                _ => n,
            }
        });
        let next = MetaPage {
            txn_id: current.txn_id + 1,
            log_start: match placement {
                Placement::Append => current.log_start,
                Placement::Compact { at } => at,
            },
            log_end: end as u64,
            entries,
        };

        let page = next.page_offset();
        let mut previous = [0u8; META_PAGE_LEN];
        previous.copy_from_slice(&map[page..page + META_PAGE_LEN]);
        map[page..page + META_PAGE_LEN].copy_from_slice(&next.encode());
        if let Err(err) = self.flush_range(map, page, META_PAGE_LEN) {
            map[page..page + META_PAGE_LEN].copy_from_slice(&previous);
            return Err(err);
        }
        drop(region);

        let mut committed = self.committed.write();
        drop(base);
        let tree = Arc::make_mut(&mut committed.tree);
        let changed = changes.len();
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
        committed.meta = next;
        committed.payload_len = payload_len;
        drop(committed);

        if matches!(placement, Placement::Compact { .. }) {
            info!(txn_id = next.txn_id, at, len = bytes.len(), "Compacted commit log");
        }
        debug!(txn_id = next.txn_id, changed, entries, "Committed write transaction");
        Ok(())
    }
}

fn load(data: &[u8]) -> EngineResult<(MetaPage, Tree)> {
    let meta = MetaPage::select(data)?;
    let tree = frame::replay(&data[meta.log_start as usize..meta.log_end as usize])?;
    if tree.len() as u64 != meta.entries {
        return Err(EngineError::Corrupted(format!(
            "txn {} should hold {} entries, log replays to {}",
            meta.txn_id,
            meta.entries,
            tree.len()
        )));
    }
    Ok((meta, tree))
}

fn payload_len_of(tree: &Tree) -> u64 {
    EMPTY_PAYLOAD_LEN + tree.iter().map(|(k, v)| entry_cost(k, v)).sum::<u64>()
}

/// Validate a raw map file image, returning the number of entries it holds.
pub fn validate_image(data: &[u8]) -> EngineResult<usize> {
    load(data).map(|(_, tree)| tree.len())
}

impl Environment for MapEnv {
    type Ro<'env> = MapReadTxn where Self: 'env;
    type Rw<'env> = MapWriteTxn<'env> where Self: 'env;

    fn begin_read(&self) -> EngineResult<MapReadTxn> {
        self.ensure_open()?;
        Ok(MapReadTxn {
            snapshot: Arc::clone(&self.committed.read().tree),
        })
    }

    fn begin_write(&self) -> EngineResult<MapWriteTxn<'_>> {
        self.ensure_open()?;
        if self.options.readonly {
            return Err(EngineError::ReadOnly);
        }
        let writer = self.writer.lock();
        // close() may have won the race while we waited for the writer lock
        self.ensure_open()?;
        let committed = self.committed.read();
        Ok(MapWriteTxn {
            env: self,
            _writer: writer,
            base: Arc::clone(&committed.tree),
            changes: BTreeMap::new(),
            payload_len: committed.payload_len,
        })
    }

    fn map_size(&self) -> u64 {
        self.map_size_now()
    }

    fn resize(&self, new_size: u64) -> EngineResult<()> {
        self.ensure_open()?;
        if self.options.readonly {
            return Err(EngineError::ReadOnly);
        }
        let _writer = self.writer.lock();
        let used = self.committed.read().meta.log_end;
        if new_size < used.max(MIN_MAP_SIZE) {
            return Err(EngineError::InvalidMapSize {
                requested: new_size,
                used,
            });
        }

        let mut region = self.region.write();
        let Some(current) = region.as_ref() else {
            return Err(EngineError::Closed);
        };
        current.flush()?;
        self.file.set_len(new_size)?;
        // SAFETY: see `open`; the old mapping is replaced while the region
        // write lock is held, so no borrow of it is outstanding.
        let remapped = unsafe { MmapMut::map_mut(&self.file)? };
        *region = Some(Region::Writable(remapped));

        let old = self.map_size.swap(new_size, Ordering::AcqRel);
        info!(old, new = new_size, "Resized map");
        Ok(())
    }

    fn info(&self) -> EngineResult<EnvInfo> {
        self.ensure_open()?;
        let committed = self.committed.read();
        Ok(EnvInfo {
            map_size: self.map_size_now(),
            used_bytes: committed.meta.log_end,
            entries: committed.tree.len() as u64,
        })
    }

    fn sync(&self) -> EngineResult<()> {
        self.ensure_open()?;
        match self.region.read().as_ref() {
            Some(region) => region.flush(),
            None => Err(EngineError::Closed),
        }
    }

    fn close(&self) -> EngineResult<()> {
        let _writer = self.writer.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut region = self.region.write();
        let flushed = match region.as_ref() {
            Some(region) => region.flush(),
            None => Ok(()),
        };
        *region = None;
        info!(path = %self.path.display(), "Closed map environment");
        flushed
    }

    fn is_readonly(&self) -> bool {
        self.options.readonly
    }
}
