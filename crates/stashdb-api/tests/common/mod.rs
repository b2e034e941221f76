// Common test utilities for object store integration tests
#![allow(dead_code)]

use stashdb::{Bincode, EnvOptions, ObjectStore, StoreConfig, TextEncoding};
use stashdb_core::{EngineError, EngineResult, EnvInfo, Environment, ReadTxn, WriteTxn};
use stashdb_engine::{MapEnv, MapReadTxn, MapWriteTxn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * 1024;

/// Test fixture that owns a temporary store directory
pub struct StoreFixture {
    pub temp_dir: TempDir,
    pub store_path: PathBuf,
}

impl StoreFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store_path = temp_dir.path().join("store");
        Self {
            temp_dir,
            store_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.store_path
    }

    pub fn open(&self, config: StoreConfig) -> ObjectStore {
        ObjectStore::open(&self.store_path, config).expect("Failed to open store")
    }

    pub fn open_faulty(&self, config: StoreConfig) -> ObjectStore<FaultyEnv> {
        let env = MapEnv::open(&self.store_path, config.env.clone()).expect("Failed to open env");
        ObjectStore::with_env(FaultyEnv::new(env), Bincode, &config)
            .expect("Failed to build store")
    }
}

impl Default for StoreFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// UTF-8 text keys on a 1 MiB map
pub fn text_config() -> StoreConfig {
    StoreConfig::default()
        .with_key_encoding(TextEncoding::Utf8)
        .with_map_size(MIB)
}

/// Read-only variant of a config
pub fn readonly(config: StoreConfig) -> StoreConfig {
    let env = EnvOptions {
        readonly: true,
        ..config.env.clone()
    };
    config.with_env(env)
}

/// A `MapEnv` wrapper that counts engine calls and injects failures.
pub struct FaultyEnv {
    inner: MapEnv,
    /// Commits that succeed before `fail_commits` applies
    pub pass_commits: AtomicUsize,
    /// Upcoming commits that fail with an I/O error
    pub fail_commits: AtomicUsize,
    /// Upcoming commits that fail as if the map were full
    pub fail_capacity: AtomicUsize,
    /// Fail `sync`
    pub fail_sync: AtomicBool,
    /// Milliseconds every commit sleeps before committing
    pub commit_delay_ms: AtomicU64,
    pub write_txns: AtomicUsize,
    pub commits: AtomicUsize,
    pub resizes: AtomicUsize,
    pub closes: AtomicUsize,
}

impl FaultyEnv {
    pub fn new(inner: MapEnv) -> Self {
        Self {
            inner,
            pass_commits: AtomicUsize::new(0),
            fail_commits: AtomicUsize::new(0),
            fail_capacity: AtomicUsize::new(0),
            fail_sync: AtomicBool::new(false),
            commit_delay_ms: AtomicU64::new(0),
            write_txns: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            resizes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MapEnv {
        &self.inner
    }

    pub fn fail_next_commits(&self, n: usize) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    pub fn fail_commits_after(&self, pass: usize, fail: usize) {
        self.pass_commits.store(pass, Ordering::SeqCst);
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn fill_next_commits(&self, n: usize) {
        self.fail_capacity.store(n, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn write_txn_count(&self) -> usize {
        self.write_txns.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct FaultyWriteTxn<'env> {
    inner: MapWriteTxn<'env>,
    env: &'env FaultyEnv,
}

impl ReadTxn for FaultyWriteTxn<'_> {
    fn get(&self, key: &[u8]) -> EngineResult<Option<&[u8]>> {
        self.inner.get(key)
    }
}

impl WriteTxn for FaultyWriteTxn<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.inner.put(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<bool> {
        self.inner.delete(key)
    }

    fn commit(self) -> EngineResult<()> {
        let delay = self.env.commit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if !take_one(&self.env.pass_commits) && take_one(&self.env.fail_commits) {
            self.inner.abort();
            return Err(EngineError::Io(std::io::Error::other(
                "injected commit failure",
            )));
        }
        if take_one(&self.env.fail_capacity) {
            let map_size = self.env.inner.map_size();
            self.inner.abort();
            return Err(EngineError::CapacityExceeded {
                required: map_size + 1,
                map_size,
            });
        }
        self.inner.commit()?;
        self.env.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn abort(self) {
        self.inner.abort()
    }
}

impl Environment for FaultyEnv {
    type Ro<'env> = MapReadTxn where Self: 'env;
    type Rw<'env> = FaultyWriteTxn<'env> where Self: 'env;

    fn begin_read(&self) -> EngineResult<MapReadTxn> {
        self.inner.begin_read()
    }

    fn begin_write(&self) -> EngineResult<FaultyWriteTxn<'_>> {
        let inner = self.inner.begin_write()?;
        self.write_txns.fetch_add(1, Ordering::SeqCst);
        Ok(FaultyWriteTxn { inner, env: self })
    }

    fn map_size(&self) -> u64 {
        self.inner.map_size()
    }

    fn resize(&self, new_size: u64) -> EngineResult<()> {
        self.inner.resize(new_size)?;
        self.resizes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn info(&self) -> EngineResult<EnvInfo> {
        self.inner.info()
    }

    fn sync(&self) -> EngineResult<()> {
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(EngineError::Io(std::io::Error::other("injected sync failure")));
        }
        self.inner.sync()
    }

    fn close(&self) -> EngineResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close()
    }

    fn is_readonly(&self) -> bool {
        self.inner.is_readonly()
    }
}
