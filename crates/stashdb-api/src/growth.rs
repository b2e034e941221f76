//! Automatic map growth
//!
//! A write transaction that no longer fits in the map fails with
//! `CapacityExceeded`. The growth controller catches exactly that condition,
//! enlarges the map and reruns the whole transaction from the start, until it
//! commits or the configured maximum is reached.

use stashdb_core::{EngineResult, Environment, Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};

/// Minimum amount a single growth step adds to the map (64 MiB)
pub const GROWTH_STEP: u64 = 64 * 1024 * 1024;

/// Next map size after `current`: at least double, and at least
/// [`GROWTH_STEP`] more, clamped to `max_map_size`.
///
/// Returns `None` when the map cannot grow any further.
pub fn next_map_size(current: u64, max_map_size: Option<u64>) -> Option<u64> {
    let grown = current
        .saturating_mul(2)
        .max(current.saturating_add(GROWTH_STEP));
    let next = match max_map_size {
        Some(cap) => grown.min(cap),
        None => grown,
    };
    (next > current).then_some(next)
}

/// Retry-with-resize policy around write transactions.
#[derive(Debug, Default)]
pub struct Growth {
    max_map_size: Option<u64>,
    events: AtomicU64,
}

impl Growth {
    /// Creates a controller with an optional upper bound on the map size
    pub fn new(max_map_size: Option<u64>) -> Self {
        Self {
            max_map_size,
            events: AtomicU64::new(0),
        }
    }

    /// Configured upper bound
    pub fn max_map_size(&self) -> Option<u64> {
        self.max_map_size
    }

    /// Number of times the map has been grown
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Run `op` until it succeeds, growing the map on every capacity failure.
    ///
    /// `op` must run a complete write transaction, beginning and committing
    /// (or dropping) it, so that no transaction is open when the map is
    /// resized. Any other error is returned unchanged.
    pub fn run<E, T, F>(&self, env: &E, mut op: F) -> Result<T>
    where
        E: Environment,
        F: FnMut() -> EngineResult<T>,
    {
        loop {
            let err = match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_capacity_exceeded() => err,
                Err(err) => return Err(err.into()),
            };

            let current = env.map_size();
            let Some(next) = next_map_size(current, self.max_map_size) else {
                error!(
                    map_size = current,
                    max_map_size = ?self.max_map_size,
                    "Map is full and already at its maximum size"
                );
                return Err(Error::CapacityExhausted {
                    map_size: current,
                    max_map_size: self.max_map_size,
                });
            };

            warn!(from = current, to = next, cause = %err, "Map full, growing");
            env.resize(next)?;
            self.events.fetch_add(1, Ordering::Relaxed);
        }
    }
}
