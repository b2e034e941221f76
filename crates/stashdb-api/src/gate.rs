//! Concurrency gate for the object store
//!
//! Many readers or one writer hold standing at a time. Closing the store is a
//! one-way trip through `Open -> Closing -> Closed`: once closing begins, no
//! new standing is granted, and the closer waits for everyone already inside
//! to leave before it takes exclusive standing for the final flush.

use parking_lot::{Condvar, Mutex};
use stashdb_core::{Error, Result};

/// Lifecycle phase of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting operations
    Open,
    /// A close is in progress; new operations are rejected
    Closing,
    /// Closed for good
    Closed,
}

#[derive(Debug)]
struct GateState {
    readers: usize,
    writer: bool,
    writers_waiting: usize,
    phase: Phase,
}

/// Readers/writer gate with a close protocol.
///
/// Writers are preferred: once a writer is waiting, new readers queue behind
/// it so a steady stream of reads cannot starve writes.
#[derive(Debug)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Creates an open gate
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                readers: 0,
                writer: false,
                writers_waiting: 0,
                phase: Phase::Open,
            }),
            changed: Condvar::new(),
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Number of readers currently holding standing
    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }

    /// Take shared standing, waiting out any writer.
    ///
    /// Fails with [`Error::StoreClosed`] if the store is closing or closed,
    /// including when closing begins while this call waits.
    pub fn acquire_read(&self) -> Result<ReadStanding<'_>> {
        let mut state = self.state.lock();
        while state.phase == Phase::Open && (state.writer || state.writers_waiting > 0) {
            self.changed.wait(&mut state);
        }
        if state.phase != Phase::Open {
            return Err(Error::StoreClosed);
        }
        state.readers += 1;
        Ok(ReadStanding { gate: self })
    }

    /// Take exclusive standing, waiting out every reader and writer.
    pub fn acquire_write(&self) -> Result<WriteStanding<'_>> {
        let mut state = self.state.lock();
        state.writers_waiting += 1;
        while state.phase == Phase::Open && (state.writer || state.readers > 0) {
            self.changed.wait(&mut state);
        }
        state.writers_waiting -= 1;
        if state.phase != Phase::Open {
            // readers parked behind us may proceed to their own error
            self.changed.notify_all();
            return Err(Error::StoreClosed);
        }
        state.writer = true;
        Ok(WriteStanding {
            gate: self,
            finalizes: false,
        })
    }

    /// Move from `Open` to `Closing`.
    ///
    /// Returns false if some other caller already began closing; that caller
    /// owns the close sequence.
    pub fn begin_close(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Open {
            return false;
        }
        state.phase = Phase::Closing;
        self.changed.notify_all();
        true
    }

    /// Wait until no reader or writer holds standing, then take exclusive
    /// standing for the close sequence.
    ///
    /// Dropping the returned standing marks the gate `Closed`. Returns `None`
    /// if the gate is already closed, or was never put into `Closing`.
    pub fn await_quiescent(&self) -> Option<WriteStanding<'_>> {
        let mut state = self.state.lock();
        while state.phase == Phase::Closing && (state.writer || state.readers > 0) {
            self.changed.wait(&mut state);
        }
        if state.phase != Phase::Closing {
            return None;
        }
        state.writer = true;
        Some(WriteStanding {
            gate: self,
            finalizes: true,
        })
    }

    /// Block until the gate reaches `Closed`.
    pub fn await_closed(&self) {
        let mut state = self.state.lock();
        while state.phase != Phase::Closed {
            self.changed.wait(&mut state);
        }
    }

    fn release_read(&self) {
        let mut state = self.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            self.changed.notify_all();
        }
    }

    fn release_write(&self, finalizes: bool) {
        let mut state = self.state.lock();
        state.writer = false;
        if finalizes {
            state.phase = Phase::Closed;
        }
        self.changed.notify_all();
    }
}

/// Shared standing; released on drop.
#[derive(Debug)]
#[must_use = "standing is released as soon as it is dropped"]
pub struct ReadStanding<'g> {
    gate: &'g Gate,
}

impl Drop for ReadStanding<'_> {
    fn drop(&mut self) {
        self.gate.release_read();
    }
}

/// Exclusive standing; released on drop.
#[derive(Debug)]
#[must_use = "standing is released as soon as it is dropped"]
pub struct WriteStanding<'g> {
    gate: &'g Gate,
    finalizes: bool,
}

impl WriteStanding<'_> {
    /// Returns true if this standing belongs to the close sequence
    pub fn is_closing(&self) -> bool {
        self.finalizes
    }
}

impl Drop for WriteStanding<'_> {
    fn drop(&mut self) {
        self.gate.release_write(self.finalizes);
    }
}
