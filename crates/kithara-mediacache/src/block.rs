#![forbid(unsafe_code)]

//! One block: a window into the shared region plus its fetch state machine.
//!
//! ```text
//! Unfetched -> Fetching -> Ready | Failed   (Failed also when the fetch unwinds)
//! {Unfetched, Ready, Failed} -> Closed   (file removal)
//! ```
//!
//! The phase tag is an atomic so the first caller can claim the fetch with a
//! compare-exchange; later callers park on the `gate` condvar until the phase
//! becomes terminal. The slot (`written`, `error`, `closed`) sits behind its own
//! lock, held exclusively by the fetching thread for the whole retry protocol
//! and by removal while it invalidates the block.

use std::{
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use bytes::Bytes;
use kithara_storage::Driver;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, warn};

use crate::{CacheError, CacheResult, engine::FetchEngine, region::SharedRegion};

const UNFETCHED: u8 = 0;
const FETCHING: u8 = 1;
const READY: u8 = 2;
const FAILED: u8 = 3;
const CLOSED: u8 = 4;

/// Observable state of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    Unfetched,
    Fetching,
    Ready,
    Failed,
    Closed,
}

impl BlockState {
    fn from_phase(phase: u8) -> Self {
        match phase {
            UNFETCHED => Self::Unfetched,
            FETCHING => Self::Fetching,
            READY => Self::Ready,
            FAILED => Self::Failed,
            _ => Self::Closed,
        }
    }

    /// Whether the state can no longer change through fetching.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Closed)
    }
}

#[derive(Default)]
struct Slot {
    /// Bytes of the window filled so far.
    written: u64,
    error: Option<CacheError>,
    closed: bool,
}

/// A fixed-size (or final, shorter) window of a cached file.
///
/// Handed out by [`CachedFile::get_block`](crate::CachedFile::get_block) once
/// populated. The window is an offset range into the file's region; the block
/// never owns bytes itself.
pub struct Block<D: Driver> {
    index: u64,
    window: Range<u64>,
    phase: AtomicU8,
    gate: Mutex<()>,
    resolved: Condvar,
    slot: RwLock<Slot>,
    region: Arc<SharedRegion<D>>,
}

impl<D: Driver> std::fmt::Debug for Block<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("index", &self.index)
            .field("window", &self.window)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Block<D> {
    pub(crate) fn new(index: u64, window: Range<u64>, region: Arc<SharedRegion<D>>) -> Self {
        Self {
            index,
            window,
            phase: AtomicU8::new(UNFETCHED),
            gate: Mutex::new(()),
            resolved: Condvar::new(),
            slot: RwLock::new(Slot::default()),
            region,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Absolute byte range of this block within the logical object.
    pub fn range(&self) -> Range<u64> {
        self.window.clone()
    }

    /// Logical length in bytes.
    pub fn len(&self) -> u64 {
        self.window.end - self.window.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> BlockState {
        BlockState::from_phase(self.phase.load(Ordering::Acquire))
    }

    /// Bytes of the window written so far.
    pub fn written(&self) -> u64 {
        self.slot.read().written
    }

    /// Copy of the block's bytes.
    ///
    /// Taken under the shared slot lock, so it never observes a half-written
    /// window. Empty once the file has been removed.
    #[expect(clippy::cast_possible_truncation)] // window lies inside a mapped region
    pub fn bytes(&self) -> Bytes {
        let slot = self.slot.read();
        if slot.closed {
            return Bytes::new();
        }

        let mut buf = vec![0u8; self.len() as usize];
        match self.region.read_at(self.window.start, &mut buf) {
            Ok(()) => Bytes::from(buf),
            Err(e) => {
                debug!(block = self.index, error = %e, "block read failed");
                Bytes::new()
            }
        }
    }

    /// Drive the block to a terminal state and return its outcome.
    ///
    /// The first caller runs the fetch protocol; concurrent callers wait for it
    /// and share its result. Resolved blocks return the cached outcome without
    /// touching the fetcher.
    pub(crate) fn resolve(&self, engine: &FetchEngine) -> CacheResult<()> {
        if self
            .phase
            .compare_exchange(UNFETCHED, FETCHING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.fetch(engine);
        } else {
            self.wait_resolved();
        }
        self.outcome()
    }

    fn fetch(&self, engine: &FetchEngine) {
        let mut unwind = FailOnUnwind {
            block: self,
            armed: true,
        };
        let mut slot = self.slot.write();

        // Removal may have won the slot lock between the claim and here.
        let next = if slot.closed {
            CLOSED
        } else {
            let Slot { written, error, .. } = &mut *slot;
            match engine.fill(self.index, &self.window, written, &self.region) {
                Ok(()) => {
                    *error = None;
                    READY
                }
                Err(e) => {
                    debug!(block = self.index, error = %e, "block failed");
                    *error = Some(e);
                    FAILED
                }
            }
        };

        self.publish(next);
        unwind.armed = false;
    }

    fn wait_resolved(&self) {
        let mut gate = self.gate.lock();
        while !self.state().is_terminal() {
            self.resolved.wait(&mut gate);
        }
    }

    /// Set a terminal phase and wake waiters. Callers hold the slot write lock.
    fn publish(&self, phase: u8) {
        {
            let _gate = self.gate.lock();
            self.phase.store(phase, Ordering::Release);
        }
        self.resolved.notify_all();
    }

    pub(crate) fn outcome(&self) -> CacheResult<()> {
        let slot = self.slot.read();
        match &slot.error {
            Some(e) => Err(e.clone()),
            None if slot.closed => Err(CacheError::Closed),
            None => Ok(()),
        }
    }

    /// Invalidate the block for file removal.
    ///
    /// Waits for an in-flight fetch to release the slot lock.
    pub(crate) fn close(&self) {
        let mut slot = self.slot.write();
        slot.closed = true;
        slot.error = Some(CacheError::Closed);
        self.publish(CLOSED);
    }
}

/// Publishes a terminal phase for a claimed block whose fetch unwound.
struct FailOnUnwind<'a, D: Driver> {
    block: &'a Block<D>,
    armed: bool,
}

impl<D: Driver> Drop for FailOnUnwind<'_, D> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let block = self.block;
        let mut slot = block.slot.write();
        let phase = if slot.closed {
            CLOSED
        } else {
            warn!(block = block.index, "block fetch panicked");
            slot.error = Some(CacheError::Panicked { index: block.index });
            FAILED
        };
        block.publish(phase);
    }
}
