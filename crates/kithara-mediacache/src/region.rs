#![forbid(unsafe_code)]

//! File-level lock around the backing driver.
//!
//! Blocks and the fetch engine reach the mapping only through
//! [`SharedRegion`], taking the read lock per access. Removal takes the write
//! lock once to detach the driver, after which every access fails with
//! [`CacheError::Closed`].

use std::path::PathBuf;

use kithara_storage::Driver;
use parking_lot::RwLock;

use crate::{CacheError, CacheResult};

enum RegionState<D> {
    /// Not allocated yet, or allocation failed.
    Vacant,
    Mapped(D),
    Closed,
}

pub(crate) struct SharedRegion<D: Driver> {
    state: RwLock<RegionState<D>>,
}

impl<D: Driver> SharedRegion<D> {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(RegionState::Vacant),
        }
    }

    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> CacheResult<()> {
        match &*self.state.read() {
            RegionState::Mapped(driver) => driver
                .read_at(offset, buf)
                .map_err(CacheError::storage),
            RegionState::Vacant | RegionState::Closed => Err(CacheError::Closed),
        }
    }

    pub(crate) fn write_at(&self, offset: u64, data: &[u8]) -> CacheResult<()> {
        match &*self.state.read() {
            RegionState::Mapped(driver) => driver
                .write_at(offset, data)
                .map_err(CacheError::storage),
            RegionState::Vacant | RegionState::Closed => Err(CacheError::Closed),
        }
    }

    /// Install a freshly allocated driver.
    ///
    /// Hands the driver back if the region was closed while it was being
    /// allocated, so the caller can release it.
    pub(crate) fn install(&self, driver: D) -> Result<(), D> {
        let mut state = self.state.write();
        if matches!(*state, RegionState::Vacant) {
            *state = RegionState::Mapped(driver);
            Ok(())
        } else {
            Err(driver)
        }
    }

    /// Detach the driver and mark the region closed.
    ///
    /// Returns `Err(Closed)` if the region was already closed, otherwise the
    /// driver (if one was ever installed).
    pub(crate) fn close(&self) -> CacheResult<Option<D>> {
        let mut state = self.state.write();
        match std::mem::replace(&mut *state, RegionState::Closed) {
            RegionState::Mapped(driver) => Ok(Some(driver)),
            RegionState::Vacant => Ok(None),
            RegionState::Closed => Err(CacheError::Closed),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(*self.state.read(), RegionState::Closed)
    }

    pub(crate) fn path(&self) -> Option<PathBuf> {
        match &*self.state.read() {
            RegionState::Mapped(driver) => driver.path().map(ToOwned::to_owned),
            RegionState::Vacant | RegionState::Closed => None,
        }
    }
}
