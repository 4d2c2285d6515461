#![forbid(unsafe_code)]

//! `Driver` trait: one fixed-size, directly addressable byte region.
//!
//! A driver owns the whole allocation. Callers address it by absolute offset
//! and are responsible for splitting it into disjoint windows; the driver only
//! enforces bounds.

use std::path::Path;

use crate::{StorageError, StorageResult};

/// Backend-specific fixed-size region.
///
/// Implementations manage their own interior mutability, so `read_at` and
/// `write_at` take `&self` and may be called from several threads at once as
/// long as concurrent writers target disjoint ranges.
pub trait Driver: Send + Sync + 'static {
    /// Configuration needed to allocate a region.
    type Options: Send;

    /// Allocate a region of exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be created, sized or mapped,
    /// or if `len` is zero.
    fn open(opts: Self::Options, len: u64) -> StorageResult<Self>
    where
        Self: Sized;

    /// Region length in bytes.
    fn len(&self) -> u64;

    /// Whether the region is zero-length. Never true for an opened driver.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()>;

    /// Copy `data` into the region starting at `offset`.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Filesystem path, if any.
    fn path(&self) -> Option<&Path>;

    /// Unmap, close and delete the backing storage.
    ///
    /// Consumes the driver, so a region is released at most once.
    fn release(self) -> StorageResult<()>
    where
        Self: Sized;
}

/// Validate that `offset..offset + len` lies inside a region of `region_len` bytes.
pub(crate) fn check_bounds(offset: u64, len: usize, region_len: u64) -> StorageResult<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or(StorageError::OutOfBounds {
            offset,
            end: u64::MAX,
            len: region_len,
        })?;
    if end > region_len {
        return Err(StorageError::OutOfBounds {
            offset,
            end,
            len: region_len,
        });
    }
    Ok(())
}
