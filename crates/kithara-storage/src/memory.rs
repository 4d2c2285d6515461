#![forbid(unsafe_code)]

//! In-memory region driver.
//!
//! [`MemDriver`] implements [`Driver`] over a `Vec<u8>` behind a mutex. It has
//! the same bounds semantics as the mmap driver and no persistent storage, so
//! `path()` is `None` and `release` simply frees the buffer.

use std::path::Path;

use parking_lot::Mutex;

use crate::{StorageError, StorageResult, driver::Driver, driver::check_bounds};

/// Options for allocating a [`MemDriver`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemOptions;

/// In-memory region driver.
pub struct MemDriver {
    buf: Mutex<Vec<u8>>,
    len: u64,
}

impl std::fmt::Debug for MemDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemDriver").field("len", &self.len).finish()
    }
}

impl Driver for MemDriver {
    type Options = MemOptions;

    fn open(_opts: MemOptions, len: u64) -> StorageResult<Self> {
        if len == 0 {
            return Err(StorageError::EmptyRegion);
        }
        let size = usize::try_from(len).map_err(|_| StorageError::TooLarge { len })?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|source| StorageError::Reserve { len, source })?;
        buf.resize(size, 0);
        Ok(Self {
            buf: Mutex::new(buf),
            len,
        })
    }

    fn len(&self) -> u64 {
        self.len
    }

    #[expect(clippy::cast_possible_truncation)] // bounds checked against an in-memory buffer
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        check_bounds(offset, buf.len(), self.len)?;
        let start = offset as usize;
        let data = self.buf.lock();
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    #[expect(clippy::cast_possible_truncation)] // bounds checked against an in-memory buffer
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        check_bounds(offset, data.len(), self.len)?;
        let start = offset as usize;
        let mut buf = self.buf.lock();
        buf[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn release(self) -> StorageResult<()> {
        Ok(())
    }
}
