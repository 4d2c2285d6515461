#![forbid(unsafe_code)]

//! `CachedFile<D>`: one logical object backed by a fixed-size region.
//!
//! Allocation runs lazily and exactly once; its outcome is sticky. Blocks are
//! created at allocation time and populated on first access through
//! [`CachedFile::get_block`]. [`CachedFile::remove`] detaches the region,
//! invalidates every block and releases the backing storage.

use std::{
    path::PathBuf,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicI64, Ordering},
    },
};

use kithara_storage::{Driver, MemDriver, MmapDriver};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    Block, BlockState, CacheError, CacheResult, FileOptions, RangeFetch,
    engine::FetchEngine,
    region::SharedRegion,
    table::{BlockTable, block_count},
};

/// Cached file backed by a memory-mapped file on disk.
pub type MmapFile = CachedFile<MmapDriver>;

/// Cached file backed by an in-memory buffer.
pub type MemFile = CachedFile<MemDriver>;

/// Block-partitioned cache of one logical object.
pub struct CachedFile<D: Driver> {
    size: u64,
    block_size: u64,
    /// Consumed by the single allocation attempt.
    storage: Mutex<Option<D::Options>>,
    allocation: OnceLock<CacheResult<BlockTable<D>>>,
    region: Arc<SharedRegion<D>>,
    engine: FetchEngine,
    /// Index of a permanently failed block, `-1` when none.
    failed_block: AtomicI64,
}

impl<D: Driver> std::fmt::Debug for CachedFile<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFile")
            .field("size", &self.size)
            .field("block_size", &self.block_size)
            .field("path", &self.path())
            .field("closed", &self.region.is_closed())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> CachedFile<D> {
    /// Build a file without allocating its backing storage.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidBlockSize`] if `options.block_size` is zero.
    pub fn new<F: RangeFetch>(
        fetcher: F,
        storage: D::Options,
        options: FileOptions,
    ) -> CacheResult<Self> {
        if options.block_size == 0 {
            return Err(CacheError::InvalidBlockSize);
        }
        let cancel = options.cancel.unwrap_or_default();

        Ok(Self {
            size: options.size,
            block_size: options.block_size,
            storage: Mutex::new(Some(storage)),
            allocation: OnceLock::new(),
            region: Arc::new(SharedRegion::new()),
            engine: FetchEngine::new(Arc::new(fetcher), options.policy, cancel),
            failed_block: AtomicI64::new(-1),
        })
    }

    /// Build a file and allocate its backing storage.
    ///
    /// # Errors
    ///
    /// Returns the allocation error if the region cannot be created.
    pub fn open<F: RangeFetch>(
        fetcher: F,
        storage: D::Options,
        options: FileOptions,
    ) -> CacheResult<Self> {
        let file = Self::new(fetcher, storage, options)?;
        file.allocate()?;
        Ok(file)
    }

    /// Allocate the backing storage if not done yet.
    ///
    /// Runs at most once. Every call returns the outcome of that single
    /// attempt; a failed allocation is never retried. After [`remove`](Self::remove)
    /// this returns [`CacheError::Closed`].
    pub fn allocate(&self) -> CacheResult<()> {
        self.table().map(|_| ())
    }

    fn table(&self) -> CacheResult<&BlockTable<D>> {
        // Removal supersedes any allocation outcome, including a failed one.
        if self.region.is_closed() {
            return Err(CacheError::Closed);
        }
        let table = self
            .allocation
            .get_or_init(|| self.allocate_once())
            .as_ref()
            .map_err(Clone::clone)?;
        if self.region.is_closed() {
            return Err(CacheError::Closed);
        }
        Ok(table)
    }

    fn allocate_once(&self) -> CacheResult<BlockTable<D>> {
        let Some(storage) = self.storage.lock().take() else {
            return Err(CacheError::Closed);
        };
        if self.region.is_closed() {
            return Err(CacheError::Closed);
        }

        let driver = D::open(storage, self.size).map_err(|e| {
            warn!(size = self.size, error = %e, "allocation failed");
            CacheError::from(e)
        })?;

        if let Err(driver) = self.region.install(driver) {
            // Removed while allocating.
            if let Err(e) = driver.release() {
                warn!(error = %e, "failed to release storage allocated after removal");
            }
            return Err(CacheError::Closed);
        }

        debug!(
            size = self.size,
            block_size = self.block_size,
            blocks = self.block_count(),
            path = ?self.region.path(),
            "file allocated"
        );
        Ok(BlockTable::new(self.size, self.block_size, &self.region))
    }

    /// Return block `index`, fetching it on first access.
    ///
    /// Concurrent callers for the same unfetched block share one fetch. A block
    /// that failed keeps returning the same error.
    ///
    /// # Errors
    ///
    /// - the sticky allocation error, or [`CacheError::Closed`] after removal;
    /// - [`CacheError::OutOfRange`] if `index >= block_count()` (nothing is fetched);
    /// - the block's terminal fetch error.
    pub fn get_block(&self, index: u64) -> CacheResult<Arc<Block<D>>> {
        let table = self.table()?;
        let block = table.get(index).ok_or(CacheError::OutOfRange {
            index,
            count: table.len(),
        })?;
        block.resolve(&self.engine)?;
        Ok(Arc::clone(block))
    }

    /// Report a file-wide failure.
    ///
    /// Returns the allocation error (or `Closed` after removal) if there is one,
    /// otherwise the error of the block recorded as permanently failed. Nothing
    /// records such a block yet, so individual block failures are only visible
    /// through [`get_block`](Self::get_block).
    pub fn is_failed(&self) -> Option<CacheError> {
        let table = match self.table() {
            Ok(table) => table,
            Err(e) => return Some(e),
        };
        let index = u64::try_from(self.failed_block.load(Ordering::Acquire)).ok()?;
        table.get(index).and_then(|block| block.outcome().err())
    }

    /// Tear the file down.
    ///
    /// Detaches the region under the file lock, closes every block under its
    /// own lock (waiting for in-flight fetches), then unmaps and deletes the
    /// backing storage. All steps run even if releasing fails.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Closed`] if the file was already removed;
    /// - [`CacheError::Remove`] if the backing storage could not be released.
    pub fn remove(&self) -> CacheResult<()> {
        let driver = self.region.close()?;

        if let Some(Ok(table)) = self.allocation.get() {
            for block in table.iter() {
                block.close();
            }
        }

        let Some(driver) = driver else {
            debug!("removed unallocated file");
            return Ok(());
        };
        let path = driver.path().map(ToOwned::to_owned);
        driver.release().map_err(|e| {
            warn!(?path, error = %e, "failed to release backing storage");
            CacheError::Remove(Arc::new(e))
        })?;

        debug!(?path, "file removed");
        Ok(())
    }

    /// Total logical size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        block_count(self.size, self.block_size)
    }

    /// State of block `index` without fetching it.
    pub fn block_state(&self, index: u64) -> Option<BlockState> {
        self.table().ok()?.get(index).map(|block| block.state())
    }

    /// Backing file path while the region is mapped.
    pub fn path(&self) -> Option<PathBuf> {
        self.region.path()
    }

    /// Token that cancels this file's running fetches.
    pub fn cancel_token(&self) -> &CancellationToken {
        self.engine.cancel_token()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Cursor},
        ops::Range,
        sync::atomic::AtomicUsize,
        time::Duration,
    };

    use kithara_storage::MemOptions;
    use rstest::*;

    use super::*;
    use crate::{FetchPolicy, MemoryFetch, RangeReader};

    fn source(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn options(size: u64, block_size: u64) -> FileOptions {
        FileOptions::new(size, block_size).with_policy(FetchPolicy::new(3, Duration::ZERO))
    }

    #[rstest]
    fn zero_block_size_rejected() {
        let result = MemFile::new(MemoryFetch::new(source(10)), MemOptions, options(10, 0));
        assert!(matches!(result, Err(CacheError::InvalidBlockSize)));
    }

    #[rstest]
    fn blocks_match_source() {
        let data = source(5000);
        let file = MemFile::open(MemoryFetch::new(data.clone()), MemOptions, options(5000, 1024)).unwrap();

        assert_eq!(file.block_count(), 5);
        let last = file.get_block(4).unwrap();
        assert_eq!(last.len(), 904);
        assert_eq!(&last.bytes()[..], &data[4096..]);
        assert_eq!(file.block_state(4), Some(BlockState::Ready));
        assert_eq!(file.block_state(0), Some(BlockState::Unfetched));
    }

    #[rstest]
    fn allocation_error_is_sticky() {
        let file = MemFile::new(MemoryFetch::new(Vec::new()), MemOptions, options(0, 1024)).unwrap();

        let first = file.allocate().unwrap_err();
        let second = file.allocate().unwrap_err();

        assert!(matches!(first, CacheError::Allocation(_)));
        assert_eq!(first.to_string(), second.to_string());
        assert!(matches!(file.get_block(0), Err(CacheError::Allocation(_))));
        assert!(matches!(file.is_failed(), Some(CacheError::Allocation(_))));
    }

    #[rstest]
    fn out_of_range_does_not_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetch = move |range: Range<u64>| -> io::Result<RangeReader> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Cursor::new(vec![0; (range.end - range.start) as usize])))
        };
        let file = MemFile::open(fetch, MemOptions, options(100, 10)).unwrap();

        let err = file.get_block(10).unwrap_err();

        assert!(matches!(err, CacheError::OutOfRange { index: 10, count: 10 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    fn is_failed_ignores_block_failures() {
        let fetch = |_: Range<u64>| -> io::Result<RangeReader> { Err(io::Error::other("down")) };
        let file = MemFile::open(fetch, MemOptions, options(100, 10)).unwrap();

        assert!(file.get_block(3).is_err());
        assert_eq!(file.block_state(3), Some(BlockState::Failed));
        assert!(file.is_failed().is_none());
    }

    #[rstest]
    fn remove_is_one_shot() {
        let file = MemFile::open(MemoryFetch::new(source(64)), MemOptions, options(64, 16)).unwrap();
        let block = file.get_block(0).unwrap();

        file.remove().unwrap();

        assert!(matches!(file.remove(), Err(CacheError::Closed)));
        assert!(matches!(file.get_block(0), Err(CacheError::Closed)));
        assert!(matches!(file.allocate(), Err(CacheError::Closed)));
        assert!(block.bytes().is_empty());
        assert_eq!(block.state(), BlockState::Closed);
        assert!(file.block_state(1).is_none());
    }

    #[rstest]
    fn remove_after_failed_allocation_reports_closed() {
        let file = MemFile::new(MemoryFetch::new(Vec::new()), MemOptions, options(0, 16)).unwrap();
        assert!(matches!(file.allocate(), Err(CacheError::Allocation(_))));

        file.remove().unwrap();

        assert!(matches!(file.allocate(), Err(CacheError::Closed)));
        assert!(matches!(file.get_block(0), Err(CacheError::Closed)));
        assert!(matches!(file.is_failed(), Some(CacheError::Closed)));
        assert!(matches!(file.remove(), Err(CacheError::Closed)));
    }

    #[rstest]
    fn remove_before_allocation_prevents_it() {
        let file = MemFile::new(MemoryFetch::new(source(64)), MemOptions, options(64, 16)).unwrap();

        file.remove().unwrap();

        assert!(matches!(file.allocate(), Err(CacheError::Closed)));
        assert!(file.path().is_none());
    }

    #[rstest]
    #[timeout(Duration::from_secs(2))]
    fn cancel_token_fails_running_fetch() {
        let fetch = |_: Range<u64>| -> io::Result<RangeReader> { Err(io::Error::other("down")) };
        let file = MemFile::open(
            fetch,
            MemOptions,
            FileOptions::new(64, 16).with_policy(FetchPolicy::new(3, Duration::from_secs(60))),
        )
        .unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(50));
                file.cancel_token().cancel();
            });
            assert!(matches!(file.get_block(0), Err(CacheError::Cancelled)));
        });
        assert_eq!(file.block_state(0), Some(BlockState::Failed));
    }
}
