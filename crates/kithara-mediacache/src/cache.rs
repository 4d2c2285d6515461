#![forbid(unsafe_code)]

//! `MediaCache`: name → [`MmapFile`] registry.
//!
//! Disk mapping is `<cache_dir>/<name>`, one backing file per entry with no
//! sidecar metadata. Opens are idempotent by name: the first open creates the
//! entry, later opens reuse it and observe the same (sticky) allocation
//! outcome.

use std::{collections::HashMap, sync::Arc};

use kithara_storage::MmapOptions;
use parking_lot::Mutex;
use tracing::debug;

use crate::{CacheError, CacheOptions, CacheResult, FileOptions, MmapFile, RangeFetch};

/// Registry of cached files keyed by name.
pub struct MediaCache {
    options: CacheOptions,
    files: Mutex<HashMap<String, Arc<MmapFile>>>,
}

impl std::fmt::Debug for MediaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCache")
            .field("cache_dir", &self.options.cache_dir)
            .field("block_size", &self.options.block_size)
            .field("entries", &self.len())
            .finish()
    }
}

impl MediaCache {
    pub fn new(options: CacheOptions) -> Self {
        Self {
            options,
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Open `name`, creating its entry on first use.
    ///
    /// The first call registers a file of `size` bytes fetched through
    /// `fetcher`; later calls for the same name ignore both and return the
    /// existing file. Every call runs the file's allocation step, so a failed
    /// allocation is reported to each caller without being retried.
    ///
    /// # Errors
    ///
    /// - [`CacheError::InvalidName`] if `name` is not a single plain path segment;
    /// - [`CacheError::InvalidBlockSize`] if the configured block size is zero;
    /// - the file's allocation error, or `Closed` if it was removed.
    pub fn open<F: RangeFetch>(
        &self,
        name: &str,
        fetcher: F,
        size: u64,
    ) -> CacheResult<Arc<MmapFile>> {
        validate_name(name)?;

        let file = {
            let mut files = self.files.lock();
            if let Some(file) = files.get(name) {
                Arc::clone(file)
            } else {
                let path = self.options.cache_dir.join(name);
                let options = FileOptions::new(size, self.options.block_size)
                    .with_policy(self.options.policy.clone())
                    .with_cancel(self.options.cancel.child_token());
                let file = Arc::new(MmapFile::new(fetcher, MmapOptions::new(path), options)?);
                files.insert(name.to_owned(), Arc::clone(&file));
                debug!(name, size, "cache entry registered");
                file
            }
        };

        file.allocate()?;
        Ok(file)
    }

    /// Look up an entry without opening it.
    pub fn get(&self, name: &str) -> Option<Arc<MmapFile>> {
        self.files.lock().get(name).cloned()
    }

    /// Remove the backing file of `name` and drop it from the registry.
    ///
    /// The entry stays registered (and opens of it fail with `Closed`) until
    /// its file is gone, so a reopen never races with the deletion. Unknown
    /// names are ignored; a later [`open`](Self::open) starts a fresh entry.
    pub fn remove(&self, name: &str) -> CacheResult<()> {
        let Some(file) = self.get(name) else {
            return Ok(());
        };
        debug!(name, "removing cache entry");
        let result = match file.remove() {
            Ok(()) | Err(CacheError::Closed) => Ok(()),
            Err(e) => Err(e),
        };
        self.unregister(name, &file);
        result
    }

    fn unregister(&self, name: &str, file: &Arc<MmapFile>) {
        let mut files = self.files.lock();
        if files.get(name).is_some_and(|current| Arc::ptr_eq(current, file)) {
            files.remove(name);
        }
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }

    /// Remove every entry, returning the first failure.
    ///
    /// All entries are removed even if one fails.
    pub fn clear(&self) -> CacheResult<()> {
        let entries: Vec<_> = self
            .files
            .lock()
            .iter()
            .map(|(name, file)| (name.clone(), Arc::clone(file)))
            .collect();

        let mut first_error = None;
        for (name, file) in entries {
            match file.remove() {
                Ok(()) | Err(CacheError::Closed) => {}
                Err(e) => {
                    debug!(name, error = %e, "failed to remove cache entry");
                    first_error.get_or_insert(e);
                }
            }
            self.unregister(&name, &file);
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Accept only a single, plain path segment.
fn validate_name(name: &str) -> CacheResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if invalid {
        return Err(CacheError::InvalidName(name.to_owned()));
    }
    Ok(())
}
