#![forbid(unsafe_code)]

use std::sync::Arc;

use kithara_storage::StorageError;
use thiserror::Error;

/// Result type used by `kithara-mediacache`.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors produced by cached files and their blocks.
///
/// Cloneable: allocation and terminal block failures are cached and handed to
/// every later caller, so lower-level errors are kept behind `Arc`.
#[derive(Clone, Debug, Error)]
pub enum CacheError {
    /// Backing storage could not be created, sized or mapped. Sticky per file.
    #[error("allocation failed: {0}")]
    Allocation(#[source] Arc<StorageError>),

    #[error("block {index} out of range: file has {count} blocks")]
    OutOfRange { index: u64, count: u64 },

    /// Transient I/O failure from the range fetcher.
    #[error("fetch failed: {0}")]
    Fetch(#[source] Arc<std::io::Error>),

    /// Every attempt for a block failed. `last` is the last observed error,
    /// absent when attempts only ended with short streams.
    #[error("ran out of attempts after {attempts} tries")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Option<Box<CacheError>>,
    },

    /// Writing fetched bytes into the backing region failed.
    #[error("storage error: {0}")]
    Storage(#[source] Arc<StorageError>),

    /// Releasing the backing storage failed during removal.
    #[error("remove failed: {0}")]
    Remove(#[source] Arc<StorageError>),

    /// The fetch of a block unwound. Sticky like any other block failure.
    #[error("fetch of block {index} panicked")]
    Panicked { index: u64 },

    #[error("file closed")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("block size must be greater than zero")]
    InvalidBlockSize,

    #[error("invalid cache entry name {0:?}")]
    InvalidName(String),
}

impl CacheError {
    pub(crate) fn fetch(error: std::io::Error) -> Self {
        Self::Fetch(Arc::new(error))
    }

    pub(crate) fn storage(error: StorageError) -> Self {
        Self::Storage(Arc::new(error))
    }
}

impl From<StorageError> for CacheError {
    fn from(error: StorageError) -> Self {
        Self::Allocation(Arc::new(error))
    }
}
