#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

/// Result type used by `kithara-storage`.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors produced by backing regions.
///
/// Allocation failures name the step that failed (create, resize, map) and
/// carry the path. Higher-level crates wrap this error to add block context.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create backing file {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to allocate {len} bytes for backing file {path:?}: {source}")]
    Resize {
        path: PathBuf,
        len: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to map backing file {path:?}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: mmap_io::MmapIoError,
    },

    #[error("failed to delete backing file {path:?}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backing region must not be empty")]
    EmptyRegion,

    #[error("cannot reserve {len} bytes for in-memory region: {source}")]
    Reserve {
        len: u64,
        #[source]
        source: std::collections::TryReserveError,
    },

    #[error("region of {len} bytes exceeds the address space")]
    TooLarge { len: u64 },

    #[error("access {offset}..{end} out of bounds for region of {len} bytes")]
    OutOfBounds { offset: u64, end: u64, len: u64 },

    #[error("mmap error: {0}")]
    Mmap(#[from] mmap_io::MmapIoError),
}
