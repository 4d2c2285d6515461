#![forbid(unsafe_code)]

//! # kithara-mediacache
//!
//! Block-level, disk-backed cache for range-fetchable media.
//!
//! A [`CachedFile`] materializes a logical byte range of known size into one
//! fixed-size backing region (a memory-mapped file for [`MmapFile`]) and fills
//! it lazily, one block at a time, from a [`RangeFetch`].
//!
//! ## Blocks
//!
//! The region is split into `ceil(size / block_size)` windows; the last one may
//! be shorter. Each [`Block`] is fetched at most once:
//! - the first [`CachedFile::get_block`] call runs the retry protocol, concurrent
//!   callers wait and share its outcome;
//! - a failed block stays failed and returns the same error;
//! - a retry resumes at the first byte not yet written.
//!
//! ## Teardown
//!
//! [`CachedFile::remove`] detaches the mapping, closes every block (waiting
//! for in-flight fetches) and deletes the backing file. Afterwards `get_block`
//! returns [`CacheError::Closed`] and [`Block::bytes`] returns nothing.
//!
//! ## Registry
//!
//! [`MediaCache`] maps names to files under one cache directory with
//! idempotent opens.

mod block;
mod cache;
mod engine;
mod error;
mod fetch;
mod file;
mod options;
mod region;
mod table;

pub use block::{Block, BlockState};
pub use cache::MediaCache;
pub use error::{CacheError, CacheResult};
pub use fetch::{LocalFileFetch, MemoryFetch, RangeFetch, RangeReader};
pub use file::{CachedFile, MemFile, MmapFile};
pub use kithara_storage::{Driver, MemDriver, MemOptions, MmapDriver, MmapOptions, StorageError};
pub use options::{
    CacheOptions, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, FetchPolicy,
    FileOptions,
};
pub use table::{block_count, partition};
