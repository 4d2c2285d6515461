#![forbid(unsafe_code)]

//! `kithara-storage`
//!
//! Fixed-size backing regions for Kithara block caches.
//!
//! A [`Driver`] owns one contiguous region of exactly the requested length:
//! - [`MmapDriver`]: file created/truncated to size and mapped read-write via `mmap-io`
//! - [`MemDriver`]: `Vec<u8>` region for tests and filesystem-less use
//!
//! Callers split the region into disjoint windows and address them by absolute
//! offset; drivers only enforce bounds.

mod driver;
mod error;
mod memory;
mod mmap;

pub use driver::Driver;
pub use error::{StorageError, StorageResult};
pub use memory::{MemDriver, MemOptions};
pub use mmap::{MmapDriver, MmapOptions};
