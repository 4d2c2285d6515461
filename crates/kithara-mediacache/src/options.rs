#![forbid(unsafe_code)]

use std::{path::PathBuf, time::Duration};

use tokio_util::sync::CancellationToken;

/// Default number of fetch attempts per block.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed delay between fetch attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Default block size used by [`CacheOptions`] (64 KiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024;

/// Retry policy for populating one block.
///
/// The delay is fixed: every retry waits the same `retry_delay`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl FetchPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay,
        }
    }
}

/// Options for a single [`CachedFile`](crate::CachedFile).
#[derive(Clone, Debug)]
pub struct FileOptions {
    /// Total logical size in bytes.
    pub size: u64,
    /// Bytes per block. The last block may be shorter.
    pub block_size: u64,
    pub policy: FetchPolicy,
    /// Cancels running fetches. A fresh token is used when `None`.
    pub cancel: Option<CancellationToken>,
}

impl FileOptions {
    pub fn new(size: u64, block_size: u64) -> Self {
        Self {
            size,
            block_size,
            policy: FetchPolicy::default(),
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Configuration for a [`MediaCache`](crate::MediaCache).
#[derive(Clone, Debug)]
pub struct CacheOptions {
    /// Directory holding one backing file per cached entry.
    pub cache_dir: PathBuf,
    /// Bytes per block for every file opened through the cache.
    pub block_size: u64,
    pub policy: FetchPolicy,
    /// Parent token; each file gets a child token.
    pub cancel: CancellationToken,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("kithara-mediacache"),
            block_size: DEFAULT_BLOCK_SIZE,
            policy: FetchPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }
}

impl CacheOptions {
    /// Create cache options rooted at `cache_dir`.
    pub fn new<P: Into<PathBuf>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
