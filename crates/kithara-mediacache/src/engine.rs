#![forbid(unsafe_code)]

//! Per-block retry protocol.
//!
//! [`FetchEngine::fill`] runs once per block, with the block's slot lock held
//! by the caller. Each attempt requests `[window.start + written, window.end)`,
//! so bytes landed by an earlier attempt are never fetched twice.

use std::{
    io::{ErrorKind, Read},
    ops::Range,
    sync::Arc,
    time::{Duration, Instant},
};

use kithara_storage::Driver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{CacheError, CacheResult, FetchPolicy, RangeFetch, region::SharedRegion};

/// Largest single read from a fetch stream.
const READ_CHUNK: usize = 64 * 1024;

/// Granularity of cancellation checks while waiting out a retry delay.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// How one attempt's stream ended.
enum Drained {
    /// Window completely written.
    Filled,
    /// Stream reported EOF before the window was full.
    Short,
    /// Stream failed mid-read; retryable.
    Failed(CacheError),
}

pub(crate) struct FetchEngine {
    fetcher: Arc<dyn RangeFetch>,
    policy: FetchPolicy,
    cancel: CancellationToken,
}

impl FetchEngine {
    pub(crate) fn new(
        fetcher: Arc<dyn RangeFetch>,
        policy: FetchPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            policy,
            cancel,
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fill `window` of `region`, resuming at `*written`.
    ///
    /// Returns `Ok(())` once the window is full. Retryable failures (range open
    /// errors, mid-stream read errors, short streams) are retried up to
    /// `max_attempts`; region and cancellation failures end the protocol
    /// immediately.
    pub(crate) fn fill<D: Driver>(
        &self,
        index: u64,
        window: &Range<u64>,
        written: &mut u64,
        region: &SharedRegion<D>,
    ) -> CacheResult<()> {
        let len = window.end - window.start;
        let mut last_error: Option<CacheError> = None;

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                self.pause()?;
            }
            if self.cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            if region.is_closed() {
                return Err(CacheError::Closed);
            }

            let range = window.start + *written..window.end;
            debug!(block = index, attempt, start = range.start, end = range.end, "fetching block range");

            let mut reader = match self.fetcher.fetch(range) {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(block = index, attempt, error = %e, "failed to open range");
                    last_error = Some(CacheError::fetch(e));
                    continue;
                }
            };

            match self.drain(&mut *reader, index, window, written, region)? {
                Drained::Filled => {
                    debug!(block = index, attempt, len, "block filled");
                    return Ok(());
                }
                Drained::Short => {
                    warn!(block = index, attempt, written = *written, len, "range stream ended early");
                }
                Drained::Failed(e) => {
                    warn!(block = index, attempt, written = *written, error = %e, "range stream failed");
                    last_error = Some(e);
                }
            }
        }

        Err(CacheError::Exhausted {
            attempts: self.policy.max_attempts,
            last: last_error.map(Box::new),
        })
    }

    /// Copy one stream into the remainder of the window.
    fn drain<D: Driver>(
        &self,
        reader: &mut dyn Read,
        index: u64,
        window: &Range<u64>,
        written: &mut u64,
        region: &SharedRegion<D>,
    ) -> CacheResult<Drained> {
        let len = window.end - window.start;
        let mut buf = vec![0u8; chunk_len(len - *written)];

        while *written < len {
            if self.cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            let want = chunk_len(len - *written).min(buf.len());
            let n = match reader.read(&mut buf[..want]) {
                Ok(0) => return Ok(Drained::Short),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Ok(Drained::Failed(CacheError::fetch(e))),
            };

            region.write_at(window.start + *written, &buf[..n])?;
            *written += n as u64;
            trace!(block = index, n, written = *written, "block bytes written");
        }

        Ok(Drained::Filled)
    }

    /// Wait out the retry delay, waking early on cancellation.
    fn pause(&self) -> CacheResult<()> {
        let deadline = Instant::now() + self.policy.retry_delay;
        loop {
            if self.cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

fn chunk_len(remaining: u64) -> usize {
    usize::try_from(remaining).map_or(READ_CHUNK, |r| r.min(READ_CHUNK))
}
