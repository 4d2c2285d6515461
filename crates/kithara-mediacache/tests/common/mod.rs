#![allow(dead_code)]

use std::{
    io::{self, Cursor, Read},
    ops::Range,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use kithara_mediacache::{RangeFetch, RangeReader};
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Deterministic, non-repeating-per-block test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Write `data` to `<dir>/source.bin` and return the path.
pub fn write_source(dir: &TempDir, data: &[u8]) -> PathBuf {
    let path = dir.path().join("source.bin");
    std::fs::write(&path, data).expect("write source file");
    path
}

/// What the next `fetch` call should do.
#[derive(Clone, Copy, Debug)]
pub enum Behavior {
    /// Serve the full range.
    Serve,
    /// Fail to open the range.
    OpenError,
    /// Serve this many bytes, then fail the read.
    BreakAfter(usize),
}

/// Recording fetcher over an in-memory source.
///
/// Plays `script` in order, then falls back to `fallback` for every later call.
pub struct RecordingFetch {
    source: Arc<[u8]>,
    script: Mutex<Vec<Behavior>>,
    fallback: Behavior,
    latency: Duration,
    calls: Mutex<Vec<(Range<u64>, Instant)>>,
    opens: AtomicUsize,
}

impl RecordingFetch {
    pub fn new(source: Vec<u8>) -> Arc<Self> {
        Self::scripted(source, Vec::new(), Behavior::Serve, Duration::ZERO)
    }

    pub fn failing(source: Vec<u8>) -> Arc<Self> {
        Self::scripted(source, Vec::new(), Behavior::OpenError, Duration::ZERO)
    }

    pub fn scripted(
        source: Vec<u8>,
        mut script: Vec<Behavior>,
        fallback: Behavior,
        latency: Duration,
    ) -> Arc<Self> {
        script.reverse();
        Arc::new(Self {
            source: source.into(),
            script: Mutex::new(script),
            fallback,
            latency,
            calls: Mutex::new(Vec::new()),
            opens: AtomicUsize::new(0),
        })
    }

    /// Number of `fetch` calls so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn ranges(&self) -> Vec<Range<u64>> {
        self.calls.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(_, t)| *t).collect()
    }
}

/// Reader that fails once its prefix is consumed.
struct Breaking(Cursor<Vec<u8>>);

impl Read for Breaking {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "stream reset")),
            n => Ok(n),
        }
    }
}

/// Share one recording fetcher between a file and the test.
pub struct Shared(pub Arc<RecordingFetch>);

impl RangeFetch for Shared {
    fn fetch(&self, range: Range<u64>) -> io::Result<RangeReader> {
        let this = &self.0;
        this.opens.fetch_add(1, Ordering::SeqCst);
        this.calls.lock().push((range.clone(), Instant::now()));
        if !this.latency.is_zero() {
            std::thread::sleep(this.latency);
        }

        let behavior = this.script.lock().pop().unwrap_or(this.fallback);
        let bytes = this.source[range.start as usize..range.end as usize].to_vec();
        match behavior {
            Behavior::Serve => Ok(Box::new(Cursor::new(bytes))),
            Behavior::OpenError => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "range request timed out",
            )),
            Behavior::BreakAfter(n) => Ok(Box::new(Breaking(Cursor::new(bytes[..n].to_vec())))),
        }
    }
}
