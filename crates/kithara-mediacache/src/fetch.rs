#![forbid(unsafe_code)]

//! Range-fetch capability and the fetchers shipped with the crate.

use std::{
    fs::File,
    io::{self, Cursor, Read, Seek, SeekFrom},
    ops::Range,
    path::PathBuf,
};

use bytes::Bytes;

/// Byte stream returned by a [`RangeFetch`]. Dropping it closes the stream.
pub type RangeReader = Box<dyn Read + Send>;

/// Supplies bytes for an arbitrary half-open range of the logical object.
///
/// The returned stream starts at `range.start`. Consumed without error it
/// yields exactly `range.end - range.start` bytes; it may yield fewer and then
/// fail, in which case the caller resumes from where the stream stopped.
pub trait RangeFetch: Send + Sync + 'static {
    fn fetch(&self, range: Range<u64>) -> io::Result<RangeReader>;
}

impl<F> RangeFetch for F
where
    F: Fn(Range<u64>) -> io::Result<RangeReader> + Send + Sync + 'static,
{
    fn fetch(&self, range: Range<u64>) -> io::Result<RangeReader> {
        self(range)
    }
}

/// Serves ranges from a local file, opening it once per request.
#[derive(Clone, Debug)]
pub struct LocalFileFetch {
    path: PathBuf,
}

impl LocalFileFetch {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl RangeFetch for LocalFileFetch {
    fn fetch(&self, range: Range<u64>) -> io::Result<RangeReader> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(range.start))?;
        Ok(Box::new(file.take(range.end.saturating_sub(range.start))))
    }
}

/// Serves ranges from an in-memory buffer.
#[derive(Clone, Debug)]
pub struct MemoryFetch {
    data: Bytes,
}

impl MemoryFetch {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl RangeFetch for MemoryFetch {
    fn fetch(&self, range: Range<u64>) -> io::Result<RangeReader> {
        let len = self.data.len() as u64;
        if range.start > range.end || range.end > len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("range {range:?} outside source of {len} bytes"),
            ));
        }
        #[expect(clippy::cast_possible_truncation)] // bounded by an in-memory length
        let slice = self.data.slice(range.start as usize..range.end as usize);
        Ok(Box::new(Cursor::new(slice)))
    }
}
