#![forbid(unsafe_code)]

//! Mmap-backed region driver.
//!
//! [`MmapDriver`] allocates a file of exactly the requested length and maps it
//! read-write with `mmap-io`. All access goes through bounds-checked
//! `read_into`/`update_region`, so disjoint windows of the same mapping can be
//! filled concurrently without handing out overlapping slices.

use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use mmap_io::MemoryMappedFile;
use tracing::{debug, warn};

use crate::{StorageError, StorageResult, driver::Driver, driver::check_bounds};

/// Options for allocating a [`MmapDriver`].
#[derive(Debug, Clone)]
pub struct MmapOptions {
    /// Path to the backing file. Created, or truncated if it already exists.
    pub path: PathBuf,
}

impl MmapOptions {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

/// Mmap-backed region driver.
///
/// The mapping owns the file descriptor; dropping it unmaps and closes.
pub struct MmapDriver {
    map: MemoryMappedFile,
    path: PathBuf,
    len: u64,
}

impl std::fmt::Debug for MmapDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapDriver")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Best-effort cleanup of a partially allocated file.
fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(?path, error = %e, "failed to remove partially allocated file");
    }
}

impl Driver for MmapDriver {
    type Options = MmapOptions;

    fn open(opts: MmapOptions, len: u64) -> StorageResult<Self> {
        if len == 0 {
            return Err(StorageError::EmptyRegion);
        }
        let path = opts.path;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Create {
                path: path.clone(),
                source,
            })?;
        }

        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| StorageError::Create {
                path: path.clone(),
                source,
            })?;

        if let Err(source) = handle.set_len(len) {
            drop(handle);
            discard(&path);
            return Err(StorageError::Resize { path, len, source });
        }
        drop(handle);

        let map = match MemoryMappedFile::open_rw(&path) {
            Ok(map) => map,
            Err(source) => {
                discard(&path);
                return Err(StorageError::Map { path, source });
            }
        };

        debug!(?path, len, "backing file mapped");
        Ok(Self { map, path, len })
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        check_bounds(offset, buf.len(), self.len)?;
        if buf.is_empty() {
            return Ok(());
        }
        self.map.read_into(offset, buf)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        check_bounds(offset, data.len(), self.len)?;
        if data.is_empty() {
            return Ok(());
        }
        self.map.update_region(offset, data)?;
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn release(self) -> StorageResult<()> {
        let Self { map, path, .. } = self;
        drop(map);

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(?path, "backing file released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(?path, "backing file already gone");
                Ok(())
            }
            Err(source) => Err(StorageError::Delete { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::*;
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    fn open_sizes_file_exactly(temp_dir: TempDir) {
        let path = temp_dir.path().join("sized.dat");
        let driver = MmapDriver::open(MmapOptions::new(&path), 5000).unwrap();

        assert_eq!(driver.len(), 5000);
        assert_eq!(driver.path(), Some(path.as_path()));
        assert_eq!(fs::metadata(&path).unwrap().len(), 5000);
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    fn open_truncates_existing_file(temp_dir: TempDir) {
        let path = temp_dir.path().join("stale.dat");
        fs::write(&path, vec![7u8; 10_000]).unwrap();

        let driver = MmapDriver::open(MmapOptions::new(&path), 100).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), 100);
        let mut buf = [0xffu8; 100];
        driver.read_at(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    fn open_creates_parent_dirs(temp_dir: TempDir) {
        let path = temp_dir.path().join("a/b/nested.dat");
        let driver = MmapDriver::open(MmapOptions::new(&path), 16).unwrap();
        assert!(path.exists());
        driver.release().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    fn zero_length_is_rejected(temp_dir: TempDir) {
        let path = temp_dir.path().join("empty.dat");
        let result = MmapDriver::open(MmapOptions::new(&path), 0);
        assert!(matches!(result, Err(StorageError::EmptyRegion)));
        assert!(!path.exists());
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    fn create_failure_reports_path(temp_dir: TempDir) {
        // A directory cannot be opened as a regular file.
        let path = temp_dir.path().join("dir");
        fs::create_dir(&path).unwrap();

        let err = MmapDriver::open(MmapOptions::new(&path), 16).unwrap_err();
        match err {
            StorageError::Create { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    fn write_then_read_round_trip(temp_dir: TempDir) {
        let driver = MmapDriver::open(MmapOptions::new(temp_dir.path().join("rw.dat")), 64).unwrap();

        driver.write_at(10, b"hello").unwrap();
        let mut buf = [0u8; 5];
        driver.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    fn out_of_bounds_access_fails(temp_dir: TempDir) {
        let driver = MmapDriver::open(MmapOptions::new(temp_dir.path().join("oob.dat")), 8).unwrap();

        let err = driver.write_at(6, b"abc").unwrap_err();
        assert!(matches!(
            err,
            StorageError::OutOfBounds {
                offset: 6,
                end: 9,
                len: 8
            }
        ));
        let mut buf = [0u8; 9];
        assert!(driver.read_at(0, &mut buf).is_err());
    }

    #[rstest]
    #[timeout(Duration::from_secs(2))]
    fn disjoint_concurrent_writes(temp_dir: TempDir) {
        let driver = MmapDriver::open(MmapOptions::new(temp_dir.path().join("par.dat")), 4096).unwrap();

        std::thread::scope(|s| {
            for i in 0..4u8 {
                let driver = &driver;
                s.spawn(move || {
                    driver
                        .write_at(u64::from(i) * 1024, &[i + 1; 1024])
                        .unwrap();
                });
            }
        });

        let mut buf = vec![0u8; 4096];
        driver.read_at(0, &mut buf).unwrap();
        for (i, chunk) in buf.chunks(1024).enumerate() {
            assert!(chunk.iter().all(|&b| usize::from(b) == i + 1));
        }
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    fn release_deletes_file(temp_dir: TempDir) {
        let path = temp_dir.path().join("gone.dat");
        let driver = MmapDriver::open(MmapOptions::new(&path), 32).unwrap();
        assert!(path.exists());

        driver.release().unwrap();
        assert!(!path.exists());
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    fn release_tolerates_missing_file(temp_dir: TempDir) {
        let path = temp_dir.path().join("vanished.dat");
        let driver = MmapDriver::open(MmapOptions::new(&path), 32).unwrap();
        fs::remove_file(&path).unwrap();

        driver.release().unwrap();
    }
}
