//! Storage medium boundary.
//!
//! The SD card driver (or the simulator's directory) implements [`Volume`];
//! everything above it deals in short relative paths such as
//! `data/20251218.csv`. Calls are blocking, just like the SPI card access they
//! stand in for.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage volume is not available")]
    Unavailable,
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("I/O failure during {operation}: {details}")]
    Io {
        operation: &'static str,
        details: String,
    },
}

/// One file found by [`Volume::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File name without directory
    pub name: String,
    pub size: u64,
    /// Last modification as a Unix epoch, when the medium keeps one
    pub modified: Option<i64>,
}

pub trait Volume {
    /// Whether the medium is mounted and usable right now.
    fn is_ready(&mut self) -> bool;

    /// Append to `path`, creating it if missing.
    ///
    /// Must only return once the bytes are durable (flushed/synced).
    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Create or truncate `path` with `data`.
    fn write(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Read into `buf` starting at `offset`; returns 0 at end of file.
    fn read_at(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn size(&mut self, path: &str) -> Result<u64, StorageError>;

    /// Plain files directly under `dir`. A missing directory lists as empty.
    fn list(&mut self, dir: &str) -> Result<Vec<FileEntry>, StorageError>;

    fn remove(&mut self, path: &str) -> Result<(), StorageError>;
}

/// Join a directory and a file name with a single `/`.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let mut path = String::with_capacity(dir.len() + name.len() + 1);
    if !dir.is_empty() {
        path.push_str(dir);
        path.push('/');
    }
    path.push_str(name.trim_start_matches('/'));
    path
}

/// RAM-backed volume used by tests and as a fallback when no card is present.
#[derive(Debug, Default, Clone)]
pub struct MemoryVolume {
    files: BTreeMap<String, Vec<u8>>,
    modified: BTreeMap<String, i64>,
    clock: Option<i64>,
    unavailable: bool,
}

impl MemoryVolume {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the card being pulled (`false`) or reinserted (`true`).
    pub fn set_available(&mut self, available: bool) {
        self.unavailable = !available;
    }

    /// Stamp later writes with `epoch` as their modification time.
    pub fn set_clock(&mut self, epoch: i64) {
        self.clock = Some(epoch);
    }

    fn touch(&mut self, path: &str) {
        if let Some(epoch) = self.clock {
            self.modified.insert(String::from(path), epoch);
        }
    }

    pub fn contents(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    fn ensure_ready(&self) -> Result<(), StorageError> {
        if self.unavailable {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl Volume for MemoryVolume {
    fn is_ready(&mut self) -> bool {
        !self.unavailable
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        self.ensure_ready()?;
        self.files
            .entry(String::from(path))
            .or_default()
            .extend_from_slice(data);
        self.touch(path);
        Ok(())
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        self.ensure_ready()?;
        self.files.insert(String::from(path), data.to_vec());
        self.touch(path);
        Ok(())
    }

    fn read_at(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.ensure_ready()?;
        let data = self
            .files
            .get(path)
            .ok_or_else(|| StorageError::NotFound(String::from(path)))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn size(&mut self, path: &str) -> Result<u64, StorageError> {
        self.ensure_ready()?;
        self.files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(String::from(path)))
    }

    fn list(&mut self, dir: &str) -> Result<Vec<FileEntry>, StorageError> {
        self.ensure_ready()?;
        let prefix = join_path(dir, "");
        Ok(self
            .files
            .iter()
            .filter_map(|(path, data)| {
                let name = path.strip_prefix(prefix.as_str())?;
                (!name.is_empty() && !name.contains('/')).then(|| FileEntry {
                    name: String::from(name),
                    size: data.len() as u64,
                    modified: self.modified.get(path).copied(),
                })
            })
            .collect())
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        self.ensure_ready()?;
        self.modified.remove(path);
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(String::from(path)))
    }
}
