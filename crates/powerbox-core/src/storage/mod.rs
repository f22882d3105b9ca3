//! SD card storage surfaces
//!
//! The box has two SD surfaces on one SPI bus: an internal card that is always
//! fitted (scripts) and a removable external card (session recordings). Both
//! are reached through the handle-based [`Volume`] trait; [`SdBus`] owns the
//! pair and switches bus context before every access.

mod bus;

pub use bus::{SdBus, Surface};

use alloc::string::String;
use alloc::vec::Vec;

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("card not present")]
    NotPresent,
    #[error("volume not mounted")]
    NotMounted,
    #[error("file not found")]
    NotFound,
    #[error("stale file handle")]
    BadHandle,
    #[error("card I/O error")]
    Io,
}

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate.
    Write,
    /// Create or append.
    Append,
}

/// Opaque handle to an open file on one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileHandle(pub u32);

/// A mountable FAT-style volume.
///
/// Paths are absolute (`/scripts/demo.json`). Directories are implicit: a
/// file path creates its parents.
pub trait Volume {
    /// Card detect.
    fn is_present(&mut self) -> bool;

    fn mount(&mut self) -> Result<(), StorageError>;

    /// Reassert bus ownership (chip select, clock rate) before use.
    fn activate(&mut self) {}

    fn exists(&mut self, path: &str) -> bool;

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, StorageError>;

    fn write(&mut self, file: FileHandle, data: &[u8]) -> Result<(), StorageError>;

    /// Commit buffered writes to the card.
    fn flush(&mut self, file: FileHandle) -> Result<(), StorageError>;

    /// File length in bytes, including unflushed data.
    fn size(&mut self, file: FileHandle) -> Result<u64, StorageError>;

    fn read_to_end(&mut self, file: FileHandle) -> Result<Vec<u8>, StorageError>;

    fn close(&mut self, file: FileHandle) -> Result<(), StorageError>;

    fn remove(&mut self, path: &str) -> Result<(), StorageError>;

    /// File names (not paths) directly inside `dir`.
    fn list(&mut self, dir: &str) -> Result<Vec<String>, StorageError>;
}

/// Read a whole file.
pub fn read_file<V: Volume + ?Sized>(volume: &mut V, path: &str) -> Result<Vec<u8>, StorageError> {
    let file = volume.open(path, OpenMode::Read)?;
    let result = volume.read_to_end(file);
    volume.close(file)?;
    result
}

/// Replace a whole file.
pub fn write_file<V: Volume + ?Sized>(
    volume: &mut V,
    path: &str,
    data: &[u8],
) -> Result<(), StorageError> {
    let file = volume.open(path, OpenMode::Write)?;
    let result = volume.write(file, data);
    volume.close(file)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MemVolume;

    #[test]
    fn test_file_helpers() {
        let mut vol = MemVolume::new();
        vol.mount().unwrap();
        write_file(&mut vol, "/scripts/a.json", b"{}").unwrap();
        assert!(vol.exists("/scripts/a.json"));
        assert_eq!(read_file(&mut vol, "/scripts/a.json").unwrap(), b"{}");
        assert_eq!(vol.list("/scripts").unwrap(), ["a.json"]);

        vol.remove("/scripts/a.json").unwrap();
        assert_eq!(
            read_file(&mut vol, "/scripts/a.json"),
            Err(StorageError::NotFound)
        );
    }

    #[test]
    fn test_ejected_volume_fails() {
        let mut vol = MemVolume::new();
        vol.mount().unwrap();
        let f = vol.open("/log.csv", OpenMode::Write).unwrap();
        vol.write(f, b"Time\n").unwrap();
        vol.eject();
        assert!(!vol.is_present());
        assert_eq!(vol.size(f), Err(StorageError::NotPresent));
        assert_eq!(vol.mount(), Err(StorageError::NotPresent));
    }
}
