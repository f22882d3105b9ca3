//! Host-backed clocks, storage and EEPROM.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use powerbox_core::settings::{NvStore, SettingsError};
use powerbox_core::storage::{FileHandle, OpenMode, StorageError, Volume};
use powerbox_core::time::{Clock, WallClock};

/// Milliseconds since the simulator started.
pub struct HostClock {
    boot: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Clock for HostClock {
    fn now_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }
}

pub struct HostWall;

impl WallClock for HostWall {
    fn epoch_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

fn io_error(context: &str, e: io::Error) -> StorageError {
    debug!("{}: {}", context, e);
    StorageError::Io
}

struct OpenFile {
    path: PathBuf,
    file: File,
    pending: Vec<u8>,
}

/// An SD card backed by a host directory.
///
/// Card detect is a shared flag so the console can pull and reinsert the
/// card while the app owns the volume.
pub struct DirVolume {
    root: PathBuf,
    present: Rc<Cell<bool>>,
    mounted: bool,
    open: BTreeMap<u32, OpenFile>,
    next_handle: u32,
}

impl DirVolume {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            present: Rc::new(Cell::new(true)),
            mounted: false,
            open: BTreeMap::new(),
            next_handle: 1,
        }
    }

    /// Card-detect handle.
    pub fn presence(&self) -> Rc<Cell<bool>> {
        self.present.clone()
    }

    fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn ready(&self) -> Result<(), StorageError> {
        if !self.present.get() {
            Err(StorageError::NotPresent)
        } else if !self.mounted {
            Err(StorageError::NotMounted)
        } else {
            Ok(())
        }
    }

    fn check_card(&mut self) -> Result<(), StorageError> {
        if !self.present.get() && self.mounted {
            warn!("{} pulled, dropping {} open files", self.root.display(), self.open.len());
            self.mounted = false;
            self.open.clear();
        }
        self.ready()
    }

    fn entry(&mut self, file: FileHandle) -> Result<&mut OpenFile, StorageError> {
        self.check_card()?;
        self.open.get_mut(&file.0).ok_or(StorageError::BadHandle)
    }
}

impl Volume for DirVolume {
    fn is_present(&mut self) -> bool {
        self.present.get()
    }

    fn mount(&mut self) -> Result<(), StorageError> {
        if !self.present.get() {
            return Err(StorageError::NotPresent);
        }
        fs::create_dir_all(&self.root).map_err(|e| io_error("mount", e))?;
        self.mounted = true;
        Ok(())
    }

    fn exists(&mut self, path: &str) -> bool {
        self.check_card().is_ok() && self.host_path(path).is_file()
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, StorageError> {
        self.check_card()?;
        let host = self.host_path(path);
        if mode != OpenMode::Read {
            if let Some(parent) = host.parent() {
                fs::create_dir_all(parent).map_err(|e| io_error("mkdir", e))?;
            }
        }
        let file = match mode {
            OpenMode::Read => File::open(&host),
            OpenMode::Write => File::create(&host),
            OpenMode::Append => OpenOptions::new().create(true).append(true).open(&host),
        }
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound,
            _ => io_error(path, e),
        })?;

        let id = self.next_handle;
        self.next_handle += 1;
        self.open.insert(
            id,
            OpenFile {
                path: host,
                file,
                pending: Vec::new(),
            },
        );
        Ok(FileHandle(id))
    }

    fn write(&mut self, file: FileHandle, data: &[u8]) -> Result<(), StorageError> {
        self.entry(file)?.pending.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self, file: FileHandle) -> Result<(), StorageError> {
        let open = self.entry(file)?;
        let pending = std::mem::take(&mut open.pending);
        open.file
            .write_all(&pending)
            .and_then(|()| open.file.flush())
            .map_err(|e| io_error("flush", e))
    }

    fn size(&mut self, file: FileHandle) -> Result<u64, StorageError> {
        let open = self.entry(file)?;
        let committed = fs::metadata(&open.path)
            .map_err(|e| io_error("size", e))?
            .len();
        Ok(committed + open.pending.len() as u64)
    }

    fn read_to_end(&mut self, file: FileHandle) -> Result<Vec<u8>, StorageError> {
        let open = self.entry(file)?;
        let mut data = fs::read(&open.path).map_err(|e| io_error("read", e))?;
        data.extend_from_slice(&open.pending);
        Ok(data)
    }

    fn close(&mut self, file: FileHandle) -> Result<(), StorageError> {
        self.flush(file)?;
        self.open.remove(&file.0);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        self.check_card()?;
        fs::remove_file(self.host_path(path)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound,
            _ => io_error(path, e),
        })
    }

    fn list(&mut self, dir: &str) -> Result<Vec<String>, StorageError> {
        self.check_card()?;
        let entries = match fs::read_dir(self.host_path(dir)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(dir, e)),
        };
        Ok(entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect())
    }
}

/// EEPROM image kept in a host file. Erased cells read as `0xFF`.
pub struct FileEeprom {
    path: PathBuf,
    cells: Vec<u8>,
}

impl FileEeprom {
    pub fn open(path: &Path, capacity: usize) -> io::Result<Self> {
        let mut cells = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        cells.resize(capacity, 0xFF);
        Ok(Self {
            path: path.to_path_buf(),
            cells,
        })
    }
}

impl NvStore for FileEeprom {
    fn capacity(&self) -> usize {
        self.cells.len()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), SettingsError> {
        let src = self
            .cells
            .get(offset..offset + buf.len())
            .ok_or(SettingsError::OutOfRange(self.cells.len()))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), SettingsError> {
        let capacity = self.cells.len();
        let dst = self
            .cells
            .get_mut(offset..offset + data.len())
            .ok_or(SettingsError::OutOfRange(capacity))?;
        dst.copy_from_slice(data);
        fs::write(&self.path, &self.cells).map_err(|e| {
            warn!("EEPROM image {} not written: {}", self.path.display(), e);
            SettingsError::Io
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("powerbox-sim-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_dir_volume_write_flush_list() {
        let root = scratch("volume");
        let mut vol = DirVolume::new(&root);
        assert_eq!(vol.open("/a.csv", OpenMode::Write), Err(StorageError::NotMounted));
        vol.mount().unwrap();

        let f = vol.open("/scripts/demo.json", OpenMode::Write).unwrap();
        vol.write(f, b"{}").unwrap();
        assert_eq!(vol.size(f), Ok(2), "size counts pending bytes");
        vol.close(f).unwrap();
        assert_eq!(fs::read(root.join("scripts/demo.json")).unwrap(), b"{}");
        assert_eq!(vol.list("/scripts").unwrap(), ["demo.json"]);
        assert!(vol.list("/nothing").unwrap().is_empty());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_pulled_card_invalidates_handles() {
        let root = scratch("pull");
        let mut vol = DirVolume::new(&root);
        let card = vol.presence();
        vol.mount().unwrap();
        let f = vol.open("/log.csv", OpenMode::Write).unwrap();
        card.set(false);
        assert_eq!(vol.size(f), Err(StorageError::NotPresent));
        card.set(true);
        vol.mount().unwrap();
        assert_eq!(vol.size(f), Err(StorageError::BadHandle));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_eeprom_survives_reopen() {
        let dir = scratch("eeprom");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("eeprom.bin");
        let mut nv = FileEeprom::open(&path, 64).unwrap();
        let mut blank = [0u8; 4];
        nv.read(0, &mut blank).unwrap();
        assert_eq!(blank, [0xFF; 4]);
        nv.write(8, &[1, 2, 3]).unwrap();
        assert!(nv.write(62, &[0; 4]).is_err());

        let mut again = FileEeprom::open(&path, 64).unwrap();
        let mut back = [0u8; 3];
        again.read(8, &mut back).unwrap();
        assert_eq!(back, [1, 2, 3]);

        let _ = fs::remove_dir_all(&dir);
    }
}
