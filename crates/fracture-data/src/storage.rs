//! Durable byte storage for encoded saves.

use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Where saves live. One blob, replaced whole on every write.
pub trait Storage: Send + Sync {
    /// The last blob written, or `None` if nothing was ever saved.
    fn read(&self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the stored blob.
    fn write(&self, data: &[u8]) -> Result<(), StorageError>;

    /// Keep `data` aside without touching the main blob. Earlier backups
    /// are never overwritten.
    fn write_backup(&self, data: &[u8]) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// A single file. Writes go to a sibling temp file that is then renamed
/// over the target, so readers never see a half-written save.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<file name><suffix>` next to the save.
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    /// First of `<name>.corrupt`, `<name>.corrupt.1`, ... that does not exist.
    fn backup_path(&self) -> PathBuf {
        std::iter::once(self.sibling(".corrupt"))
            .chain((1u32..).map(|n| self.sibling(&format!(".corrupt.{n}"))))
            .find(|path| !path.exists())
            .unwrap_or_else(|| self.sibling(".corrupt"))
    }

    fn io_error(&self, source: io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Storage for FileStorage {
    fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn write(&self, data: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let temp = self.temp_path();
        fs::write(&temp, data).map_err(|e| self.io_error(e))?;
        fs::rename(&temp, &self.path).map_err(|e| self.io_error(e))
    }

    fn write_backup(&self, data: &[u8]) -> Result<(), StorageError> {
        let path = self.backup_path();
        fs::write(&path, data).map_err(|source| StorageError::Io { path, source })
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// In-process storage with a write counter and a failure switch.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<Option<Vec<u8>>>,
    backups: Mutex<Vec<Vec<u8>>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that already holds `data`.
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(Some(data)),
            ..Self::default()
        }
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent write, backups included, fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.data.lock().clone()
    }

    /// Backups in the order they were taken.
    pub fn backups(&self) -> Vec<Vec<u8>> {
        self.backups.lock().clone()
    }

    fn check_failing(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("write failure injected".into()));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.lock().clone())
    }

    fn write(&self, data: &[u8]) -> Result<(), StorageError> {
        self.check_failing()?;
        *self.data.lock() = Some(data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_backup(&self, data: &[u8]) -> Result<(), StorageError> {
        self.check_failing()?;
        self.backups.lock().push(data.to_vec());
        Ok(())
    }
}
