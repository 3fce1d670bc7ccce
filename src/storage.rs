// src/storage.rs
//! Durable storage for track documents

use crate::error::{Result, TrackerError};
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// File operations the recorder needs from its storage backend.
///
/// Calls block; the recorder service runs them on the blocking pool.
pub trait TrackStorage: Send + Sync {
    fn exists(&self, dir: &Path) -> bool;

    fn make_dirs(&self, dir: &Path) -> Result<()>;

    /// Read a whole file, `None` if it does not exist
    fn read_text(&self, path: &Path) -> Result<Option<String>>;

    /// Replace the file contents
    fn write_text(&self, path: &Path, text: &str) -> Result<()>;
}

/// Local filesystem storage
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl TrackStorage for FsStorage {
    fn exists(&self, dir: &Path) -> bool {
        dir.exists()
    }

    fn make_dirs(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        Ok(())
    }

    fn read_text(&self, path: &Path) -> Result<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::Io(e)),
        }
    }

    fn write_text(&self, path: &Path, text: &str) -> Result<()> {
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// In-memory storage, mainly for tests.
///
/// Counts writes and can be told to fail them.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<PathBuf, String>>,
    dirs: Mutex<BTreeSet<PathBuf>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        self.files.lock().ok()?.get(path).cloned()
    }

    pub fn file_names(&self) -> Vec<PathBuf> {
        self.files
            .lock()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn poisoned() -> TrackerError {
        TrackerError::Other("memory storage lock poisoned".to_string())
    }
}

impl TrackStorage for MemoryStorage {
    fn exists(&self, dir: &Path) -> bool {
        self.dirs.lock().map(|dirs| dirs.contains(dir)).unwrap_or(false)
    }

    fn make_dirs(&self, dir: &Path) -> Result<()> {
        let mut dirs = self.dirs.lock().map_err(|_| Self::poisoned())?;
        for ancestor in dir.ancestors() {
            dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn read_text(&self, path: &Path) -> Result<Option<String>> {
        let files = self.files.lock().map_err(|_| Self::poisoned())?;
        Ok(files.get(path).cloned())
    }

    fn write_text(&self, path: &Path, text: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackerError::Io(std::io::Error::new(
                ErrorKind::Other,
                format!("simulated write failure for {}", path.display()),
            )));
        }

        let mut files = self.files.lock().map_err(|_| Self::poisoned())?;
        files.insert(path.to_path_buf(), text.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
