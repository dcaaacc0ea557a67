//! Durable watermark: height of the last block published to the broker.
//!
//! The file variant keeps a single decimal height in a small text file. A missing file is
//! created on open and reads as 0. Every update replaces the file (temp file, fsync, rename,
//! directory fsync), so a crash leaves either the old or the new height on disk.

use crate::block::Height;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("watermark I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watermark file {path} holds an invalid height: {content:?}")]
    Corrupt { path: PathBuf, content: String },

    #[error("watermark lock poisoned")]
    Poisoned,

    #[error("watermark {0} has no next height")]
    Overflow(Height),
}

/// Single-value store of the last published height.
///
/// Implementations serialize all access internally; `get` and `set` may be called from the
/// catch-up task and the live consumer at the same time.
pub trait WatermarkStore: Send + Sync {
    /// Last persisted height, or 0 if nothing was ever persisted.
    fn get(&self) -> Result<Height, WatermarkError>;

    /// Persist `height`, replacing the previous value. Durable when this returns.
    fn set(&self, height: Height) -> Result<(), WatermarkError>;

    /// Discard prior progress.
    fn reset(&self) -> Result<(), WatermarkError> {
        self.set(0)
    }
}

/// File-backed watermark.
#[derive(Debug)]
pub struct FileWatermark {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileWatermark {
    /// Open the watermark file, creating it (and its parent directories) if absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WatermarkError> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| WatermarkError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::File::create(&path).map_err(|source| WatermarkError::Io {
                path: path.clone(),
                source,
            })?;
            tracing::info!(path = %path.display(), "created last read block file");
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> WatermarkError {
        WatermarkError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Make the rename itself durable.
    #[cfg(unix)]
    fn sync_parent(&self) -> Result<(), WatermarkError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(|source| WatermarkError::Io {
                path: parent.to_path_buf(),
                source,
            })
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> Result<(), WatermarkError> {
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

impl WatermarkStore for FileWatermark {
    fn get(&self) -> Result<Height, WatermarkError> {
        let _guard = self.lock.lock().map_err(|_| WatermarkError::Poisoned)?;
        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }
        trimmed.parse::<Height>().map_err(|_| WatermarkError::Corrupt {
            path: self.path.clone(),
            content: trimmed.to_string(),
        })
    }

    fn set(&self, height: Height) -> Result<(), WatermarkError> {
        let _guard = self.lock.lock().map_err(|_| WatermarkError::Poisoned)?;
        let tmp = self.temp_path();
        let mut file = fs::File::create(&tmp).map_err(|e| self.io_error(e))?;
        file.write_all(height.to_string().as_bytes())
            .map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        self.sync_parent()
    }
}

/// In-memory watermark (no durability). Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryWatermark {
    height: Mutex<Height>,
}

impl MemoryWatermark {
    pub fn new(height: Height) -> Self {
        Self {
            height: Mutex::new(height),
        }
    }
}

impl WatermarkStore for MemoryWatermark {
    fn get(&self) -> Result<Height, WatermarkError> {
        self.height
            .lock()
            .map(|h| *h)
            .map_err(|_| WatermarkError::Poisoned)
    }

    fn set(&self, height: Height) -> Result<(), WatermarkError> {
        let mut guard = self.height.lock().map_err(|_| WatermarkError::Poisoned)?;
        *guard = height;
        Ok(())
    }
}
