//! "Job in progress" marker: presence means running, absence means not running.
//!
//! The controller only ever calls `begin` (and `end` to roll back a launch that
//! never happened). Clearing the marker after a real run is the job's business.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

pub trait RunMarker: Send + Sync {
    fn begin(&self) -> io::Result<()>;
    fn is_running(&self) -> bool;
    fn end(&self) -> io::Result<()>;
    /// Human-readable location for logs and for handing to the spawned job.
    fn describe(&self) -> String;
}

/// Marker backed by the existence of a file.
#[derive(Debug, Clone)]
pub struct FileMarker {
    path: PathBuf,
}

impl FileMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunMarker for FileMarker {
    fn begin(&self) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(&self.path, b"1")
    }

    fn is_running(&self) -> bool {
        self.path.exists()
    }

    fn end(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process flag for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryMarker {
    flag: AtomicBool,
}

impl MemoryMarker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunMarker for MemoryMarker {
    fn begin(&self) -> io::Result<()> {
        self.flag.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn end(&self) -> io::Result<()> {
        self.flag.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
