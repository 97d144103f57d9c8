//! Durable storage of the reboot flag.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use reportify::{ErrorExt, Report, ResultExt};

use crate::fsutils;

reportify::new_whatever_type! {
    StorageError
}

pub type StorageResult<T> = Result<T, Report<StorageError>>;

/// Default path of the file-backed reboot flag.
pub const DEFAULT_FLAG_PATH: &str = "/var/lib/otaboot/need-reboot";

/// Durable storage of the flag recording that the device has been told to reboot.
///
/// Implementations must be crash-safe: once a call returned successfully, its effect
/// must survive a power loss.
pub trait RebootFlagStore {
    /// Load the flag.
    fn load_need_reboot(&self) -> StorageResult<bool>;

    /// Set the flag.
    fn store_need_reboot(&self) -> StorageResult<()>;

    /// Clear the flag.
    fn clear_need_reboot(&self) -> StorageResult<()>;
}

/// Reboot flag represented by the existence of a file.
#[derive(Debug, Clone)]
pub struct FileRebootFlagStore {
    path: PathBuf,
}

impl FileRebootFlagStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the flag file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RebootFlagStore for FileRebootFlagStore {
    fn load_need_reboot(&self) -> StorageResult<bool> {
        match fs::symlink_metadata(&self.path) {
            Ok(_) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error
                .whatever("unable to load reboot flag")
                .with_context(format!("path: {:?}", self.path))),
        }
    }

    fn store_need_reboot(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).whatever("unable to create reboot flag directory")?;
        }
        fsutils::write_atomic(&self.path, b"").whatever("unable to store reboot flag")
    }

    fn clear_need_reboot(&self) -> StorageResult<()> {
        fsutils::remove_file_if_exists(&self.path).whatever("unable to clear reboot flag")?;
        if let Some(parent) = self.path.parent() {
            fsutils::sync_directory(parent).whatever("unable to persist cleared reboot flag")?;
        }
        Ok(())
    }
}

/// Reboot flag kept in memory.
///
/// The flag does not survive the process. Useful for simulations and testing.
#[derive(Debug, Default)]
pub struct MemoryRebootFlagStore {
    need_reboot: AtomicBool,
}

impl MemoryRebootFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RebootFlagStore for MemoryRebootFlagStore {
    fn load_need_reboot(&self) -> StorageResult<bool> {
        Ok(self.need_reboot.load(Ordering::SeqCst))
    }

    fn store_need_reboot(&self) -> StorageResult<()> {
        self.need_reboot.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn clear_need_reboot(&self) -> StorageResult<()> {
        self.need_reboot.store(false, Ordering::SeqCst);
        Ok(())
    }
}
