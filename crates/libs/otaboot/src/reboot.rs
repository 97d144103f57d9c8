//! Detection and execution of reboots.
//!
//! Whether a reboot happened is derived from two signals: a durable flag kept by a
//! [`RebootFlagStore`] and a sentinel file on a volatile filesystem (e.g., `/run` or
//! `/var/run` backed by tmpfs). Both are set when a reboot is armed. A reboot wipes
//! the sentinel but not the flag, hence, a set flag without sentinel means that the
//! device went through a reboot since it was armed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::unistd::{setuid, sync, Uid};
use tracing::{debug, error, info, warn};

use crate::command::{Command, CommandResult, CommandRunner, SystemRunner};
use crate::fsutils;
use crate::storage::RebootFlagStore;

/// Tracks whether an armed reboot has happened.
pub struct RebootCoordinator<'s> {
    sentinel: PathBuf,
    storage: &'s dyn RebootFlagStore,
    supported: bool,
}

impl<'s> RebootCoordinator<'s> {
    /// Create a coordinator with the sentinel `name` in `sentinel_dir`.
    ///
    /// The sentinel directory is created securely. If that fails, reboot detection is
    /// disabled for the lifetime of the coordinator.
    pub fn new(sentinel_dir: &Path, name: &str, storage: &'s dyn RebootFlagStore) -> Self {
        let supported = match fsutils::create_secure_directory(sentinel_dir) {
            Ok(()) => true,
            Err(report) => {
                warn!(
                    "unable to create {sentinel_dir:?} securely, reboot detection support disabled"
                );
                debug!("{report:?}");
                false
            }
        };
        Self {
            sentinel: sentinel_dir.join(name),
            storage,
            supported,
        }
    }

    /// Path of the sentinel file.
    pub fn sentinel(&self) -> &Path {
        &self.sentinel
    }

    /// Whether reboots can be detected.
    pub fn support_reboot_detection(&self) -> bool {
        self.supported
    }

    /// Whether the device rebooted since the reboot has been armed.
    pub fn reboot_detected(&self) -> bool {
        if !self.supported {
            return false;
        }
        let sentinel_exists = self.sentinel.exists();
        let need_reboot = self.storage.load_need_reboot().unwrap_or_else(|report| {
            warn!("unable to load reboot flag, assuming it is not set");
            debug!("{report:?}");
            false
        });
        need_reboot && !sentinel_exists
    }

    /// Arm reboot detection.
    pub fn reboot_flag_set(&self) {
        if !self.supported {
            return;
        }
        if let Err(report) = fsutils::write_empty_file(&self.sentinel) {
            // Without sentinel, setting the flag would signal a reboot right away.
            error!("unable to create reboot sentinel, reboot flag not set");
            debug!("{report:?}");
            return;
        }
        if let Err(report) = self.storage.store_need_reboot() {
            warn!("unable to store reboot flag");
            debug!("{report:?}");
        }
    }

    /// Disarm reboot detection.
    pub fn reboot_flag_clear(&self) {
        if !self.supported {
            return;
        }
        if let Err(report) = self.storage.clear_need_reboot() {
            warn!("unable to clear reboot flag");
            debug!("{report:?}");
        }
        if let Err(report) = fsutils::remove_file_if_exists(&self.sentinel) {
            warn!("unable to remove reboot sentinel");
            debug!("{report:?}");
        }
    }
}

impl fmt::Debug for RebootCoordinator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebootCoordinator")
            .field("sentinel", &self.sentinel)
            .field("supported", &self.supported)
            .finish_non_exhaustive()
    }
}

/// Reboots the device.
#[derive(Debug, Clone)]
pub struct RebootExecutor {
    sentinel: PathBuf,
    command: String,
    runner: SystemRunner,
}

impl RebootExecutor {
    /// Create an executor running the given shell command to reboot.
    ///
    /// The command is killed if it does not return within `timeout`.
    pub fn new(
        sentinel: impl Into<PathBuf>,
        command: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            sentinel: sentinel.into(),
            command: command.into(),
            runner: SystemRunner::new(timeout),
        }
    }

    /// Shell command used to reboot.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Reboot the device.
    ///
    /// A fake reboot only removes the sentinel, which makes the reboot detectable
    /// without actually rebooting. A real reboot requires root privileges. If they
    /// cannot be obtained, or the reboot command fails or times out, an error is
    /// logged and the device stays in its pre-reboot state.
    pub fn reboot(&self, fake: bool) {
        if fake {
            info!("simulating reboot");
            if let Err(report) = fsutils::remove_file_if_exists(&self.sentinel) {
                warn!("unable to remove reboot sentinel");
                debug!("{report:?}");
            }
            return;
        }
        if let Err(errno) = setuid(Uid::from_raw(0)) {
            error!("failed to set/verify a root user so cannot reboot system programmatically ({errno})");
            return;
        }
        // Make sure that no data is lost.
        sync();
        info!("rebooting with `{}`", self.command);
        if let Err(report) = self.run_command() {
            error!(
                "failed to execute the reboot command `{}`: {}",
                self.command,
                report.error()
            );
        }
    }

    fn run_command(&self) -> CommandResult<Vec<u8>> {
        self.runner
            .run(&Command::new("/bin/sh").arg("-c").arg(&self.command))
    }
}
