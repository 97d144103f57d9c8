//! Bootloader façade.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::command::{CommandRunner, SystemRunner};
use crate::config::BootloaderConfig;
use crate::firmware::FirmwareVersionResolver;
use crate::reboot::{RebootCoordinator, RebootExecutor};
use crate::rollback::{RollbackMode, RollbackModeHandler};
use crate::storage::RebootFlagStore;
use crate::target::UpdateTarget;

/// Bootloader interface of the update agent.
///
/// Must be driven by a single thread. None of the operations fail: problems are logged
/// and leave the device in a state from which the operation can be retried.
#[derive(Debug)]
pub struct Bootloader<'s> {
    config: BootloaderConfig,
    rollback: RollbackModeHandler,
    coordinator: RebootCoordinator<'s>,
    executor: RebootExecutor,
}

impl<'s> Bootloader<'s> {
    /// Create a bootloader running environment commands as child processes.
    pub fn new(config: BootloaderConfig, storage: &'s dyn RebootFlagStore) -> Self {
        let runner = Arc::new(SystemRunner::new(config.command_timeout()));
        Self::with_runner(config, storage, runner)
    }

    /// Create a bootloader running environment commands with the given runner.
    pub fn with_runner(
        config: BootloaderConfig,
        storage: &'s dyn RebootFlagStore,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let rollback = RollbackModeHandler::new(
            config.rollback_mode,
            runner,
            FirmwareVersionResolver::new(&config.firmware_deploy_root),
        );
        let coordinator = RebootCoordinator::new(
            &config.reboot_sentinel_dir,
            &config.reboot_sentinel_name,
            storage,
        );
        let executor = RebootExecutor::new(
            coordinator.sentinel(),
            &config.reboot_command,
            config.command_timeout(),
        );
        info!(
            "using rollback mode {}, reboot detection {}",
            config.rollback_mode,
            if coordinator.support_reboot_detection() {
                "enabled"
            } else {
                "disabled"
            }
        );
        Self {
            config,
            rollback,
            coordinator,
            executor,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &BootloaderConfig {
        &self.config
    }

    /// The rollback mode.
    pub fn rollback_mode(&self) -> RollbackMode {
        self.rollback.mode()
    }

    /// Path of the reboot sentinel.
    pub fn reboot_sentinel(&self) -> &Path {
        self.coordinator.sentinel()
    }

    /// Signal that the device booted the new image successfully.
    pub fn set_boot_ok(&self) {
        self.rollback.set_boot_ok();
    }

    /// Prepare the bootloader environment right before rebooting into a new image.
    pub fn update_notify(&self) {
        self.rollback.update_notify();
    }

    /// Stage an upgrade of the boot firmware shipped with the target, if needed.
    pub fn install_notify(&self, target: &dyn UpdateTarget) {
        self.rollback.install_notify(target);
    }

    /// Whether reboots can be detected.
    pub fn support_reboot_detection(&self) -> bool {
        self.coordinator.support_reboot_detection()
    }

    /// Whether the device rebooted since [`Bootloader::reboot_flag_set`].
    pub fn reboot_detected(&self) -> bool {
        self.coordinator.reboot_detected()
    }

    /// Arm reboot detection.
    pub fn reboot_flag_set(&self) {
        self.coordinator.reboot_flag_set();
    }

    /// Disarm reboot detection.
    pub fn reboot_flag_clear(&self) {
        self.coordinator.reboot_flag_clear();
    }

    /// Reboot the device or, if `fake` is set, simulate a reboot.
    ///
    /// A simulated reboot removes the sentinel but keeps the durable flag, so it is
    /// detected like a real one.
    pub fn reboot(&self, fake: bool) {
        self.executor.reboot(fake);
    }
}
