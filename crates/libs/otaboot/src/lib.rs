//! Bootloader rollback protection for over-the-air updates.
//!
//! The [`Bootloader`] keeps the bootloader environment of a device (boot counter,
//! upgrade and rollback flags) in line with the update agent and detects whether a
//! reboot into a freshly installed image actually happened.
//!
//! A typical install cycle looks as follows:
//!
//! 1. [`Bootloader::install_notify`] stages a boot firmware upgrade, if needed.
//! 2. [`Bootloader::update_notify`] and [`Bootloader::reboot_flag_set`] arm the reboot.
//! 3. [`Bootloader::reboot`] reboots the device.
//! 4. After the restart, [`Bootloader::reboot_detected`] tells whether the device has
//!    rebooted and, if so, [`Bootloader::set_boot_ok`] and
//!    [`Bootloader::reboot_flag_clear`] close the cycle.

/// Returns early with a whatever error if the condition does not hold.
///
/// `reportify` 0.1 only provides `bail!`, so this mirrors the usual `ensure!`.
macro_rules! ensure {
    ($cond:expr, $($args:tt)*) => {
        if !$cond {
            reportify::bail!($($args)*);
        }
    };
}

pub mod bootloader;
pub mod command;
pub mod config;
pub mod firmware;
pub mod fsutils;
pub mod reboot;
pub mod rollback;
pub mod storage;
pub mod target;

pub use bootloader::Bootloader;
pub use config::BootloaderConfig;
pub use rollback::RollbackMode;
pub use storage::RebootFlagStore;
pub use target::{TargetInfo, UpdateTarget};
