//! Rollback modes and the bootloader environment they operate on.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::command::{Command, CommandRunner};
use crate::firmware::{FirmwareVersionResolver, BOOTFIRMWARE_VERSION};
use crate::target::UpdateTarget;

/// Bootloader backend whose environment implements rollback protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackMode {
    /// No rollback protection.
    #[default]
    None,
    /// U-Boot with a boot counter and a rollback flag.
    #[serde(alias = "uboot_generic")]
    UbootGeneric,
    /// U-Boot where the boot counter is only active while an upgrade is available.
    #[serde(alias = "uboot_masked")]
    UbootMasked,
    /// Foundries.io verified boot.
    #[serde(rename = "fiovb")]
    FioVb,
}

impl RollbackMode {
    /// The string representation of the rollback mode.
    pub fn as_str(self) -> &'static str {
        match self {
            RollbackMode::None => "none",
            RollbackMode::UbootGeneric => "uboot-generic",
            RollbackMode::UbootMasked => "uboot-masked",
            RollbackMode::FioVb => "fiovb",
        }
    }

    /// Tool to manipulate the bootloader environment with.
    pub fn env_tool(self) -> Option<EnvTool> {
        match self {
            RollbackMode::None => None,
            RollbackMode::UbootGeneric | RollbackMode::UbootMasked => Some(EnvTool::UBoot),
            RollbackMode::FioVb => Some(EnvTool::FioVb),
        }
    }

    /// Variables to set after a successful boot.
    fn boot_ok_env(self) -> &'static [(&'static str, &'static str)] {
        match self {
            RollbackMode::None => &[],
            RollbackMode::UbootGeneric => &[("bootcount", "0")],
            RollbackMode::UbootMasked | RollbackMode::FioVb => {
                &[("bootcount", "0"), ("upgrade_available", "0")]
            }
        }
    }

    /// Variables to set right before rebooting into a new image.
    fn update_env(self) -> &'static [(&'static str, &'static str)] {
        match self {
            RollbackMode::None => &[],
            RollbackMode::UbootGeneric => &[("bootcount", "0"), ("rollback", "0")],
            RollbackMode::UbootMasked | RollbackMode::FioVb => &[
                ("bootcount", "0"),
                ("upgrade_available", "1"),
                ("rollback", "0"),
            ],
        }
    }

    /// Whether the bootloader can upgrade its own firmware.
    fn supports_firmware_upgrade(self) -> bool {
        match self {
            RollbackMode::None | RollbackMode::UbootGeneric => false,
            RollbackMode::UbootMasked | RollbackMode::FioVb => true,
        }
    }
}

impl fmt::Display for RollbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown rollback mode.
#[derive(Debug, Clone, Error)]
#[error("unknown rollback mode {0:?}")]
pub struct UnknownRollbackMode(pub String);

impl FromStr for RollbackMode {
    type Err = UnknownRollbackMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RollbackMode::None),
            "uboot-generic" | "uboot_generic" => Ok(RollbackMode::UbootGeneric),
            "uboot-masked" | "uboot_masked" => Ok(RollbackMode::UbootMasked),
            "fiovb" => Ok(RollbackMode::FioVb),
            _ => Err(UnknownRollbackMode(s.to_owned())),
        }
    }
}

/// Command line tools reading and writing a bootloader environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvTool {
    /// `fw_setenv` and `fw_printenv` from U-Boot.
    UBoot,
    /// `fiovb_setenv` and `fiovb_printenv`.
    FioVb,
}

impl EnvTool {
    /// Command setting a variable.
    pub fn set(self, key: &str, value: &str) -> Command {
        let program = match self {
            EnvTool::UBoot => "fw_setenv",
            EnvTool::FioVb => "fiovb_setenv",
        };
        Command::new(program).arg(key).arg(value)
    }

    /// Command printing a variable.
    pub fn print(self, key: &str) -> Command {
        let program = match self {
            EnvTool::UBoot => "fw_printenv",
            EnvTool::FioVb => "fiovb_printenv",
        };
        Command::new(program).arg(key)
    }
}

/// Issues the bootloader environment commands of a rollback mode.
///
/// All commands are best effort. Failures are logged and do not abort the operation;
/// variables that could not be reset are reset again by the next successful call.
pub struct RollbackModeHandler {
    mode: RollbackMode,
    runner: Arc<dyn CommandRunner>,
    firmware: FirmwareVersionResolver,
}

impl RollbackModeHandler {
    pub fn new(
        mode: RollbackMode,
        runner: Arc<dyn CommandRunner>,
        firmware: FirmwareVersionResolver,
    ) -> Self {
        Self {
            mode,
            runner,
            firmware,
        }
    }

    /// The rollback mode.
    pub fn mode(&self) -> RollbackMode {
        self.mode
    }

    /// Signal that the device booted successfully.
    pub fn set_boot_ok(&self) {
        self.set_env(self.mode.boot_ok_env());
    }

    /// Prepare the environment right before rebooting into a new image.
    pub fn update_notify(&self) {
        self.set_env(self.mode.update_env());
    }

    /// Stage an upgrade of the boot firmware if the target ships a different version.
    pub fn install_notify(&self, target: &dyn UpdateTarget) {
        if !self.mode.supports_firmware_upgrade() {
            return;
        }
        let Some(tool) = self.mode.env_tool() else {
            return;
        };
        let target_version = self.firmware.resolve(target);
        info!(
            "target boot firmware version: \"{}\"",
            target_version.as_bytes().escape_ascii()
        );
        let command = tool.print(BOOTFIRMWARE_VERSION);
        let current_version = match self.runner.run(&command) {
            Ok(output) => output,
            Err(report) => {
                warn!(
                    "unable to get current boot firmware version with `{command}`: {}",
                    report.error()
                );
                Vec::new()
            }
        };
        info!(
            "current boot firmware version: \"{}\"",
            current_version.escape_ascii()
        );
        if current_version == target_version.as_bytes() {
            info!("update of boot firmware is not needed");
        } else {
            info!("updating boot firmware");
            self.set_env(&[("bootupgrade_available", "1")]);
        }
    }

    fn set_env(&self, vars: &[(&str, &str)]) {
        let Some(tool) = self.mode.env_tool() else {
            return;
        };
        for (key, value) in vars {
            let command = tool.set(key, value);
            if let Err(report) = self.runner.run(&command) {
                warn!("unable to set `{key}={value}` with `{command}`: {}", report.error());
            }
        }
    }
}

impl fmt::Debug for RollbackModeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackModeHandler")
            .field("mode", &self.mode)
            .field("firmware", &self.firmware)
            .finish_non_exhaustive()
    }
}
