//! Configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reportify::{Report, ResultExt};
use serde::{Deserialize, Serialize};

use crate::firmware::DEFAULT_DEPLOY_ROOT;
use crate::rollback::RollbackMode;
use crate::storage::DEFAULT_FLAG_PATH;

/// Path of the configuration file.
pub const CONFIG_PATH: &str = "/etc/otaboot/bootloader.toml";

reportify::new_whatever_type! {
    ConfigError
}

pub type ConfigResult<T> = Result<T, Report<ConfigError>>;

/// Structure of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub bootloader: BootloaderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Bootloader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct BootloaderConfig {
    /// Rollback mode of the bootloader.
    pub rollback_mode: RollbackMode,
    /// Directory of the reboot sentinel, should be on a volatile filesystem.
    pub reboot_sentinel_dir: PathBuf,
    /// Name of the reboot sentinel.
    pub reboot_sentinel_name: String,
    /// Shell command to reboot the device.
    pub reboot_command: String,
    /// Directory containing the deployments of update targets.
    pub firmware_deploy_root: PathBuf,
    /// Timeout in seconds for external commands, must be at least one.
    pub command_timeout: u64,
}

impl BootloaderConfig {
    /// Path of the reboot sentinel.
    pub fn reboot_sentinel(&self) -> PathBuf {
        self.reboot_sentinel_dir.join(&self.reboot_sentinel_name)
    }

    /// Timeout for external commands.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            rollback_mode: RollbackMode::None,
            reboot_sentinel_dir: PathBuf::from("/var/run/otaboot-session"),
            reboot_sentinel_name: "need_reboot".to_owned(),
            reboot_command: "/sbin/reboot".to_owned(),
            firmware_deploy_root: PathBuf::from(DEFAULT_DEPLOY_ROOT),
            command_timeout: 30,
        }
    }
}

/// Configuration of the durable reboot flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Path of the reboot flag file.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_FLAG_PATH),
        }
    }
}

/// Load the configuration, falling back to the defaults if the file does not exist.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let path = path.as_ref();
    Ok(if path.exists() {
        parse_config(
            &fs::read_to_string(path)
                .whatever("unable to read configuration file")
                .with_info(|_| format!("path: {path:?}"))?,
        )
        .with_info(|_| format!("path: {path:?}"))?
    } else {
        Config::default()
    })
}

/// Parse and validate the configuration.
pub fn parse_config(config: &str) -> ConfigResult<Config> {
    let config: Config = toml::from_str(config).whatever("unable to parse configuration")?;
    ensure!(
        config.bootloader.command_timeout >= 1,
        "command timeout must be at least one second, found {}",
        config.bootloader.command_timeout
    );
    Ok(config)
}
