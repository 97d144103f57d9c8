//! Definition of the command line interface (CLI).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use reportify::{Report, ResultExt};
use serde::Serialize;
use tracing::info;

use otaboot::command::{CommandRunner, RecordingRunner, SystemRunner};
use otaboot::config::{load_config, CONFIG_PATH};
use otaboot::storage::FileRebootFlagStore;
use otaboot::{Bootloader, RollbackMode, TargetInfo};

reportify::new_whatever_type! {
    CtrlError
}

pub type CtrlResult<T> = Result<T, Report<CtrlError>>;

/// Exit code of `reboot-detected` if no reboot has been detected.
const EXIT_NOT_DETECTED: u8 = 2;

pub fn main() -> CtrlResult<ExitCode> {
    crate::logging::init();
    run(Args::parse())
}

/// Run the given command.
pub fn run(args: Args) -> CtrlResult<ExitCode> {
    let mut config = load_config(args.config.as_deref().unwrap_or(Path::new(CONFIG_PATH)))
        .whatever("unable to load configuration")?;
    if let Some(rollback_mode) = args.rollback_mode {
        config.bootloader.rollback_mode = rollback_mode;
    }
    let storage = FileRebootFlagStore::new(&config.storage.path);
    let runner: Arc<dyn CommandRunner> = if args.dry_run {
        Arc::new(RecordingRunner::new())
    } else {
        Arc::new(SystemRunner::new(config.bootloader.command_timeout()))
    };
    let bootloader = Bootloader::with_runner(config.bootloader, &storage, runner);
    match &args.command {
        Command::Info { json } => {
            let output = InfoOutput {
                rollback_mode: bootloader.rollback_mode(),
                reboot_sentinel: bootloader.reboot_sentinel().to_path_buf(),
                reboot_detection_supported: bootloader.support_reboot_detection(),
                reboot_detected: bootloader.reboot_detected(),
            };
            if *json {
                serde_json::to_writer(std::io::stdout(), &output)
                    .whatever("unable to write info to stdout")?;
                println!();
            } else {
                println!("Rollback Mode: {}", output.rollback_mode);
                println!("Reboot Sentinel: {}", output.reboot_sentinel.display());
                println!(
                    "Reboot Detection: {}",
                    if output.reboot_detection_supported {
                        "supported"
                    } else {
                        "unsupported"
                    }
                );
                println!("Reboot Detected: {}", output.reboot_detected);
            }
        }
        Command::SetBootOk => bootloader.set_boot_ok(),
        Command::UpdateNotify => bootloader.update_notify(),
        Command::InstallNotify { sha256, name } => {
            let target = TargetInfo::new(name.as_deref().unwrap_or("<unnamed>"), sha256)
                .whatever("invalid target")?;
            bootloader.install_notify(&target);
        }
        Command::RebootFlag(flag_cmd) => match flag_cmd {
            RebootFlagCommand::Set => arm_reboot_detection(&bootloader, args.dry_run),
            RebootFlagCommand::Clear => disarm_reboot_detection(&bootloader, args.dry_run),
        },
        Command::RebootDetected => {
            let detected = bootloader.reboot_detected();
            println!("{detected}");
            if !detected {
                return Ok(ExitCode::from(EXIT_NOT_DETECTED));
            }
        }
        Command::Confirm => {
            if bootloader.reboot_detected() {
                info!("reboot detected, confirming successful boot");
                bootloader.set_boot_ok();
                disarm_reboot_detection(&bootloader, args.dry_run);
            } else {
                info!("no reboot detected, nothing to confirm");
            }
        }
        Command::Reboot { fake } => {
            arm_reboot_detection(&bootloader, args.dry_run);
            if args.dry_run {
                info!("dry run, not rebooting");
            } else {
                bootloader.reboot(*fake);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Arm reboot detection unless this is a dry run.
fn arm_reboot_detection(bootloader: &Bootloader, dry_run: bool) {
    if dry_run {
        info!("dry run, not arming reboot detection");
    } else {
        bootloader.reboot_flag_set();
    }
}

/// Disarm reboot detection unless this is a dry run.
fn disarm_reboot_detection(bootloader: &Bootloader, dry_run: bool) {
    if dry_run {
        info!("dry run, not disarming reboot detection");
    } else {
        bootloader.reboot_flag_clear();
    }
}

/// Output of the `info` command.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InfoOutput {
    rollback_mode: RollbackMode,
    reboot_sentinel: PathBuf,
    reboot_detection_supported: bool,
    reboot_detected: bool,
}

#[derive(Debug, Parser)]
#[clap(author, about)]
pub struct Args {
    /// Path of the configuration file.
    #[clap(long)]
    pub config: Option<PathBuf>,
    /// Override the configured rollback mode.
    #[clap(long)]
    pub rollback_mode: Option<RollbackMode>,
    /// Log bootloader environment commands instead of running them and leave the
    /// reboot detection state untouched.
    #[clap(long)]
    pub dry_run: bool,
    /// The command.
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Parser)]
pub enum Command {
    /// Show the bootloader configuration and reboot state.
    Info {
        /// Output information as JSON.
        #[clap(long)]
        json: bool,
    },
    /// Signal that the device booted successfully.
    SetBootOk,
    /// Prepare the bootloader right before rebooting into a new image.
    UpdateNotify,
    /// Stage a boot firmware upgrade for an installed target.
    InstallNotify {
        /// Hex-encoded SHA256 hash of the target.
        #[clap(long)]
        sha256: String,
        /// Name of the target.
        #[clap(long)]
        name: Option<String>,
    },
    /// Arm or disarm reboot detection.
    #[clap(subcommand)]
    RebootFlag(RebootFlagCommand),
    /// Check whether the device rebooted since reboot detection has been armed.
    RebootDetected,
    /// Confirm a successful boot if a reboot has been detected.
    Confirm,
    /// Arm reboot detection and reboot.
    Reboot {
        /// Only simulate the reboot.
        #[clap(long)]
        fake: bool,
    },
}

#[derive(Debug, Parser)]
pub enum RebootFlagCommand {
    /// Arm reboot detection.
    Set,
    /// Disarm reboot detection.
    Clear,
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::CommandFactory;

    use super::*;

    struct Fixture {
        temp_dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = tempfile::tempdir().unwrap();
            let root = temp_dir.path();
            fs::write(
                root.join("bootloader.toml"),
                format!(
                    "[bootloader]\nreboot-sentinel-dir = '{}'\nreboot-command = 'true'\n\n[storage]\npath = '{}'\n",
                    root.join("session").display(),
                    root.join("data/need-reboot").display(),
                ),
            )
            .unwrap();
            Self { temp_dir }
        }

        fn run(&self, args: &[&str]) {
            let config = self.temp_dir.path().join("bootloader.toml");
            let mut argv = vec!["otaboot-ctrl", "--config", config.to_str().unwrap()];
            argv.extend_from_slice(args);
            run(Args::try_parse_from(argv).unwrap()).unwrap();
        }

        fn flag_exists(&self) -> bool {
            self.temp_dir.path().join("data/need-reboot").exists()
        }

        fn sentinel_exists(&self) -> bool {
            self.temp_dir.path().join("session/need_reboot").exists()
        }
    }

    #[test]
    fn test_dry_run_leaves_reboot_state_untouched() {
        let fixture = Fixture::new();
        fixture.run(&["--dry-run", "reboot"]);
        fixture.run(&["--dry-run", "reboot", "--fake"]);
        fixture.run(&["--dry-run", "reboot-flag", "set"]);
        assert!(!fixture.flag_exists());
        assert!(!fixture.sentinel_exists());
    }

    #[test]
    fn test_dry_run_keeps_armed_reboot() {
        let fixture = Fixture::new();
        fixture.run(&["reboot-flag", "set"]);
        assert!(fixture.flag_exists());
        assert!(fixture.sentinel_exists());
        fixture.run(&["--dry-run", "reboot-flag", "clear"]);
        fixture.run(&["--dry-run", "confirm"]);
        fixture.run(&["--dry-run", "reboot", "--fake"]);
        assert!(fixture.flag_exists());
        assert!(fixture.sentinel_exists());
        fixture.run(&["reboot", "--fake"]);
        assert!(fixture.flag_exists());
        assert!(!fixture.sentinel_exists());
        fixture.run(&["confirm"]);
        assert!(!fixture.flag_exists());
    }

    #[test]
    fn test_args() {
        Args::command().debug_assert();
        let args = Args::try_parse_from([
            "otaboot-ctrl",
            "--rollback-mode",
            "uboot-masked",
            "install-notify",
            "--sha256",
            "00",
        ])
        .unwrap();
        assert_eq!(args.rollback_mode, Some(RollbackMode::UbootMasked));
        assert!(matches!(args.command, Command::InstallNotify { .. }));
    }

    #[test]
    fn test_rejects_unknown_rollback_mode() {
        assert!(Args::try_parse_from(["otaboot-ctrl", "--rollback-mode", "grub", "info"]).is_err());
    }
}
