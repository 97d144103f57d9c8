use std::fs;
use std::path::Path;
use std::sync::Arc;

use otaboot::command::RecordingRunner;
use otaboot::firmware::FirmwareVersionResolver;
use otaboot::storage::{FileRebootFlagStore, MemoryRebootFlagStore};
use otaboot::{Bootloader, BootloaderConfig, RebootFlagStore, RollbackMode, TargetInfo};

const HASH: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";

fn config(root: &Path, rollback_mode: RollbackMode) -> BootloaderConfig {
    BootloaderConfig {
        rollback_mode,
        reboot_sentinel_dir: root.join("session"),
        firmware_deploy_root: root.join("deploy"),
        reboot_command: "true".to_owned(),
        ..BootloaderConfig::default()
    }
}

fn write_target_version(root: &Path, contents: &str) {
    let path = FirmwareVersionResolver::new(root.join("deploy")).version_file(HASH);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn test_install_cycle() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    write_target_version(root, "bootfirmware_version=2\n");
    let storage = FileRebootFlagStore::new(root.join("data/need-reboot"));
    let runner = Arc::new(RecordingRunner::new());
    runner.reply_with("fiovb_printenv bootfirmware_version", "1\n");
    let target = TargetInfo::new("lmp-2", HASH).unwrap();

    // Install the update and arm the reboot.
    {
        let bootloader =
            Bootloader::with_runner(config(root, RollbackMode::FioVb), &storage, runner.clone());
        assert!(bootloader.support_reboot_detection());
        assert!(!bootloader.reboot_detected());
        bootloader.install_notify(&target);
        bootloader.update_notify();
        bootloader.reboot_flag_set();
        assert!(!bootloader.reboot_detected());
        bootloader.reboot(true);
    }

    // Restart of the agent after the (simulated) reboot.
    let bootloader =
        Bootloader::with_runner(config(root, RollbackMode::FioVb), &storage, runner.clone());
    assert!(bootloader.reboot_detected());
    bootloader.set_boot_ok();
    bootloader.reboot_flag_clear();
    assert!(!bootloader.reboot_detected());
    assert!(!storage.load_need_reboot().unwrap());
    assert!(!bootloader.reboot_sentinel().exists());

    assert_eq!(
        runner.command_lines(),
        [
            "fiovb_printenv bootfirmware_version",
            "fiovb_setenv bootupgrade_available 1",
            "fiovb_setenv bootcount 0",
            "fiovb_setenv upgrade_available 1",
            "fiovb_setenv rollback 0",
            "fiovb_setenv bootcount 0",
            "fiovb_setenv upgrade_available 0",
        ]
    );
}

#[test]
fn test_restart_without_reboot() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let storage = MemoryRebootFlagStore::new();
    let runner = Arc::new(RecordingRunner::new());
    let bootloader =
        Bootloader::with_runner(config(root, RollbackMode::UbootGeneric), &storage, runner);
    bootloader.update_notify();
    bootloader.reboot_flag_set();
    // The agent restarts but the volatile sentinel survived, so no reboot happened.
    let bootloader = Bootloader::with_runner(
        config(root, RollbackMode::UbootGeneric),
        &storage,
        Arc::new(RecordingRunner::new()),
    );
    assert!(!bootloader.reboot_detected());
    assert!(storage.load_need_reboot().unwrap());
}

#[test]
fn test_insecure_sentinel_directory_disables_detection() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    fs::create_dir(root.join("session")).unwrap();
    fs::set_permissions(root.join("session"), fs::Permissions::from_mode(0o777)).unwrap();
    let storage = MemoryRebootFlagStore::new();
    let runner = Arc::new(RecordingRunner::new());
    let bootloader =
        Bootloader::with_runner(config(root, RollbackMode::UbootMasked), &storage, runner.clone());
    assert!(!bootloader.support_reboot_detection());
    bootloader.reboot_flag_set();
    assert!(!storage.load_need_reboot().unwrap());
    storage.store_need_reboot().unwrap();
    assert!(!bootloader.reboot_detected());
    bootloader.reboot_flag_clear();
    assert!(storage.load_need_reboot().unwrap());
    // Rollback handling is unaffected.
    bootloader.set_boot_ok();
    assert_eq!(
        runner.command_lines(),
        ["fw_setenv bootcount 0", "fw_setenv upgrade_available 0"]
    );
}
