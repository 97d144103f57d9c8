//! Boot firmware versions shipped with update targets.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::target::UpdateTarget;

/// Bootloader environment variable holding the boot firmware version.
pub const BOOTFIRMWARE_VERSION: &str = "bootfirmware_version";

/// Default directory containing the deployments of update targets.
pub const DEFAULT_DEPLOY_ROOT: &str = "/ostree/deploy/lmp/deploy";

/// Location of the version file relative to a deployment.
const VERSION_FILE: &str = "usr/lib/firmware/version.txt";

/// Boot firmware version of an update target.
///
/// Versions are kept as raw bytes and compared byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetFirmwareVersion {
    /// The version file contained `bootfirmware_version=`, which has been stripped.
    Keyed(Vec<u8>),
    /// The version file did not contain the key; its contents are used verbatim.
    Bare(Vec<u8>),
    /// The version file could not be read.
    Unreadable,
}

impl TargetFirmwareVersion {
    /// Parse the contents of a version file.
    ///
    /// Only the first occurrence of `bootfirmware_version=` is removed; everything else,
    /// including trailing whitespace, is kept as is.
    pub fn parse(contents: &[u8]) -> Self {
        let key = format!("{BOOTFIRMWARE_VERSION}=");
        let start = contents
            .windows(key.len())
            .position(|window| window == key.as_bytes());
        match start {
            Some(start) => {
                let mut version = contents[..start].to_vec();
                version.extend_from_slice(&contents[start + key.len()..]);
                Self::Keyed(version)
            }
            None => Self::Bare(contents.to_vec()),
        }
    }

    /// Version to compare with the version reported by the bootloader.
    ///
    /// An unreadable version file yields an empty version.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Keyed(version) | Self::Bare(version) => version,
            Self::Unreadable => &[],
        }
    }
}

/// Resolves the boot firmware version of update targets.
#[derive(Debug, Clone)]
pub struct FirmwareVersionResolver {
    deploy_root: PathBuf,
}

impl FirmwareVersionResolver {
    /// Create a resolver for deployments below the given directory.
    pub fn new(deploy_root: impl Into<PathBuf>) -> Self {
        Self {
            deploy_root: deploy_root.into(),
        }
    }

    /// Directory containing the deployments.
    pub fn deploy_root(&self) -> &Path {
        &self.deploy_root
    }

    /// Path of the version file of the target with the given hash.
    pub fn version_file(&self, sha256_hash: &str) -> PathBuf {
        self.deploy_root
            .join(format!("{sha256_hash}.0"))
            .join(VERSION_FILE)
    }

    /// Resolve the boot firmware version of the given target.
    pub fn resolve(&self, target: &dyn UpdateTarget) -> TargetFirmwareVersion {
        let path = self.version_file(target.sha256_hash());
        info!("reading target boot firmware version file {path:?}");
        match fs::read(&path) {
            Ok(contents) => TargetFirmwareVersion::parse(&contents),
            Err(error) => {
                warn!(
                    "unable to read boot firmware version of target {:?}: {error}",
                    target.name()
                );
                TargetFirmwareVersion::Unreadable
            }
        }
    }
}

impl Default for FirmwareVersionResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DEPLOY_ROOT)
    }
}
