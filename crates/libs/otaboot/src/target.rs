//! Descriptors of update targets.

use reportify::{bail, Report, ResultExt};

reportify::new_whatever_type! {
    /// Invalid target descriptor.
    TargetError
}

/// Image the update agent is installing.
pub trait UpdateTarget {
    /// Name of the target, for diagnostics.
    fn name(&self) -> &str;

    /// Hex-encoded SHA256 digest identifying the target's content.
    fn sha256_hash(&self) -> &str;
}

/// Plain target descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    name: String,
    sha256: String,
}

impl TargetInfo {
    /// Create a descriptor from a name and a hex-encoded SHA256 digest.
    ///
    /// The digest is normalized to lowercase.
    pub fn new(name: impl Into<String>, sha256: &str) -> Result<Self, Report<TargetError>> {
        let digest = hex::decode(sha256).whatever("target hash is not hex-encoded")?;
        if digest.len() != 32 {
            bail!(
                "target hash must have 32 bytes, found {} bytes",
                digest.len()
            );
        }
        Ok(Self {
            name: name.into(),
            sha256: hex::encode(digest),
        })
    }
}

impl UpdateTarget for TargetInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn sha256_hash(&self) -> &str {
        &self.sha256
    }
}
