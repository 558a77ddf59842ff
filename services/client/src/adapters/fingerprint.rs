//! services/client/src/adapters/fingerprint.rs
//!
//! Derives a stable device fingerprint from the host machine id.

use async_trait::async_trait;
use personalization_core::ports::{FingerprintProvider, PortError, PortResult};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

const FINGERPRINT_LEN: usize = 32;

/// Hashes the contents of a machine-id file (e.g. `/etc/machine-id`).
///
/// The raw id never leaves the host; only a truncated SHA-256 digest is reported.
#[derive(Clone, Debug)]
pub struct MachineFingerprint {
    path: PathBuf,
}

impl MachineFingerprint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FingerprintProvider for MachineFingerprint {
    async fn fingerprint(&self) -> PortResult<String> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            PortError::Unexpected(format!("reading {}: {}", self.path.display(), e))
        })?;
        let machine_id = raw.trim();
        if machine_id.is_empty() {
            return Err(PortError::InvalidResponse(format!(
                "{} is empty",
                self.path.display()
            )));
        }

        let digest = format!("{:x}", Sha256::digest(format!("personalize:{}", machine_id)));
        Ok(digest[..FINGERPRINT_LEN].to_string())
    }
}
