//! Device identity and pairing token persistence (C3).
//!
//! The identity/token split and the atomic-write strategy on the token file
//! follow the device storage helper used elsewhere in this codebase: write
//! to a sibling temp file, then rename over the target so a crash mid-write
//! never corrupts the stored token.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to read token file: {0}")]
    Read(std::io::Error),
    #[error("failed to write token file: {0}")]
    Write(std::io::Error),
}

/// This device's identity, computed once at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// `hostname || "-" || short-hw-fingerprint`. Falls back to a random
    /// 5-digit suffix when no stable hardware fingerprint is available, as
    /// this process has no access to a hardware UUID API. The suffix is
    /// chosen once and persisted at `suffix_path`, since the identity must
    /// stay stable across restarts for a previously issued token to keep
    /// verifying.
    pub fn compute(suffix_path: &std::path::Path) -> Self {
        let hostname = gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "unknown-host".to_string());
        let suffix = load_or_create_suffix(suffix_path);
        DeviceId(format!("{}-{}", hostname, suffix))
    }
}

/// Reads the persisted fallback suffix, or rolls and saves a new one if
/// none exists yet. A write failure is not fatal: the suffix still works
/// for this run, it just won't survive to the next one.
fn load_or_create_suffix(path: &std::path::Path) -> u32 {
    if let Some(existing) = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
    {
        return existing;
    }
    let suffix = rand::rng().random_range(10000..99999);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, suffix.to_string());
    suffix
}

/// `<home>/.clipshare/device_suffix.txt`, the sibling file
/// [`DeviceId::compute`] persists its fallback suffix to.
pub fn default_suffix_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".clipshare").join("device_suffix.txt")
}

/// Persists the pairing token used to authenticate this device to peers it
/// has previously paired with.
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Reads the token, if any. A missing file is not an error — it means
    /// this device hasn't completed pairing yet; behave as unpaired.
    pub fn load(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(token) => Some(token.trim().to_string()),
            Err(_) => None,
        }
    }

    /// Writes `token` atomically: write to a temp sibling, then rename.
    pub fn store(&self, token: &str) -> Result<(), DeviceError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(DeviceError::Write)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, token).map_err(DeviceError::Write)?;
        std::fs::rename(&tmp_path, &self.path).map_err(DeviceError::Write)?;
        Ok(())
    }

    /// Deletes the token file. Missing-file is treated as already invalid.
    pub fn invalidate(&self) -> Result<(), DeviceError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeviceError::Write(e)),
        }
    }
}

/// `HMAC-SHA256(token, identity)`, hex-encoded, used as the authenticator
/// sent during Phase A of the handshake.
pub fn sign(token: &str, identity: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(token.as_bytes()).expect("HMAC accepts any key length");
    mac.update(identity.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies `signature` against `HMAC-SHA256(token, identity)` in constant
/// time via the MAC's own verification path.
pub fn verify(token: &str, identity: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac =
        Hmac::<Sha256>::new_from_slice(token.as_bytes()).expect("HMAC accepts any key length");
    mac.update(identity.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// `<home>/.clipshare/device_token.txt`, falling back to the current
/// directory if the home directory cannot be determined.
pub fn default_token_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".clipshare").join("device_token.txt")
}

/// `<temp>/unipaste_files`, the scratch directory received files and the
/// file cache live under.
pub fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("unipaste_files")
}
