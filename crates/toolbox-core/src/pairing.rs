//! Pairing key: the shared secret that binds a browser tab to this engine.
//!
//! Lifecycle: read the explicit override if one is configured, otherwise read
//! the persisted key file, otherwise generate 256 random bits and persist them
//! with owner-only permissions. The key is never rotated automatically.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

const KEY_BYTES: usize = 32;

/// Where the active key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingSource {
    Environment,
    File,
    Generated,
}

/// Process-wide pairing secret. `Debug` is redacted.
#[derive(Clone)]
pub struct PairingKey {
    secret: String,
}

impl fmt::Debug for PairingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PairingKey(<redacted>)")
    }
}

impl PairingKey {
    /// Build a key from an explicit value (environment override, tests).
    pub fn from_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into().trim().to_owned(),
        }
    }

    /// Resolve the key for this process: override, then file, then generate.
    pub fn resolve(
        override_secret: Option<&str>,
        path: &Path,
    ) -> io::Result<(Self, PairingSource)> {
        if let Some(secret) = override_secret.map(str::trim).filter(|s| !s.is_empty()) {
            if secret.len() < KEY_BYTES {
                warn!("pairing key override is shorter than 32 characters");
            }
            return Ok((Self::from_secret(secret), PairingSource::Environment));
        }
        Self::load_or_create(path)
    }

    /// Read the persisted key, creating it when absent or empty.
    pub fn load_or_create(path: &Path) -> io::Result<(Self, PairingSource)> {
        match fs::read_to_string(path) {
            Ok(contents) if !contents.trim().is_empty() => {
                restrict_permissions(path)?;
                Ok((Self::from_secret(contents), PairingSource::File))
            }
            Ok(_) => {
                warn!(path = %path.display(), "pairing key file is empty; regenerating");
                fs::remove_file(path)?;
                Self::create(path)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::create(path),
            Err(e) => Err(e),
        }
    }

    /// Operator-initiated rotation: discard the persisted key and mint a new one.
    pub fn rotate(path: &Path) -> io::Result<Self> {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Self::create(path).map(|(key, _)| key)
    }

    fn create(path: &Path) -> io::Result<(Self, PairingSource)> {
        let key = Self::generate()?;
        if let Some(parent) = path.parent() {
            create_private_dir(parent)?;
        }
        match write_owner_only(path, key.secret.as_bytes()) {
            Ok(()) => {
                info!(path = %path.display(), "generated new pairing key");
                Ok((key, PairingSource::Generated))
            }
            // Another process won the race; use its key.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let contents = fs::read_to_string(path)?;
                Ok((Self::from_secret(contents), PairingSource::File))
            }
            Err(e) => Err(e),
        }
    }

    fn generate() -> io::Result<Self> {
        let mut bytes = [0u8; KEY_BYTES];
        getrandom::getrandom(&mut bytes).map_err(|e| io::Error::other(e.to_string()))?;
        Ok(Self {
            secret: hex::encode(bytes),
        })
    }

    /// Constant-time check of a presented credential.
    ///
    /// Both sides are hashed first so the comparison runs over equal-length
    /// digests and the key length does not leak through timing.
    pub fn verify(&self, presented: &str) -> bool {
        let expected = Sha256::digest(self.secret.as_bytes());
        let actual = Sha256::digest(presented.trim().as_bytes());
        expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// The raw secret, for the operator-facing `pairing-key` command only.
    pub fn expose(&self) -> &str {
        &self.secret
    }
}

#[cfg(unix)]
fn write_owner_only(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

/// Tighten a key file that was loosened by hand.
#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        warn!(path = %path.display(), mode = format!("{mode:o}"), "pairing key file was readable by others; restricting to 0600");
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
