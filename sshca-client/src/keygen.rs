//! Generates the per-run SSH keypair C9 sends for signing, design doc
//! §4.9's `GenerateKeypair` state.
//!
//! A fresh keypair every run rather than a long-lived one: the whole point
//! of short-lived certs is that compromising a key only matters until the
//! next issuance window closes.

use std::path::Path;

use anyhow::Context;
use rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey, PublicKey};

/// A freshly generated keypair, not yet written to disk.
pub struct GeneratedKeypair {
    private_key: PrivateKey,
}

impl GeneratedKeypair {
    pub fn generate(comment: &str) -> anyhow::Result<Self> {
        let mut private_key =
            PrivateKey::random(&mut OsRng, Algorithm::Ed25519).context("failed to generate client keypair")?;
        private_key.set_comment(comment);
        Ok(Self { private_key })
    }

    pub fn public_key(&self) -> &PublicKey {
        self.private_key.public_key()
    }

    /// The SSH wire-format public key blob `IssueUserCertRequest.public_key`
    /// is the base64 of, design doc §6.
    pub fn public_key_wire_bytes(&self) -> anyhow::Result<Vec<u8>> {
        self.public_key().to_bytes().context("failed to encode public key")
    }

    /// Writes the private key (0600) and public key (0644) to
    /// `private_key_path` / `public_key_path`, design doc §4.9's "Writing
    /// artifacts" note.
    pub fn write_to(&self, private_key_path: &Path, public_key_path: &Path) -> anyhow::Result<()> {
        let private_pem = self.private_key.to_openssh(LineEnding::LF).context("failed to encode private key")?;
        let public_line = self.public_key().to_openssh().context("failed to encode public key")?;

        if let Some(parent) = private_key_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
        }

        write_with_mode(private_key_path, private_pem.as_bytes(), 0o600)?;
        write_with_mode(public_key_path, format!("{public_line}\n").as_bytes(), 0o644)?;
        Ok(())
    }
}

#[cfg(unix)]
fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn write_with_mode(path: &Path, contents: &[u8], _mode: u32) -> anyhow::Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
