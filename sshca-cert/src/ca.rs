//! C4: CA Signer.
//!
//! Owns the CA private key for the process lifetime and assigns monotonic
//! serials. The only shared mutable state is the serial counter, so signing
//! is reentrant-safe without any lock around the key itself (design doc
//! §4.4/§4.9's "no ambient globals" note — the signer is a single owned
//! component constructed once at startup and passed explicitly into C5).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use rand_core::{OsRng, RngCore};
use ssh_key::certificate::{Builder, CertType};
use ssh_key::{Certificate, HashAlg, PrivateKey, PublicKey};
use sshca_core::error::IssueError;

/// Everything the CA needs to sign a certificate, except the serial and
/// nonce (the signer's own job) and the signature itself.
pub struct CertDraft {
    pub cert_type: CertType,
    pub subject_public_key: PublicKey,
    pub key_id: String,
    pub principals: Vec<String>,
    pub valid_after: u64,
    pub valid_before: u64,
    pub critical_options: BTreeMap<String, String>,
    pub extensions: BTreeMap<String, String>,
    pub comment: String,
}

pub struct CaSigner {
    private_key: PrivateKey,
    serial: AtomicU64,
}

impl CaSigner {
    /// Loads the CA private key from an OpenSSH-formatted PEM file and seeds
    /// the serial counter from OS randomness, per design doc §3's
    /// "SessionSerial ... initialized from a high-entropy seed at startup".
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IssueError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path)
            .map_err(|e| IssueError::config_invalid(format!("failed to read ca key {}: {e}", path.display())))?;
        Self::from_openssh_pem(&pem)
    }

    /// Test-only escape hatch so other crates' test fixtures can build a
    /// [`CaSigner`] from a raw PEM without going through [`Self::load`]'s
    /// filesystem read.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_test(pem: &str) -> Result<Self, IssueError> {
        Self::from_openssh_pem(pem)
    }

    pub(crate) fn from_openssh_pem(pem: &str) -> Result<Self, IssueError> {
        let private_key = PrivateKey::from_openssh(pem)
            .map_err(|e| IssueError::config_invalid(format!("malformed ca private key: {e}")))?;
        let mut seed_bytes = [0u8; 8];
        OsRng.fill_bytes(&mut seed_bytes);
        Ok(Self {
            private_key,
            serial: AtomicU64::new(u64::from_le_bytes(seed_bytes)),
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        self.private_key.public_key()
    }

    /// `SHA256:...` fingerprint, constant for the process lifetime.
    pub fn fingerprint(&self) -> String {
        self.public_key().fingerprint(HashAlg::Sha256).to_string()
    }

    /// The CA public key in the authorized-keys line form used in trust
    /// lines (`@cert-authority <hostGlob> <blob> <comment>`).
    pub fn public_key_openssh(&self) -> Result<String, IssueError> {
        self.public_key()
            .to_openssh()
            .map_err(|e| IssueError::signing_failed(format!("failed to encode ca public key: {e}")))
    }

    /// Signs a draft, assigning the next serial and a fresh random nonce.
    /// Reentrant: the only state mutated is the atomic serial counter.
    pub fn sign(&self, draft: CertDraft) -> Result<Certificate, IssueError> {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);

        let mut builder = Builder::new_with_random_nonce(
            &mut OsRng,
            draft.subject_public_key,
            draft.valid_after,
            draft.valid_before,
        )
        .map_err(|e| IssueError::signing_failed(format!("failed to start cert builder: {e}")))?;

        builder
            .serial(serial)
            .map_err(|e| IssueError::signing_failed(format!("failed to set serial: {e}")))?;
        builder
            .cert_type(draft.cert_type)
            .map_err(|e| IssueError::signing_failed(format!("failed to set cert type: {e}")))?;
        builder
            .key_id(draft.key_id)
            .map_err(|e| IssueError::signing_failed(format!("failed to set key id: {e}")))?;
        builder
            .comment(draft.comment)
            .map_err(|e| IssueError::signing_failed(format!("failed to set comment: {e}")))?;

        for principal in draft.principals {
            builder
                .valid_principal(principal)
                .map_err(|e| IssueError::signing_failed(format!("failed to add principal: {e}")))?;
        }
        // `ssh-key` sorts critical options/extensions lexicographically by
        // name and length-prefixes each value when it serializes the
        // certificate — design doc §4.4's wire-format requirement is
        // satisfied by the crate, not by us.
        for (name, value) in draft.critical_options {
            builder
                .critical_option(name, value)
                .map_err(|e| IssueError::signing_failed(format!("failed to add critical option: {e}")))?;
        }
        for (name, value) in draft.extensions {
            builder
                .extension(name, value)
                .map_err(|e| IssueError::signing_failed(format!("failed to add extension: {e}")))?;
        }

        builder
            .sign(&self.private_key)
            .map_err(|e| IssueError::signing_failed(format!("ca signing failed: {e}")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const TEST_CA_KEY_PEM: &str = include_str!("../testdata/test_ca_ed25519_key.pem");

    fn test_ca() -> CaSigner {
        CaSigner::from_openssh_pem(TEST_CA_KEY_PEM).unwrap()
    }

    fn test_subject_public_key() -> PublicKey {
        PrivateKey::random(&mut OsRng, ssh_key::Algorithm::Ed25519)
            .unwrap()
            .public_key()
            .clone()
    }

    #[test]
    fn serials_increase_across_signs() {
        let ca = test_ca();
        let now = 1_700_000_000u64;

        let draft = |key_id: &str| CertDraft {
            cert_type: CertType::User,
            subject_public_key: test_subject_public_key(),
            key_id: key_id.to_string(),
            principals: vec!["foo".to_string()],
            valid_after: now,
            valid_before: now + 3600,
            critical_options: BTreeMap::new(),
            extensions: BTreeMap::new(),
            comment: "test".to_string(),
        };

        let cert1 = ca.sign(draft("user:a@example.com")).unwrap();
        let cert2 = ca.sign(draft("user:b@example.com")).unwrap();
        assert!(cert2.serial() > cert1.serial());
    }

    #[test]
    fn signed_cert_round_trips_through_openssh_encoding() {
        let ca = test_ca();
        let now = 1_700_000_000u64;
        let draft = CertDraft {
            cert_type: CertType::User,
            subject_public_key: test_subject_public_key(),
            key_id: "user:someone@example.com".to_string(),
            principals: vec!["someone".to_string(), "root".to_string()],
            valid_after: now,
            valid_before: now + 3600,
            critical_options: BTreeMap::new(),
            extensions: BTreeMap::new(),
            comment: "someone@example.com".to_string(),
        };

        let cert = ca.sign(draft).unwrap();
        let line = cert.to_openssh().unwrap();
        assert!(line.starts_with("ssh-ed25519-cert-v01@openssh.com "));

        let reparsed = Certificate::from_openssh(&line).unwrap();
        assert_eq!(reparsed.valid_principals(), &["someone".to_string(), "root".to_string()]);
    }

    #[test]
    fn fingerprint_is_stable_across_calls() {
        let ca = test_ca();
        assert_eq!(ca.fingerprint(), ca.fingerprint());
    }
}
