//! C5: Certificate Minter — request orchestration.
//!
//! Glues C2 (token verification) → C3 (policy resolution) → C4 (signing) →
//! C6 (artifact assembly) exactly per design doc §4.5's numbered steps.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use ssh_key::certificate::CertType;
use ssh_key::PublicKey;
use sshca_core::error::IssueError;
use sshca_core::{MAX_CLOCK_SKEW_RETRIES, MIN_RSA_KEY_BITS, VALID_AFTER_CLOCK_TOLERANCE_SECS};
use sshca_oidc::token::TokenVerifier;
use sshca_policy::PolicyResolver;

use crate::artifacts;
use crate::ca::{CaSigner, CertDraft};

pub struct IssuedUserCert {
    pub certificate: String,
    pub trust_lines: Vec<String>,
    pub config_lines: Vec<String>,
}

pub struct IssuedHostCert {
    pub certificate: String,
}

/// Everything C5 needs that stays fixed for the process lifetime: the
/// token verifier, the policy table, the CA, and the client-artifact
/// scoping config (design doc §6's `client_config_scope`, `ca_comment`,
/// `additional_ssh_configuration_line`).
pub struct CertMinter {
    verifier: TokenVerifier,
    resolver: PolicyResolver,
    ca: CaSigner,
    allowed_audience: String,
    allowed_hosted_domain: String,
    client_config_scope: String,
    ca_comment: String,
    additional_ssh_configuration_line: Vec<String>,
}

impl CertMinter {
    pub fn new(
        verifier: TokenVerifier,
        resolver: PolicyResolver,
        ca: CaSigner,
        allowed_audience: String,
        allowed_hosted_domain: String,
        client_config_scope: String,
        ca_comment: String,
        additional_ssh_configuration_line: Vec<String>,
    ) -> Self {
        Self {
            verifier,
            resolver,
            ca,
            allowed_audience,
            allowed_hosted_domain,
            client_config_scope,
            ca_comment,
            additional_ssh_configuration_line,
        }
    }

    pub fn ca_fingerprint(&self) -> String {
        self.ca.fingerprint()
    }

    /// `IssueUserCert`, design doc §4.5 steps 1-7.
    pub async fn issue_user_cert(
        &self,
        id_token: &str,
        client_public_key_bytes: &[u8],
    ) -> Result<IssuedUserCert, IssueError> {
        // Step 1.
        let identity = self
            .verifier
            .verify_with_clock_skew_retry(
                id_token,
                &self.allowed_audience,
                &self.allowed_hosted_domain,
                MAX_CLOCK_SKEW_RETRIES,
            )
            .await?;

        // Step 2.
        let subject_public_key = parse_and_validate_public_key(client_public_key_bytes)?;

        // Step 3.
        let decision = self.resolver.resolve_user(&identity.email)?;

        // Step 4.
        let key_id = format!("{}{}", sshca_core::USER_KEY_ID_PREFIX, identity.email);
        let (valid_after, valid_before) = validity_window(decision.ttl_secs);
        let draft = CertDraft {
            cert_type: CertType::User,
            subject_public_key,
            key_id: key_id.clone(),
            principals: decision.principals,
            valid_after,
            valid_before,
            critical_options: decision.critical_options,
            extensions: decision.extensions,
            comment: key_id,
        };

        // Step 5.
        let cert = self.ca.sign(draft)?;
        let certificate = cert
            .to_openssh()
            .map_err(|e| IssueError::signing_failed(format!("failed to encode signed cert: {e}")))?;

        // Step 6.
        let ca_public_key = self.ca.public_key_openssh()?;
        let trust_lines = artifacts::trust_lines(&self.client_config_scope, &ca_public_key, &self.ca_comment);
        let config_lines = artifacts::config_lines(&self.client_config_scope, &self.additional_ssh_configuration_line);

        // Step 7.
        Ok(IssuedUserCert { certificate, trust_lines, config_lines })
    }

    /// `IssueHostCert` variant, design doc §4.5 "Host cert variant" and §9
    /// item 2 (proof-of-control is a placeholder pre-shared token).
    pub fn issue_host_cert(
        &self,
        proof_of_control: &str,
        hostname: &str,
        host_public_key_bytes: &[u8],
    ) -> Result<IssuedHostCert, IssueError> {
        let expected_token = self
            .resolver
            .host_proof_of_control_token(hostname)
            .ok_or_else(|| IssueError::forbidden(format!("no allowed_hosts entry covers {hostname}")))?;
        if proof_of_control != expected_token {
            return Err(IssueError::forbidden("proof of control token mismatch"));
        }

        let subject_public_key = parse_and_validate_public_key(host_public_key_bytes)?;
        let decision = self.resolver.resolve_host(hostname)?;

        let key_id = format!("{}{}", sshca_core::HOST_KEY_ID_PREFIX, hostname);
        let (valid_after, valid_before) = validity_window(decision.ttl_secs);
        let draft = CertDraft {
            cert_type: CertType::Host,
            subject_public_key,
            key_id: key_id.clone(),
            principals: decision.principals,
            valid_after,
            valid_before,
            critical_options: BTreeMap::new(),
            extensions: BTreeMap::new(),
            comment: key_id,
        };

        let cert = self.ca.sign(draft)?;
        let certificate = cert
            .to_openssh()
            .map_err(|e| IssueError::signing_failed(format!("failed to encode signed cert: {e}")))?;

        Ok(IssuedHostCert { certificate })
    }
}

fn validity_window(ttl_secs: u32) -> (u64, u64) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs();
    (now.saturating_sub(VALID_AFTER_CLOCK_TOLERANCE_SECS), now + u64::from(ttl_secs))
}

/// Parses a client-supplied SSH wire-format public key blob and rejects
/// unsupported key types or RSA keys below the configured size floor,
/// design doc §4.5 step 2.
fn parse_and_validate_public_key(bytes: &[u8]) -> Result<PublicKey, IssueError> {
    let key = PublicKey::from_bytes(bytes)
        .map_err(|e| IssueError::bad_public_key(format!("unparseable public key: {e}")))?;

    if let ssh_key::public::KeyData::Rsa(rsa) = key.key_data() {
        let bits = mpint_bit_length(rsa.n.as_bytes());
        if bits < MIN_RSA_KEY_BITS {
            return Err(IssueError::bad_public_key(format!("rsa key is only {bits} bits, minimum is {MIN_RSA_KEY_BITS}")));
        }
    }

    Ok(key)
}

fn mpint_bit_length(mpint_bytes: &[u8]) -> usize {
    let bytes = match mpint_bytes.split_first() {
        Some((0, rest)) => rest,
        _ => mpint_bytes,
    };
    match bytes.first() {
        None => 0,
        Some(first) => bytes.len() * 8 - first.leading_zeros() as usize,
    }
}
