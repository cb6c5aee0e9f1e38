//! Wire request/response shapes for C7, matching design doc §6's field
//! names exactly so the JSON contract is stable across client/server
//! versions independent of any Rust-side refactor.

use serde::{Deserialize, Serialize};

/// `IssueUserCert` request. `public_key` is the base64 encoding of the
/// client's SSH wire-format public key blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssueUserCertRequest {
    pub id_token: String,
    pub public_key: String,
}

/// `IssueUserCert` response. `status == 0` means success; any other value
/// is a failure code from [`sshca_core::error::IssueErrorKind`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IssueUserCertResponse {
    pub status: u16,
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub certificate_authorities: Vec<String>,
    #[serde(default)]
    pub config: Vec<String>,
    /// An opaque, safe-to-display diagnostic. Never a stack trace, never a
    /// secret (design doc §7's propagation policy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// `IssueHostCert` request (design doc §9 item 2: `proof_of_control` is a
/// placeholder pre-shared token, not the real ACME/reverse-proxy contract).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssueHostCertRequest {
    pub proof_of_control: String,
    pub hostname: String,
    pub public_key: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IssueHostCertResponse {
    pub status: u16,
    #[serde(default)]
    pub certificate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}
