//! A thin `reqwest`-based client for C7, used by `sshca-client` (C9). Kept
//! in this crate rather than the client binary so the wire contract and its
//! consumer can't drift independently.

use base64::Engine;
use sshca_core::error::IssueError;

use crate::types::{IssueHostCertRequest, IssueHostCertResponse, IssueUserCertRequest, IssueUserCertResponse};

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self { base_url: base_url.into(), http }
    }

    pub async fn issue_user_cert(&self, id_token: &str, public_key_bytes: &[u8]) -> Result<IssueUserCertResponse, IssueError> {
        let req = IssueUserCertRequest {
            id_token: id_token.to_string(),
            public_key: base64::engine::general_purpose::STANDARD.encode(public_key_bytes),
        };
        let url = format!("{}/v1/issue_user_cert", self.base_url);
        let resp = self
            .http
            .post(url)
            .json(&req)
            .send()
            .await
            .map_err(|e| IssueError::transport(format!("issue_user_cert request failed: {e}")))?;
        let resp = resp
            .error_for_status()
            .map_err(|e| IssueError::transport(format!("issue_user_cert returned an http error: {e}")))?;
        resp.json().await.map_err(|e| IssueError::transport(format!("malformed issue_user_cert response: {e}")))
    }

    pub async fn issue_host_cert(
        &self,
        proof_of_control: &str,
        hostname: &str,
        public_key_bytes: &[u8],
    ) -> Result<IssueHostCertResponse, IssueError> {
        let req = IssueHostCertRequest {
            proof_of_control: proof_of_control.to_string(),
            hostname: hostname.to_string(),
            public_key: base64::engine::general_purpose::STANDARD.encode(public_key_bytes),
        };
        let url = format!("{}/v1/issue_host_cert", self.base_url);
        let resp = self
            .http
            .post(url)
            .json(&req)
            .send()
            .await
            .map_err(|e| IssueError::transport(format!("issue_host_cert request failed: {e}")))?;
        let resp = resp
            .error_for_status()
            .map_err(|e| IssueError::transport(format!("issue_host_cert returned an http error: {e}")))?;
        resp.json().await.map_err(|e| IssueError::transport(format!("malformed issue_host_cert response: {e}")))
    }
}
