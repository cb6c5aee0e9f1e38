//! The axum side of C7: routes `POST /v1/issue_user_cert` and
//! `POST /v1/issue_host_cert` onto [`sshca_cert::CertMinter`], translating
//! its `Result<_, IssueError>` into the `{status, ...}` wire shape rather
//! than varying HTTP status codes — this is a single RPC-style operation
//! per design doc §4.7, not a general REST resource.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use sshca_cert::CertMinter;
use sshca_core::error::IssueError;
use tracing::instrument;

use crate::types::{IssueHostCertRequest, IssueHostCertResponse, IssueUserCertRequest, IssueUserCertResponse};

pub struct ServerState {
    pub minter: CertMinter,
}

pub fn router(state: Arc<ServerState>) -> Router<()> {
    Router::new()
        .route("/v1/issue_user_cert", post(issue_user_cert))
        .route("/v1/issue_host_cert", post(issue_host_cert))
        .with_state(state)
}

#[instrument(skip_all, name = "(issue-user-cert)")]
async fn issue_user_cert(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<IssueUserCertRequest>,
) -> Json<IssueUserCertResponse> {
    let key_bytes = match decode_public_key(&req.public_key) {
        Ok(bytes) => bytes,
        Err(e) => return Json(error_response(e)),
    };

    match state.minter.issue_user_cert(&req.id_token, &key_bytes).await {
        Ok(issued) => Json(IssueUserCertResponse {
            status: 0,
            certificate: issued.certificate,
            certificate_authorities: issued.trust_lines,
            config: issued.config_lines,
            diagnostic: None,
        }),
        Err(e) => Json(error_response(e)),
    }
}

#[instrument(skip_all, name = "(issue-host-cert)")]
async fn issue_host_cert(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<IssueHostCertRequest>,
) -> Json<IssueHostCertResponse> {
    let key_bytes = match decode_public_key(&req.public_key) {
        Ok(bytes) => bytes,
        Err(e) => {
            return Json(IssueHostCertResponse { status: e.status(), certificate: String::new(), diagnostic: Some(e.msg) });
        }
    };

    match state.minter.issue_host_cert(&req.proof_of_control, &req.hostname, &key_bytes) {
        Ok(issued) => Json(IssueHostCertResponse { status: 0, certificate: issued.certificate, diagnostic: None }),
        Err(e) => Json(IssueHostCertResponse { status: e.status(), certificate: String::new(), diagnostic: Some(e.msg) }),
    }
}

fn decode_public_key(public_key_b64: &str) -> Result<Vec<u8>, IssueError> {
    base64::engine::general_purpose::STANDARD
        .decode(public_key_b64)
        .map_err(|e| IssueError::bad_public_key(format!("public_key is not valid base64: {e}")))
}

fn error_response(e: IssueError) -> IssueUserCertResponse {
    IssueUserCertResponse {
        status: e.status(),
        certificate: String::new(),
        certificate_authorities: Vec::new(),
        config: Vec::new(),
        diagnostic: Some(e.msg),
    }
}
