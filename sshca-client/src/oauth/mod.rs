//! OAuth credential acquisition for C9.
//!
//! The "browser dance" itself — actually driving a browser window — is an
//! external collaborator per design doc §1; what's built here is everything
//! on this side of that boundary: the authorization URL, PKCE challenge
//! generation, the authorization-code/refresh-token exchanges against the
//! identity provider's token endpoint, and (in [`loopback`]) the redirect
//! listener design doc §9 asks to be modeled as a bounded scoped task.

pub mod loopback;

use base64::Engine;
use ring::digest;
use serde::Deserialize;
use sshca_core::error::IssueError;
use sshca_core::{GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};

const BASE64_URL_NO_PAD: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// The id/refresh token pair (and optional access token) returned by a
/// successful exchange.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    pub id_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// A PKCE (RFC 7636) verifier/challenge pair, generated fresh per
/// authorization attempt.
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        use rand_core::RngCore;
        let mut raw = [0u8; 32];
        rand_core::OsRng.fill_bytes(&mut raw);
        let verifier = BASE64_URL_NO_PAD.encode(raw);
        let challenge = BASE64_URL_NO_PAD.encode(digest::digest(&digest::SHA256, verifier.as_bytes()));
        Self { verifier, challenge }
    }
}

/// A loopback-bound, un-exchanged authorization request: the URL to open in
/// a browser plus the state needed to validate and complete the exchange
/// once the redirect comes back.
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub pkce: PkcePair,
    pub redirect_uri: String,
}

/// Builds the Google OAuth 2.0 authorization URL for an installed-app,
/// PKCE-protected authorization-code flow requesting the `openid email`
/// scopes (the minimum the server's token verifier needs — `hd` and
/// `email_verified` ride along on `openid`/`email` automatically).
pub fn build_authorization_request(client_id: &str, redirect_uri: &str, hosted_domain: &str) -> AuthorizationRequest {
    let pkce = PkcePair::generate();
    let state = {
        use rand_core::RngCore;
        let mut raw = [0u8; 16];
        rand_core::OsRng.fill_bytes(&mut raw);
        BASE64_URL_NO_PAD.encode(raw)
    };

    let url = format!(
        "{base}?response_type=code&client_id={client_id}&redirect_uri={redirect_uri}&scope={scope}&state={state}\
         &code_challenge={challenge}&code_challenge_method=S256&hd={hd}&access_type=offline&prompt=consent",
        base = GOOGLE_AUTH_URL,
        client_id = encode(client_id),
        redirect_uri = encode(redirect_uri),
        scope = encode("openid email"),
        state = encode(&state),
        challenge = encode(&pkce.challenge),
        hd = encode(hosted_domain),
    );

    AuthorizationRequest { url, state, pkce, redirect_uri: redirect_uri.to_string() }
}

fn encode(s: &str) -> String {
    percent_encoding::utf8_percent_encode(s, percent_encoding::NON_ALPHANUMERIC).to_string()
}

/// Builds the HTTP client used for all identity-provider requests (token
/// exchange, refresh, and — via `sshca_oidc` — JWKS fetch). Always talks to
/// the public web PKI; the sshca-server's own TLS credential mode
/// ([`crate::tls::TlsMode`]) never applies here.
pub fn public_http_client() -> reqwest::Client {
    reqwest::Client::new()
}

/// Exchanges an authorization code (plus its PKCE verifier) for an ID token
/// and refresh token.
pub async fn exchange_code(
    http: &reqwest::Client,
    client_id: &str,
    client_secret: Option<&str>,
    code: &str,
    pkce_verifier: &str,
    redirect_uri: &str,
) -> Result<TokenResponse, IssueError> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", client_id),
        ("redirect_uri", redirect_uri),
        ("code_verifier", pkce_verifier),
    ];
    if let Some(secret) = client_secret {
        form.push(("client_secret", secret));
    }
    post_token_endpoint(http, &form).await
}

/// Exchanges a refresh token for a fresh ID token, per design doc §4.9's
/// "attempt exactly one refresh-token exchange" step.
pub async fn exchange_refresh_token(
    http: &reqwest::Client,
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> Result<TokenResponse, IssueError> {
    let mut form = vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token), ("client_id", client_id)];
    if let Some(secret) = client_secret {
        form.push(("client_secret", secret));
    }
    post_token_endpoint(http, &form).await
}

async fn post_token_endpoint(http: &reqwest::Client, form: &[(&str, &str)]) -> Result<TokenResponse, IssueError> {
    let resp = http
        .post(GOOGLE_TOKEN_URL)
        .form(form)
        .send()
        .await
        .map_err(|e| IssueError::transport(format!("token endpoint request failed: {e}")))?;

    let resp = resp
        .error_for_status()
        .map_err(|e| IssueError::token_invalid(format!("token endpoint returned an error: {e}")))?;

    resp.json().await.map_err(|e| IssueError::token_invalid(format!("malformed token endpoint response: {e}")))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pkce_challenge_is_stable_sha256_of_verifier() {
        let pair = PkcePair::generate();
        let expected = BASE64_URL_NO_PAD.encode(digest::digest(&digest::SHA256, pair.verifier.as_bytes()));
        assert_eq!(pair.challenge, expected);
    }

    #[test]
    fn two_pkce_pairs_are_not_equal() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
    }

    #[test]
    fn authorization_url_contains_expected_params() {
        let req = build_authorization_request("client-id.apps.example.com", "http://127.0.0.1:8085/callback", "yourdomain.com");
        assert!(req.url.starts_with(GOOGLE_AUTH_URL));
        assert!(req.url.contains("response_type=code"));
        assert!(req.url.contains("code_challenge_method=S256"));
        assert!(req.url.contains(&format!("state={}", req.state)));
    }
}
