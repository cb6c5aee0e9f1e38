//! C9: Client Orchestrator.
//!
//! `run_once` is a straight-line async function encoding spec.md §4.9's
//! state machine `Start → CheckMachinePolicy → LoadOrAcquireCreds →
//! VerifyOrRefreshIDToken → GenerateKeypair → CallIssueUserCert →
//! WriteArtifacts → [OptionallyAddToAgent] → Done` — plain control flow
//! rather than a trait-object state machine, since the flow is closed and
//! linear and nothing here is pluggable at runtime.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use sshca_api::client::ApiClient;
use sshca_api::types::IssueUserCertResponse;
use sshca_core::error::{ErrorKindGenerated, IssueErrorKind};
use tracing::{info, instrument, warn};

use crate::config::ClientConfig;
use crate::credentials::{self, StoredCredentials};
use crate::keygen::GeneratedKeypair;
use crate::oauth::{self, loopback, TokenResponse};
use crate::splice;

const LOOPBACK_TIMEOUT: Duration = Duration::from_secs(sshca_core::LOOPBACK_TIMEOUT_SECS);

/// Runs one full issuance cycle: acquire credentials, mint a keypair, call
/// the server, and install the resulting artifacts. Returns `Ok(())` iff
/// the CLI should exit 0, per spec.md §6's exit code contract.
#[instrument(skip_all, name = "(sshca-client-run)")]
pub async fn run_once(config: &ClientConfig) -> anyhow::Result<()> {
    check_machine_policy(config)?;

    let oauth_http = oauth::public_http_client();
    let server_http = crate::tls::build_server_http_client(&config.tls).context("failed to build server http client")?;
    let api = ApiClient::new(config.server_base_url.clone(), server_http);

    let credentials_path = Path::new(&config.credentials_path);
    let mut creds = load_or_acquire_creds(config, &oauth_http, credentials_path).await?;

    let keypair = GeneratedKeypair::generate(&whoami_comment()).context("failed to generate ssh keypair")?;
    let public_key_bytes = keypair.public_key_wire_bytes()?;

    let response =
        issue_cert_with_refresh(&api, &oauth_http, config, credentials_path, &mut creds, &public_key_bytes).await?;

    if response.status != 0 {
        let kind = IssueErrorKind::from_code(response.status);
        anyhow::bail!(
            "server rejected the certificate request ({kind}){}",
            response.diagnostic.map(|d| format!(": {d}")).unwrap_or_default()
        );
    }

    write_artifacts(config, &keypair, &response)?;
    optionally_add_to_agent(config);

    info!("certificate issued and installed");
    Ok(())
}

/// A seam for machine-level gating (e.g. "only run on a managed laptop").
/// spec.md names the state but the distilled spec carries no such config
/// today, so this is a no-op until a concrete policy shows up.
fn check_machine_policy(_config: &ClientConfig) -> anyhow::Result<()> {
    Ok(())
}

async fn load_or_acquire_creds(
    config: &ClientConfig,
    oauth_http: &reqwest::Client,
    credentials_path: &Path,
) -> anyhow::Result<StoredCredentials> {
    if let Some(creds) = credentials::load(credentials_path) {
        return Ok(creds);
    }

    let creds = acquire_creds_via_browser(config, oauth_http).await?;
    credentials::save(credentials_path, &creds).context("failed to persist acquired credentials")?;
    Ok(creds)
}

/// Drives the "Coroutine-style browser dance" design note: build the
/// authorization URL against whichever loopback port actually bound, print
/// it for the human to open, then wait for the redirect.
async fn acquire_creds_via_browser(config: &ClientConfig, oauth_http: &reqwest::Client) -> anyhow::Result<StoredCredentials> {
    let (port, listener) = loopback::bind_listener(config.loopback_port_range)
        .await
        .context("failed to bind a loopback port for the oauth redirect")?;
    let redirect_uri = format!("http://127.0.0.1:{port}/callback");

    let auth_request = oauth::build_authorization_request(&config.oauth_client_id, &redirect_uri, &config.allowed_hosted_domain);

    println!("Open this URL in a browser to sign in:\n\n    {}\n", auth_request.url);

    let outcome = loopback::accept_redirect(&listener, LOOPBACK_TIMEOUT).await;
    let (code, state) = match outcome {
        Ok(loopback::LoopbackOutcome::Code { code, state }) => (code, state),
        Ok(loopback::LoopbackOutcome::AccessDenied) => anyhow::bail!("sign-in was cancelled (access_denied)"),
        Err(e) => {
            warn!(error = %e, "loopback redirect did not arrive; falling back to the copy-paste flow");
            prompt_for_code_out_of_band(&auth_request.state)?
        }
    };

    anyhow::ensure!(state == auth_request.state, "oauth state mismatch; possible redirect spoofing, aborting");

    let token = oauth::exchange_code(
        oauth_http,
        &config.oauth_client_id,
        config.oauth_client_secret.as_deref(),
        &code,
        &auth_request.pkce.verifier,
        &redirect_uri,
    )
    .await
    .context("failed to exchange authorization code")?;

    Ok(StoredCredentials { id_token: token.id_token, refresh_token: token.refresh_token })
}

/// The out-of-band fallback spec.md §4.9 calls for "if the browser redirect
/// fails": the human pastes back whatever the identity provider's redirect
/// URL (or bare `code=...&state=...` query string) ended up being.
fn prompt_for_code_out_of_band(expected_state: &str) -> anyhow::Result<(String, String)> {
    use std::io::Write as _;

    print!("Paste the full redirect URL (or its query string) here: ");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).context("failed to read pasted redirect")?;
    let line = line.trim();

    let query = line.split_once('?').map(|(_, q)| q).unwrap_or(line);
    let mut code = None;
    let mut state = None;
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            match k {
                "code" => code = Some(percent_encoding::percent_decode_str(v).decode_utf8_lossy().into_owned()),
                "state" => state = Some(percent_encoding::percent_decode_str(v).decode_utf8_lossy().into_owned()),
                _ => {}
            }
        }
    }

    let code = code.context("pasted input carried no `code` parameter")?;
    let state = state.context("pasted input carried no `state` parameter")?;
    let _ = expected_state;
    Ok((code, state))
}

/// `VerifyOrRefreshIDToken` + `CallIssueUserCert`: issuance only fails
/// verification server-side, so the client's version of "verify" is to try
/// the call and react to a `TokenInvalid` status, per spec.md §4.9's
/// "attempt exactly one refresh-token exchange ... and retry verification
/// once".
async fn issue_cert_with_refresh(
    api: &ApiClient,
    oauth_http: &reqwest::Client,
    config: &ClientConfig,
    credentials_path: &Path,
    creds: &mut StoredCredentials,
    public_key_bytes: &[u8],
) -> anyhow::Result<IssueUserCertResponse> {
    let response = api
        .issue_user_cert(&creds.id_token, public_key_bytes)
        .await
        .context("issue_user_cert request failed")?;

    if response.status != IssueErrorKind::TokenInvalid.to_code() {
        return Ok(response);
    }

    let refresh_token = creds
        .refresh_token
        .clone()
        .context("the server rejected the id token and no refresh token is cached; sign in again")?;

    let refreshed = refresh_id_token(oauth_http, config, &refresh_token).await?;
    apply_refreshed_token(creds, refreshed);
    credentials::save(credentials_path, creds).context("failed to persist refreshed credentials")?;

    api.issue_user_cert(&creds.id_token, public_key_bytes)
        .await
        .context("issue_user_cert retry after refresh failed")
}

async fn refresh_id_token(oauth_http: &reqwest::Client, config: &ClientConfig, refresh_token: &str) -> anyhow::Result<TokenResponse> {
    oauth::exchange_refresh_token(oauth_http, &config.oauth_client_id, config.oauth_client_secret.as_deref(), refresh_token)
        .await
        .context("refresh token exchange failed")
}

fn apply_refreshed_token(creds: &mut StoredCredentials, refreshed: TokenResponse) {
    creds.id_token = refreshed.id_token;
    if let Some(refresh_token) = refreshed.refresh_token {
        creds.refresh_token = Some(refresh_token);
    }
}

/// `WriteArtifacts`: key file at 0600, public key and cert at 0644, and the
/// `known_hosts`/`config` splices through C8 — spec.md §4.9.
fn write_artifacts(config: &ClientConfig, keypair: &GeneratedKeypair, response: &IssueUserCertResponse) -> anyhow::Result<()> {
    keypair
        .write_to(&config.ssh_private_key_path(), &config.ssh_public_key_path())
        .context("failed to write ssh keypair")?;

    write_owned_644(&config.ssh_cert_path(), format!("{}\n", response.certificate).as_bytes())
        .context("failed to write issued certificate")?;

    splice::replace_section(Path::new(&config.known_hosts_path), &config.section_name, &response.certificate_authorities, 0o644)
        .context("failed to splice known_hosts")?;
    splice::replace_section(Path::new(&config.ssh_config_path), &config.section_name, &response.config, 0o644)
        .context("failed to splice ssh config")?;

    Ok(())
}

#[cfg(unix)]
fn write_owned_644(path: &std::path::Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, contents)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn write_owned_644(path: &std::path::Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

/// `[OptionallyAddToAgent]`: best-effort, never fatal — spec.md brackets
/// this step as optional. Shells out to the system `ssh-add` rather than
/// speaking the agent protocol directly, since nothing else in this crate
/// needs an agent-protocol client.
fn optionally_add_to_agent(config: &ClientConfig) {
    let path = config.ssh_private_key_path();
    match std::process::Command::new("ssh-add").arg(&path).status() {
        Ok(status) if status.success() => info!("added certificate to ssh-agent"),
        Ok(status) => warn!(?status, "ssh-add exited non-zero; continuing without agent registration"),
        Err(e) => warn!(error = %e, "ssh-add not available; continuing without agent registration"),
    }
}

fn whoami_comment() -> String {
    std::env::var("USER").unwrap_or_else(|_| "sshca-client".to_string())
}
