//! `ClientConfig`: the client-side collaborator contract for C9 (design doc
//! §3's **[SUPPLEMENT]** entity). Not part of design doc §6's server
//! configuration table — this is what the *client* needs to know to drive
//! its own state machine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sshca_core::error::IssueError;

/// The client's TLS credential selection when talking to the sshca-server,
/// per design doc §9's "Dynamic dispatch on credential modes" note: a
/// closed set of three, modeled as a tagged choice rather than a plugin
/// interface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TlsMode {
    /// Trust exactly one baked-in certificate (a PEM file path), for talking
    /// to a server with a self-signed or internal-CA certificate.
    Pinned { server_cert_path: String },
    /// Trust the public web PKI (Mozilla's root set via `webpki-roots`).
    SystemRoots,
    /// Skip certificate verification entirely. Only for local development
    /// against a server with a throwaway cert; never the default.
    InsecureSkipVerify,
}

impl Default for TlsMode {
    fn default() -> Self {
        TlsMode::SystemRoots
    }
}

/// Everything C9 needs that stays fixed for a client run, loaded once from
/// TOML at startup (mirroring `sshca_core::config::ServerConfig`'s own
/// load-once convention).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the sshca-server, e.g. `https://ca.yourdomain.com:8443`.
    pub server_base_url: String,

    /// OAuth 2.0 client id issued by the identity provider for this CLI.
    pub oauth_client_id: String,
    /// Installed-app OAuth clients are typically issued a "client secret"
    /// that isn't actually secret (it ships in the binary); present only if
    /// the provider's client registration requires one.
    #[serde(default)]
    pub oauth_client_secret: Option<String>,

    pub allowed_hosted_domain: String,

    /// Inclusive `[start, end]` port range the loopback redirect listener
    /// tries, in order, before falling back to the out-of-band flow.
    #[serde(default = "default_loopback_port_range")]
    pub loopback_port_range: (u16, u16),

    #[serde(default)]
    pub tls: TlsMode,

    /// Where OAuth credentials (id/refresh tokens) are cached between runs.
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
    /// Base path for the generated SSH keypair; `<base>` is the private key,
    /// `<base>.pub` the public key, `<base>-cert.pub` the issued cert.
    #[serde(default = "default_key_path")]
    pub ssh_key_path: String,
    #[serde(default = "default_known_hosts_path")]
    pub known_hosts_path: String,
    #[serde(default = "default_ssh_config_path")]
    pub ssh_config_path: String,

    /// Section name used for both the `known_hosts` and `ssh_config`
    /// splices, design doc §4.8/§6.
    #[serde(default = "default_section_name")]
    pub section_name: String,
}

fn default_loopback_port_range() -> (u16, u16) {
    sshca_core::DEFAULT_LOOPBACK_PORT_RANGE
}

fn home_relative(suffix: &str) -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/{suffix}")
}

fn default_credentials_path() -> String {
    home_relative(".sshca/credentials.json")
}

fn default_key_path() -> String {
    home_relative(".ssh/id_sshca")
}

fn default_known_hosts_path() -> String {
    home_relative(".ssh/known_hosts")
}

fn default_ssh_config_path() -> String {
    home_relative(".ssh/config")
}

fn default_section_name() -> String {
    "SSHCA".to_string()
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IssueError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IssueError::config_invalid(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| IssueError::config_invalid(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), IssueError> {
        if self.server_base_url.is_empty() {
            return Err(IssueError::config_invalid("server_base_url must not be empty"));
        }
        if self.oauth_client_id.is_empty() {
            return Err(IssueError::config_invalid("oauth_client_id must not be empty"));
        }
        let (start, end) = self.loopback_port_range;
        if start > end {
            return Err(IssueError::config_invalid(format!(
                "loopback_port_range start {start} is after end {end}"
            )));
        }
        Ok(())
    }

    pub fn ssh_private_key_path(&self) -> PathBuf {
        PathBuf::from(&self.ssh_key_path)
    }

    pub fn ssh_public_key_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.pub", self.ssh_key_path))
    }

    pub fn ssh_cert_path(&self) -> PathBuf {
        PathBuf::from(format!("{}-cert.pub", self.ssh_key_path))
    }
}
