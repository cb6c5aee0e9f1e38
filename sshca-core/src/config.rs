//! Server configuration: the keys named in the design doc §6, loaded once at
//! startup from a TOML file. Reload is out of scope (design doc §5); if it's
//! ever added it should use the same snapshot-swap pattern as the KeySet
//! cache, not a mutable-in-place config object.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::IssueError;

/// One entry of the `allowed_users` config table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllowedUserEntry {
    pub username: String,
    #[serde(default)]
    pub extra_principals: Vec<String>,
    #[serde(default)]
    pub cert_permissions: HashMap<String, String>,
}

/// One entry of the `allowed_hosts` config table (host-cert issuance).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllowedHostEntry {
    /// Glob the requested hostname must match (e.g. `*.internal.example.com`).
    pub host_glob: String,
    /// Placeholder proof-of-control credential. See design doc §9 item 2:
    /// this stands in for the real ACME/reverse-proxy bridge contract, which
    /// remains an external collaborator.
    pub proof_of_control_token: String,
}

/// The full, validated server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub ca_key_path: String,
    pub listen_port: u16,
    pub server_cert_path: String,
    pub server_key_path: String,

    pub allowed_domain_for_id_token: String,
    pub allowed_client_id_for_id_token: String,

    pub client_config_scope: String,
    pub ca_comment: String,
    #[serde(default)]
    pub additional_ssh_configuration_line: Vec<String>,

    pub generate_cert_duration_seconds: u32,

    pub allowed_users: HashMap<String, AllowedUserEntry>,

    #[serde(default)]
    pub http_listen_port: Option<u16>,
    #[serde(default)]
    pub allowed_hosts: HashMap<String, AllowedHostEntry>,
    #[serde(default)]
    pub caddy_file_path: Option<String>,
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IssueError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IssueError::config_invalid(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| IssueError::config_invalid(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates invariants that can't be expressed in the type alone.
    ///
    /// Per design doc §9 item 3: two `allowed_users` keys are already
    /// deduplicated by the map's own keys being the lowercased email, so a
    /// literal collision can't occur post-parse. What *can* happen is two
    /// differently-cased keys for the same email (`Foo@x.com` vs
    /// `foo@x.com`); we normalize and reject those here rather than silently
    /// picking one.
    fn validate(&self) -> Result<(), IssueError> {
        if self.generate_cert_duration_seconds == 0 {
            return Err(IssueError::config_invalid("generate_cert_duration_seconds must be positive"));
        }
        const TTL_CEILING_SECS: u32 = 24 * 60 * 60;
        if self.generate_cert_duration_seconds > TTL_CEILING_SECS {
            return Err(IssueError::config_invalid(format!(
                "generate_cert_duration_seconds {} exceeds the {TTL_CEILING_SECS}s ceiling",
                self.generate_cert_duration_seconds
            )));
        }

        let mut seen = HashMap::new();
        for (raw_email, entry) in &self.allowed_users {
            if entry.username.is_empty() {
                return Err(IssueError::config_invalid(format!(
                    "allowed_users[{raw_email}] has an empty username"
                )));
            }
            let normalized = raw_email.trim().to_lowercase();
            if let Some(other) = seen.insert(normalized.clone(), raw_email.clone()) {
                return Err(IssueError::config_invalid(format!(
                    "allowed_users entries {raw_email:?} and {other:?} collide on email {normalized:?}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
ca_key_path = "/etc/sshca/ca_key"
listen_port = 8443
server_cert_path = "/etc/sshca/server.crt"
server_key_path = "/etc/sshca/server.key"
allowed_domain_for_id_token = "yourdomain.com"
allowed_client_id_for_id_token = "client-id.apps.example.com"
client_config_scope = "*.yourdomain.com"
ca_comment = "yourdomain-ssh-ca"
additional_ssh_configuration_line = ["ServerAliveInterval 30"]
generate_cert_duration_seconds = 86400

[allowed_users."username@yourdomain.com"]
username = "foo"
extra_principals = ["root"]

[allowed_users."otheruser@yourdomain.com"]
username = "bar"
"#
    }

    #[test]
    fn parses_and_validates_sample_config() {
        let config: ServerConfig = toml::from_str(sample_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.allowed_users.len(), 2);
        let foo = &config.allowed_users["username@yourdomain.com"];
        assert_eq!(foo.username, "foo");
        assert_eq!(foo.extra_principals, vec!["root".to_string()]);
    }

    #[test]
    fn rejects_zero_ttl() {
        let mut config: ServerConfig = toml::from_str(sample_toml()).unwrap();
        config.generate_cert_duration_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_ttl_above_ceiling() {
        let mut config: ServerConfig = toml::from_str(sample_toml()).unwrap();
        config.generate_cert_duration_seconds = 25 * 60 * 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_case_colliding_emails() {
        let mut config: ServerConfig = toml::from_str(sample_toml()).unwrap();
        config.allowed_users.insert(
            "Username@yourdomain.com".to_string(),
            config.allowed_users["username@yourdomain.com"].clone(),
        );
        assert!(config.validate().is_err());
    }
}
