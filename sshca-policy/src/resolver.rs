//! The policy table lookup itself: `Resolve(identity, certType) →
//! AuthorizationDecision | Denied`, design doc §4.3.

use std::collections::BTreeMap;
use std::sync::Arc;

use sshca_core::{
    config::ServerConfig,
    error::IssueError,
    types::{build_principals, AuthorizationDecision, CertKind},
};

/// Resolves authorization decisions against an immutable, startup-loaded
/// config snapshot. Cheap to clone (an `Arc` underneath) so every request
/// handler can hold its own copy.
#[derive(Clone)]
pub struct PolicyResolver {
    config: Arc<ServerConfig>,
}

impl PolicyResolver {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    /// Resolves a user-cert request. `email` must already be the lowercased,
    /// trimmed value out of [`sshca_core::types::VerifiedIdentity`].
    pub fn resolve_user(&self, email: &str) -> Result<AuthorizationDecision, IssueError> {
        let entry = self
            .config
            .allowed_users
            .iter()
            .find(|(key, _)| key.trim().to_lowercase() == email)
            .map(|(_, entry)| entry)
            .ok_or_else(|| IssueError::forbidden(format!("no policy entry for {email}")))?;

        let principals = build_principals(&entry.username, &entry.extra_principals);
        let (critical_options, extensions) = split_cert_permissions(&entry.cert_permissions);

        Ok(AuthorizationDecision {
            kind: CertKind::User,
            principals,
            critical_options,
            extensions,
            ttl_secs: self.config.generate_cert_duration_seconds,
        })
    }

    /// Resolves a host-cert request: is `hostname` covered by any
    /// `allowed_hosts` glob? Per design doc §4.3, host-cert decisions carry
    /// no options/extensions.
    pub fn resolve_host(&self, hostname: &str) -> Result<AuthorizationDecision, IssueError> {
        let covered = self
            .config
            .allowed_hosts
            .values()
            .any(|host| glob_matches(&host.host_glob, hostname));

        if !covered {
            return Err(IssueError::forbidden(format!("no allowed_hosts entry covers {hostname}")));
        }

        Ok(AuthorizationDecision {
            kind: CertKind::Host,
            principals: vec![hostname.to_string()],
            critical_options: BTreeMap::new(),
            extensions: BTreeMap::new(),
            ttl_secs: self.config.generate_cert_duration_seconds,
        })
    }

    /// Looks up the pre-shared proof-of-control token configured for a
    /// requested hostname's matching `allowed_hosts` entry, if any. Design
    /// doc §9 item 2: a placeholder for the real ACME/reverse-proxy bridge.
    pub fn host_proof_of_control_token(&self, hostname: &str) -> Option<&str> {
        self.config
            .allowed_hosts
            .values()
            .find(|host| glob_matches(&host.host_glob, hostname))
            .map(|host| host.proof_of_control_token.as_str())
    }
}

/// The only two names OpenSSH certs treat as critical options (RFC 4253's
/// "connection refuses to proceed unless recognized"); everything else a
/// policy entry names — `permit-pty`, `permit-port-forwarding`,
/// `permit-agent-forwarding`, `permit-X11-forwarding`, `permit-user-rc`, and
/// any future grant — is an extension (`sshd` ignores unrecognized
/// extensions but rejects unrecognized critical options outright).
const CRITICAL_OPTION_NAMES: &[&str] = &["force-command", "source-address"];

/// Splits a policy entry's `cert_permissions` into the cert's true critical
/// options and its extensions, per the glossary's "critical options /
/// extensions" distinction and design doc §4.5 step 4. Misrouting a
/// `permit-*` grant into critical options makes `sshd` reject the whole
/// certificate with "unknown critical option".
fn split_cert_permissions(cert_permissions: &std::collections::HashMap<String, String>) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut critical_options = BTreeMap::new();
    let mut extensions = BTreeMap::new();
    for (name, value) in cert_permissions {
        if CRITICAL_OPTION_NAMES.contains(&name.as_str()) {
            critical_options.insert(name.clone(), value.clone());
        } else {
            extensions.insert(name.clone(), value.clone());
        }
    }
    (critical_options, extensions)
}

/// A minimal glob matcher supporting `*` (matches any run of characters,
/// including none) anywhere in the pattern. Host globs in practice are
/// single-wildcard patterns like `*.internal.example.com`, but this handles
/// the general case so config authors aren't surprised.
fn glob_matches(pattern: &str, candidate: &str) -> bool {
    fn inner(pattern: &[u8], candidate: &[u8]) -> bool {
        match pattern.split_first() {
            None => candidate.is_empty(),
            Some((b'*', rest)) => {
                if inner(rest, candidate) {
                    return true;
                }
                if let Some((_, tail)) = candidate.split_first() {
                    return inner(pattern, tail);
                }
                false
            }
            Some((p, rest)) => match candidate.split_first() {
                Some((c, tail)) if c == p => inner(rest, tail),
                _ => false,
            },
        }
    }
    inner(pattern.as_bytes(), candidate.as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    use sshca_core::config::{AllowedHostEntry, AllowedUserEntry};

    fn sample_config() -> ServerConfig {
        let mut allowed_users = HashMap::new();
        allowed_users.insert(
            "username@yourdomain.com".to_string(),
            AllowedUserEntry {
                username: "foo".to_string(),
                extra_principals: vec!["root".to_string()],
                cert_permissions: HashMap::new(),
            },
        );
        allowed_users.insert(
            "otheruser@yourdomain.com".to_string(),
            AllowedUserEntry {
                username: "bar".to_string(),
                extra_principals: vec![],
                cert_permissions: HashMap::new(),
            },
        );

        let mut allowed_hosts = HashMap::new();
        allowed_hosts.insert(
            "internal".to_string(),
            AllowedHostEntry {
                host_glob: "*.internal.example.com".to_string(),
                proof_of_control_token: "s3cr3t".to_string(),
            },
        );

        ServerConfig {
            ca_key_path: "/etc/sshca/ca_key".to_string(),
            listen_port: 8443,
            server_cert_path: "/etc/sshca/server.crt".to_string(),
            server_key_path: "/etc/sshca/server.key".to_string(),
            allowed_domain_for_id_token: "yourdomain.com".to_string(),
            allowed_client_id_for_id_token: "client-id.apps.example.com".to_string(),
            client_config_scope: "*.yourdomain.com".to_string(),
            ca_comment: "yourdomain-ssh-ca".to_string(),
            additional_ssh_configuration_line: vec![],
            generate_cert_duration_seconds: 86400,
            allowed_users,
            http_listen_port: None,
            allowed_hosts,
            caddy_file_path: None,
        }
    }

    #[test]
    fn resolves_known_user_with_principals_in_order() {
        let resolver = PolicyResolver::new(Arc::new(sample_config()));
        let decision = resolver.resolve_user("username@yourdomain.com").unwrap();
        assert_eq!(decision.principals, vec!["foo".to_string(), "root".to_string()]);
        assert_eq!(decision.ttl_secs, 86400);
    }

    #[test]
    fn resolves_second_user_without_root() {
        let resolver = PolicyResolver::new(Arc::new(sample_config()));
        let decision = resolver.resolve_user("otheruser@yourdomain.com").unwrap();
        assert_eq!(decision.principals, vec!["bar".to_string()]);
    }

    #[test]
    fn permit_pty_is_routed_to_extensions_not_critical_options() {
        let mut config = sample_config();
        let mut cert_permissions = HashMap::new();
        cert_permissions.insert("permit-pty".to_string(), String::new());
        cert_permissions.insert("permit-port-forwarding".to_string(), String::new());
        cert_permissions.insert("force-command".to_string(), "/usr/bin/true".to_string());
        config.allowed_users.get_mut("username@yourdomain.com").unwrap().cert_permissions = cert_permissions;

        let resolver = PolicyResolver::new(Arc::new(config));
        let decision = resolver.resolve_user("username@yourdomain.com").unwrap();

        assert!(decision.extensions.contains_key("permit-pty"));
        assert!(decision.extensions.contains_key("permit-port-forwarding"));
        assert!(!decision.critical_options.contains_key("permit-pty"));

        assert_eq!(decision.critical_options.get("force-command"), Some(&"/usr/bin/true".to_string()));
        assert!(!decision.extensions.contains_key("force-command"));
    }

    #[test]
    fn unknown_email_is_forbidden() {
        let resolver = PolicyResolver::new(Arc::new(sample_config()));
        let err = resolver.resolve_user("nobody@yourdomain.com").unwrap_err();
        assert_eq!(err.kind, sshca_core::error::IssueErrorKind::Forbidden);
    }

    #[test]
    fn host_glob_matches_wildcard_suffix() {
        let resolver = PolicyResolver::new(Arc::new(sample_config()));
        let decision = resolver.resolve_host("box1.internal.example.com").unwrap();
        assert_eq!(decision.principals, vec!["box1.internal.example.com".to_string()]);
        assert!(decision.critical_options.is_empty());
    }

    #[test]
    fn host_outside_any_glob_is_forbidden() {
        let resolver = PolicyResolver::new(Arc::new(sample_config()));
        let err = resolver.resolve_host("box1.elsewhere.com").unwrap_err();
        assert_eq!(err.kind, sshca_core::error::IssueErrorKind::Forbidden);
    }

    #[test]
    fn proof_of_control_token_lookup() {
        let resolver = PolicyResolver::new(Arc::new(sample_config()));
        assert_eq!(
            resolver.host_proof_of_control_token("box1.internal.example.com"),
            Some("s3cr3t")
        );
        assert_eq!(resolver.host_proof_of_control_token("nope.com"), None);
    }
}
