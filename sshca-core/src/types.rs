//! Types shared across the verifier, policy resolver, and cert minter, kept
//! here (rather than duplicated or made circular) because all three crates
//! need to agree on their shape.

use serde::{Deserialize, Serialize};

/// An email/hosted-domain identity that has passed every check in design
/// doc §4.2. Only ever constructed by the token verifier.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    /// Lowercased, trimmed email address.
    pub email: String,
    pub hosted_domain: String,
}

/// Which kind of SSH certificate is being requested/minted.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CertKind {
    User,
    Host,
}

/// The output of the policy resolver (C3): everything the cert minter needs
/// to build a cert draft for an authorized request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub kind: CertKind,
    /// Ordered, deduplicated; `principals[0]` is always the primary
    /// identifier (local username for user certs, hostname for host certs).
    pub principals: Vec<String>,
    pub critical_options: std::collections::BTreeMap<String, String>,
    pub extensions: std::collections::BTreeMap<String, String>,
    pub ttl_secs: u32,
}

/// Builds the `[primary] ++ extra` principal list with stable order and
/// deduplication, per design doc §4.3.
///
/// `extra` entries already equal to `primary` are dropped; later duplicates
/// within `extra` are dropped too, keeping the first occurrence's position.
pub fn build_principals(primary: &str, extra: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(1 + extra.len());
    seen.insert(primary.to_string());
    out.push(primary.to_string());
    for p in extra {
        if seen.insert(p.clone()) {
            out.push(p.clone());
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dedups_and_orders_with_primary_first() {
        let principals = build_principals(
            "foo",
            &["root".to_string(), "foo".to_string(), "root".to_string()],
        );
        assert_eq!(principals, vec!["foo".to_string(), "root".to_string()]);
    }

    #[test]
    fn no_extras_returns_just_primary() {
        let principals = build_principals("bar", &[]);
        assert_eq!(principals, vec!["bar".to_string()]);
    }
}
