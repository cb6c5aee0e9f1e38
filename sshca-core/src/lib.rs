//! Shared domain types, configuration, error taxonomy, and retry primitives
//! used by every other crate in the SSH CA service.

pub mod backoff;
pub mod config;
pub mod error;
pub mod types;

/// The approved SSH CA host/user cert key-id prefixes, per design doc §4.5.
pub const USER_KEY_ID_PREFIX: &str = "user:";
pub const HOST_KEY_ID_PREFIX: &str = "host:";

/// Clock tolerance subtracted from `valid_after`, per design doc §4.5 step 4.
pub const VALID_AFTER_CLOCK_TOLERANCE_SECS: u64 = 60;

/// Max clock-skew retries a caller (C5 or C9) is allowed, per design doc §4.2.
pub const MAX_CLOCK_SKEW_RETRIES: u32 = 5;

/// Minimum acceptable RSA client-key modulus size, per design doc §4.5 step 2.
pub const MIN_RSA_KEY_BITS: usize = 2048;

/// Google's published JWKS endpoint, fetched by C1. Not configurable: the
/// identity provider is fixed, per design doc §4.1/§9.
pub const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// The two `iss` claim forms Google's ID tokens may carry, per design doc
/// §4.2 step 5's "iss ∈ {the two issuer strings published by the provider}".
pub const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];

/// Google's OAuth 2.0 authorization endpoint, used by C9 to build the URL a
/// human opens in a browser. The browser dance itself (driving an actual
/// browser window) is an external collaborator per design doc §1; this
/// constant is the one fixed fact C9 needs to build that URL.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google's OAuth 2.0 token endpoint, used by C9 for the authorization-code
/// and refresh-token exchanges.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Default inclusive port range C9's loopback redirect listener tries, in
/// order, before falling back to the out-of-band copy-paste flow (design doc
/// §4.9).
pub const DEFAULT_LOOPBACK_PORT_RANGE: (u16, u16) = (8085, 8095);

/// How long C9's loopback listener waits for a redirect before giving up and
/// falling back to the out-of-band flow.
pub const LOOPBACK_TIMEOUT_SECS: u64 = 120;
