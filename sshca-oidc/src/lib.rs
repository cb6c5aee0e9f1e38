//! C1 (KeySet Cache) and C2 (Token Verifier): everything needed to turn a
//! compact OIDC ID token into a [`sshca_core::types::VerifiedIdentity`]
//! without trusting anything but the provider's published signing keys.

pub mod keyset;
pub mod token;

pub use keyset::KeySetCache;
pub use token::TokenVerifier;
