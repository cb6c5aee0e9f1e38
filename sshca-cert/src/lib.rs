//! C4 (CA Signer), C5 (Certificate Minter), and C6 (Client Artifact
//! Assembler): everything downstream of an authorization decision that
//! produces a signed SSH certificate and the lines a client splices into its
//! local config.

pub mod artifacts;
pub mod ca;
pub mod mint;

pub use ca::CaSigner;
pub use mint::CertMinter;
