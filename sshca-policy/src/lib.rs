//! C3: Policy Resolver.
//!
//! Maps a verified identity (or a requested hostname) to an
//! [`AuthorizationDecision`] against an immutable, startup-loaded policy
//! table. Design doc §4.3.

pub mod resolver;

pub use resolver::PolicyResolver;
