//! The error-kind taxonomy shared by every layer of the CA, and the macro
//! used to generate it.
//!
//! This is a direct port of the `error_kind!` pattern used elsewhere in the
//! Lexe stack: a `Copy + Display` enum with stable numeric codes, generated
//! from a single declarative list so the wire `status` code, the `Display`
//! message, and the `from_code`/`to_code` round-trip can never drift out of
//! sync with each other.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The wire-serializable representation of an [`ErrorKindGenerated`] variant.
pub type ErrorCode = u16;

/// Trait implemented by every `error_kind!`-generated enum.
///
/// Kept deliberately small — see the doc comment on the macro for why.
pub trait ErrorKindGenerated:
    Copy + Clone + Default + Eq + PartialEq + fmt::Debug + fmt::Display + From<ErrorCode> + Sized + 'static
{
    /// All known variants, excluding `Unknown(_)`.
    const KINDS: &'static [Self];

    fn is_unknown(&self) -> bool;
    fn to_name(self) -> &'static str;
    fn to_msg(self) -> &'static str;
    fn to_code(self) -> ErrorCode;
    fn from_code(code: ErrorCode) -> Self;
}

/// Declares an error-kind enum and derives [`ErrorKindGenerated`] (and its
/// supertraits) for it.
///
/// ```ignore
/// error_kind! {
///     #[derive(Copy, Clone, Debug, Eq, PartialEq)]
///     pub enum FooErrorKind {
///         /// Unknown error
///         Unknown(ErrorCode),
///         /// A foo went wrong
///         Foo = 1,
///     }
/// }
/// ```
///
/// The `Unknown(ErrorCode)` variant must come first; it preserves the raw
/// code of anything this version of the software doesn't recognize (e.g. a
/// newer server talking to an older client).
#[macro_export]
macro_rules! error_kind {
    {
        $(#[$enum_meta:meta])*
        pub enum $name:ident {
            $( #[doc = $unknown_msg:literal] )*
            Unknown(ErrorCode),
            $(
                $( #[doc = $item_msg:literal] )*
                $item_name:ident = $item_code:literal
            ),* $(,)?
        }
    } => {
        $(#[$enum_meta])*
        pub enum $name {
            $( #[doc = $unknown_msg] )*
            Unknown(ErrorCode),
            $(
                $( #[doc = $item_msg] )*
                $item_name
            ),*
        }

        impl $crate::error::ErrorKindGenerated for $name {
            const KINDS: &'static [Self] = &[ $( Self::$item_name, )* ];

            fn is_unknown(&self) -> bool {
                matches!(self, Self::Unknown(_))
            }

            fn to_name(self) -> &'static str {
                match self {
                    $( Self::$item_name => stringify!($item_name), )*
                    Self::Unknown(_) => "Unknown",
                }
            }

            fn to_msg(self) -> &'static str {
                match self {
                    $( Self::$item_name => concat!($( $item_msg, )*), )*
                    Self::Unknown(_) => concat!($( $unknown_msg, )*),
                }
            }

            fn to_code(self) -> ErrorCode {
                match self {
                    $( Self::$item_name => $item_code, )*
                    Self::Unknown(code) => code,
                }
            }

            fn from_code(code: ErrorCode) -> Self {
                #[deny(unreachable_patterns)]
                match code {
                    0 => Self::Unknown(0),
                    $( $item_code => Self::$item_name, )*
                    _ => Self::Unknown(code),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::Unknown(0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let code = (*self).to_code();
                write!(f, "[{code}={}] {}", self.to_name(), self.to_msg())
            }
        }

        impl From<ErrorCode> for $name {
            fn from(code: ErrorCode) -> Self {
                Self::from_code(code)
            }
        }

        impl From<$name> for ErrorCode {
            fn from(kind: $name) -> ErrorCode {
                kind.to_code()
            }
        }
    };
}

error_kind! {
    /// The kinds of failure an `IssueUserCert`/`IssueHostCert` request can
    /// terminate with. Mirrors the taxonomy from the design doc §7.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
    pub enum IssueErrorKind {
        /// An error kind this build doesn't recognize
        Unknown(ErrorCode),

        /// the server's own configuration failed to load or validate
        ConfigInvalid = 1,
        /// the identity provider's signing keys could not be fetched
        KeySetUnavailable = 2,
        /// the token's `kid` does not match any known signing key
        UnknownKeyId = 3,
        /// the presented ID token failed validation
        TokenInvalid = 4,
        /// the client-supplied public key was unparseable or too weak
        BadPublicKey = 5,
        /// the identity has no matching policy entry
        Forbidden = 6,
        /// the CA failed to sign the certificate
        SigningFailed = 7,
        /// a connection-level failure; safe to retry
        TransportError = 8,
    }
}

/// `ClockSkew` is deliberately *not* a member of [`IssueErrorKind`]: per
/// the design doc, it's an internal-only signal that drives the verifier's
/// own bounded retry loop and must never reach the wire. Modeling it in a
/// separate, narrower type makes "this can't leak to a client" a property
/// the type system enforces rather than a convention callers must remember.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockSkewDetected {
    /// How far in the future `iat` claimed to be, in seconds.
    pub skew_secs: u64,
}

/// The error type returned by every fallible operation in the CA's core
/// (C1–C6). Carries a stable [`IssueErrorKind`] plus a free-form diagnostic
/// that is safe to show to a caller (never a stack trace, never a secret).
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {msg}")]
pub struct IssueError {
    pub kind: IssueErrorKind,
    pub msg: String,
}

impl IssueError {
    pub fn new(kind: IssueErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, msg: msg.into() }
    }

    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::new(IssueErrorKind::ConfigInvalid, msg)
    }

    pub fn keyset_unavailable(msg: impl Into<String>) -> Self {
        Self::new(IssueErrorKind::KeySetUnavailable, msg)
    }

    pub fn unknown_key_id(kid: impl Into<String>) -> Self {
        Self::new(IssueErrorKind::UnknownKeyId, format!("unknown kid {}", kid.into()))
    }

    pub fn token_invalid(msg: impl Into<String>) -> Self {
        Self::new(IssueErrorKind::TokenInvalid, msg)
    }

    pub fn bad_public_key(msg: impl Into<String>) -> Self {
        Self::new(IssueErrorKind::BadPublicKey, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(IssueErrorKind::Forbidden, msg)
    }

    pub fn signing_failed(msg: impl Into<String>) -> Self {
        Self::new(IssueErrorKind::SigningFailed, msg)
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(IssueErrorKind::TransportError, msg)
    }

    /// The non-zero wire status code for this error. `IssueErrorKind`
    /// reserves `0` for `Unknown(0)`/success, matching spec.md §7's
    /// "`status == 0` means success" contract.
    pub fn status(&self) -> u16 {
        use crate::error::ErrorKindGenerated as _;
        let code = self.kind.to_code();
        debug_assert_ne!(code, 0, "a real error must never serialize to status 0");
        code
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for kind in IssueErrorKind::KINDS {
            let code = kind.to_code();
            assert_ne!(code, 0, "{kind:?} must not use reserved code 0");
            assert_eq!(IssueErrorKind::from_code(code), *kind);
        }
    }

    #[test]
    fn unknown_preserves_code() {
        let kind = IssueErrorKind::from_code(9999);
        assert!(kind.is_unknown());
        assert_eq!(kind.to_code(), 9999);
    }

    #[test]
    fn status_never_zero_for_real_errors() {
        let err = IssueError::forbidden("no policy entry");
        assert_eq!(err.status(), 6);
    }
}
