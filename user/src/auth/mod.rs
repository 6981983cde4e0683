//! Request authentication for Keystone.
//!
//! - `credential`: issuing and expiring per-user symmetric credentials
//! - `canonical`: the canonical request both sides sign
//! - `hmac`: server-side verification
//! - `signer`: client-side signing

pub mod canonical;
pub mod credential;
pub mod hmac;
pub mod signer;
pub mod timestamp;

/// Authorization scheme prefix; the remainder names the algorithm.
pub const SCHEME_PREFIX: &str = "Keystone-";
pub const ALGORITHM: &str = "HMAC-SHA256";
pub const SCHEME: &str = "Keystone-HMAC-SHA256";
/// First line of every string to sign.
pub const STRING_TO_SIGN_TAG: &str = "KEYSTONE-HMAC-SHA256";
/// Headers in this namespace must be signed when present.
pub const HEADER_PREFIX: &str = "x-keystone-";
pub const CONTENT_HASH_HEADER: &str = "x-keystone-content-sha256";
pub const TIMESTAMP_HEADER: &str = "x-keystone-timestamp";

pub use credential::{
    Credential, CredentialConfig, CredentialStore, SqliteCredentialStore, TouchOutcome,
};
pub use hmac::{
    AuthFailure, AuthOutcome, AuthenticatorConfig, HmacAuthenticator, InboundRequest, TouchPolicy,
};
pub use signer::{sign_request, ClientCredential};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_is_prefix_and_algorithm() {
        assert_eq!(SCHEME, format!("{}{}", SCHEME_PREFIX, ALGORITHM));
        assert_eq!(STRING_TO_SIGN_TAG, SCHEME.to_ascii_uppercase());
        assert!(CONTENT_HASH_HEADER.starts_with(HEADER_PREFIX));
        assert!(TIMESTAMP_HEADER.starts_with(HEADER_PREFIX));
    }
}
