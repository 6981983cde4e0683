//! HMAC request authentication.
//!
//! Verifies the `Authorization` header of an inbound request:
//!
//! ```text
//! Authorization: Keystone-HMAC-SHA256 Credential=<session id>,
//!                SignedHeaders=host;x-keystone-content-sha256;x-keystone-timestamp,
//!                Signature=<hex hmac>
//! ```
//!
//! A request that fails any check is not an error: it degrades to the
//! anonymous identity and carries the reason for logging. Only storage
//! failures surface as `Err`.

use authz::{Identity, UserId};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::canonical::{canonicalize, normalize_signed_headers, parse_query, sha256_hex};
use super::credential::{CredentialStore, TouchOutcome};
use super::timestamp::parse_timestamp;
use super::{
    ALGORITHM, CONTENT_HASH_HEADER, HEADER_PREFIX, SCHEME_PREFIX, STRING_TO_SIGN_TAG,
    TIMESTAMP_HEADER,
};
use crate::error::{Result, UserError};

type HmacSha256 = Hmac<Sha256>;

/// Whether authenticated requests refresh their credential's access time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchPolicy {
    /// Only the validate-session endpoint touches credentials.
    #[default]
    Explicit,
    /// Every successfully verified request touches its credential.
    EveryRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatorConfig {
    /// Largest accepted distance between the request timestamp and now.
    pub max_skew: Duration,
    pub touch_policy: TouchPolicy,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            max_skew: Duration::minutes(5),
            touch_policy: TouchPolicy::Explicit,
        }
    }
}

/// The parts of an HTTP request the authenticator reads.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    /// Keyed by lowercase name; values trimmed.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl InboundRequest {
    /// Builds a request from raw parts. Repeated headers are joined with `,`.
    pub fn new<'a, I>(method: &str, path: &str, raw_query: Option<&str>, headers: I, body: Vec<u8>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut collected: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            collected
                .entry(name)
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query: raw_query.map(parse_query).unwrap_or_default(),
            headers: collected,
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Why a request was treated as anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    NoAuthorizationHeader,
    UnknownAlgorithm(String),
    MissingParameter(&'static str),
    UnsignedRequiredHeaders(Vec<String>),
    MissingHeaders(Vec<String>),
    InvalidTimestamp,
    RequestTooOld,
    ContentHashMismatch,
    InvalidCredential,
    SignatureMismatch,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::NoAuthorizationHeader => write!(f, "no valid authorization header"),
            AuthFailure::UnknownAlgorithm(alg) => write!(f, "unknown algorithm: {}", alg),
            AuthFailure::MissingParameter(name) => write!(f, "missing parameter: {}", name),
            AuthFailure::UnsignedRequiredHeaders(names) => {
                write!(f, "required headers not signed: {}", names.join(", "))
            }
            AuthFailure::MissingHeaders(names) => write!(f, "missing headers: {}", names.join(", ")),
            AuthFailure::InvalidTimestamp => write!(f, "invalid timestamp"),
            AuthFailure::RequestTooOld => write!(f, "request is too old"),
            AuthFailure::ContentHashMismatch => write!(f, "content hash mismatch"),
            AuthFailure::InvalidCredential => write!(f, "invalid credential"),
            AuthFailure::SignatureMismatch => write!(f, "signature mismatch"),
        }
    }
}

/// Result of verifying a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated { owner_id: UserId, session_id: String },
    Anonymous(AuthFailure),
}

impl AuthOutcome {
    pub fn identity(&self) -> Identity {
        match self {
            AuthOutcome::Authenticated { owner_id, .. } => Identity::User(*owner_id),
            AuthOutcome::Anonymous(_) => Identity::Anonymous,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated { .. })
    }

    /// `"authenticated"` or the failure reason.
    pub fn reason(&self) -> String {
        match self {
            AuthOutcome::Authenticated { .. } => "authenticated".to_string(),
            AuthOutcome::Anonymous(failure) => failure.to_string(),
        }
    }
}

/// Parsed `Authorization` header parameters.
struct AuthorizationParams {
    session_id: String,
    signed_headers: Vec<String>,
    signature: String,
}

fn parse_authorization(value: &str) -> std::result::Result<AuthorizationParams, AuthFailure> {
    let value = value.trim();
    let (scheme, rest) = value
        .split_once(char::is_whitespace)
        .unwrap_or((value, ""));

    let prefix_len = SCHEME_PREFIX.len();
    if scheme.len() < prefix_len
        || !scheme.is_char_boundary(prefix_len)
        || !scheme[..prefix_len].eq_ignore_ascii_case(SCHEME_PREFIX)
    {
        return Err(AuthFailure::NoAuthorizationHeader);
    }

    let algorithm = &scheme[prefix_len..];
    if !algorithm.eq_ignore_ascii_case(ALGORITHM) {
        return Err(AuthFailure::UnknownAlgorithm(algorithm.to_string()));
    }

    let params: HashMap<String, String> = rest
        .split(',')
        .filter_map(|part| {
            let (name, value) = part.split_once('=')?;
            Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();

    let param = |name: &'static str| {
        params
            .get(&name.to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or(AuthFailure::MissingParameter(name))
    };

    let session_id = param("Credential")?;
    let signed_headers = param("SignedHeaders")?;
    let signature = param("Signature")?;

    Ok(AuthorizationParams {
        session_id,
        signed_headers: normalize_signed_headers(&signed_headers.split(';').collect::<Vec<_>>()),
        signature,
    })
}

/// Headers that must be covered by the signature.
fn required_headers(request: &InboundRequest) -> BTreeSet<String> {
    let mut required: BTreeSet<String> = ["host", CONTENT_HASH_HEADER, TIMESTAMP_HEADER]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for name in request.headers.keys() {
        if name.starts_with(HEADER_PREFIX) || name == "content-type" {
            required.insert(name.clone());
        }
    }
    required
}

/// Builds the string to sign from a timestamp and canonical request.
pub fn string_to_sign(timestamp: &str, canonical_request: &[u8]) -> String {
    format!(
        "{}\n{}\n{}",
        STRING_TO_SIGN_TAG,
        timestamp,
        sha256_hex(canonical_request)
    )
}

/// Lowercase hex HMAC-SHA256 of `message` keyed by `secret`.
pub fn compute_signature(secret: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| UserError::Signing(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Verifies signed requests against a credential store.
pub struct HmacAuthenticator<S: CredentialStore> {
    store: Arc<S>,
    config: AuthenticatorConfig,
}

impl<S: CredentialStore> Clone for HmacAuthenticator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config,
        }
    }
}

impl<S: CredentialStore> HmacAuthenticator<S> {
    pub fn new(store: Arc<S>, config: AuthenticatorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn verify(&self, request: &InboundRequest) -> Result<AuthOutcome> {
        self.verify_at(request, Utc::now()).await
    }

    /// Verifies `request` as of `now`.
    pub async fn verify_at(&self, request: &InboundRequest, now: DateTime<Utc>) -> Result<AuthOutcome> {
        let outcome = match self.check(request, now).await? {
            Ok((owner_id, session_id)) => AuthOutcome::Authenticated {
                owner_id,
                session_id,
            },
            Err(failure) => AuthOutcome::Anonymous(failure),
        };

        debug!(
            "Authentication of {} {}: {}",
            request.method,
            request.path,
            outcome.reason()
        );
        Ok(outcome)
    }

    async fn check(
        &self,
        request: &InboundRequest,
        now: DateTime<Utc>,
    ) -> Result<std::result::Result<(UserId, String), AuthFailure>> {
        let Some(authorization) = request.header("authorization") else {
            return Ok(Err(AuthFailure::NoAuthorizationHeader));
        };
        let params = match parse_authorization(authorization) {
            Ok(params) => params,
            Err(failure) => return Ok(Err(failure)),
        };

        let signed: BTreeSet<&str> = params.signed_headers.iter().map(String::as_str).collect();
        let unsigned: Vec<String> = required_headers(request)
            .into_iter()
            .filter(|name| !signed.contains(name.as_str()))
            .collect();
        if !unsigned.is_empty() {
            return Ok(Err(AuthFailure::UnsignedRequiredHeaders(unsigned)));
        }

        let missing: Vec<String> = params
            .signed_headers
            .iter()
            .filter(|name| !request.headers.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Ok(Err(AuthFailure::MissingHeaders(missing)));
        }

        // Both present: required and signed.
        let timestamp = request.header(TIMESTAMP_HEADER).unwrap_or_default();
        let Some(signed_at) = parse_timestamp(timestamp) else {
            return Ok(Err(AuthFailure::InvalidTimestamp));
        };
        if (now - signed_at).abs() > self.config.max_skew {
            return Ok(Err(AuthFailure::RequestTooOld));
        }

        let content_hash = request.header(CONTENT_HASH_HEADER).unwrap_or_default();
        if !content_hash.eq_ignore_ascii_case(&sha256_hex(&request.body)) {
            return Ok(Err(AuthFailure::ContentHashMismatch));
        }

        let Some(credential) = self.store.lookup(&params.session_id).await? else {
            return Ok(Err(AuthFailure::InvalidCredential));
        };

        let canonical = canonicalize(
            &request.method,
            &request.path,
            &request.query,
            &request.headers,
            &request.body,
            &params.signed_headers,
        );
        let expected = compute_signature(&credential.secret, &string_to_sign(timestamp, &canonical))?;
        let provided = params.signature.to_ascii_lowercase();
        if !constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
            return Ok(Err(AuthFailure::SignatureMismatch));
        }

        if self.config.touch_policy == TouchPolicy::EveryRequest {
            match self.store.touch_at(&credential.session_id, now).await? {
                TouchOutcome::Refreshed => {}
                TouchOutcome::Expired | TouchOutcome::NotFound => {
                    return Ok(Err(AuthFailure::InvalidCredential));
                }
            }
        }

        Ok(Ok((credential.owner_id, credential.session_id)))
    }
}
