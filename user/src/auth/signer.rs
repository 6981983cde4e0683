//! Client-side request signing.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::canonical::{canonicalize, parse_query, sha256_hex};
use super::hmac::{compute_signature, string_to_sign};
use super::timestamp::format_timestamp;
use super::{CONTENT_HASH_HEADER, HEADER_PREFIX, SCHEME, TIMESTAMP_HEADER};
use crate::error::Result;

/// The half of a credential a client holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredential {
    pub session_id: String,
    pub secret: String,
}

impl ClientCredential {
    pub fn new(session_id: &str, secret: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            secret: secret.to_string(),
        }
    }
}

/// Signs a request and returns the headers to add to it:
/// `authorization`, the content hash and the timestamp.
///
/// `host` is always signed. Of `headers`, `content-type` and anything in the
/// `x-keystone-` namespace are signed too; the caller must send them
/// unchanged.
pub fn sign_request(
    credential: &ClientCredential,
    method: &str,
    host: &str,
    path_and_query: &str,
    headers: &[(String, String)],
    body: &[u8],
    at: DateTime<Utc>,
) -> Result<Vec<(String, String)>> {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (path_and_query, Vec::new()),
    };

    let timestamp = format_timestamp(at);
    let content_hash = sha256_hex(body);

    let mut all: BTreeMap<String, String> = headers
        .iter()
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    all.insert("host".to_string(), host.to_string());
    all.insert(CONTENT_HASH_HEADER.to_string(), content_hash.clone());
    all.insert(TIMESTAMP_HEADER.to_string(), timestamp.clone());

    let signed: Vec<String> = all
        .keys()
        .filter(|name| *name == "host" || *name == "content-type" || name.starts_with(HEADER_PREFIX))
        .cloned()
        .collect();

    let canonical = canonicalize(method, path, &query, &all, body, &signed);
    let signature = compute_signature(&credential.secret, &string_to_sign(&timestamp, &canonical))?;

    let authorization = format!(
        "{} Credential={},SignedHeaders={},Signature={}",
        SCHEME,
        credential.session_id,
        signed.join(";"),
        signature
    );

    Ok(vec![
        ("authorization".to_string(), authorization),
        (CONTENT_HASH_HEADER.to_string(), content_hash),
        (TIMESTAMP_HEADER.to_string(), timestamp),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> &'a str {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[test]
    fn test_signed_header_set() {
        let credential = ClientCredential::new("sid", "secret");
        let extra = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "*/*".to_string()),
        ];
        let headers = sign_request(&credential, "POST", "example.com", "/x", &extra, b"{}", at()).unwrap();

        let authorization = header(&headers, "authorization");
        assert!(authorization.starts_with("Keystone-HMAC-SHA256 Credential=sid,"));
        assert!(authorization
            .contains("SignedHeaders=content-type;host;x-keystone-content-sha256;x-keystone-timestamp,"));
        assert_eq!(header(&headers, TIMESTAMP_HEADER), "20240101T000000Z");
        assert_eq!(header(&headers, CONTENT_HASH_HEADER), sha256_hex(b"{}"));
    }

    #[test]
    fn test_known_signature() {
        let credential = ClientCredential::new("abc", "s3cr3t");
        let headers = sign_request(&credential, "GET", "example.com", "/api/v1/whoami", &[], b"", at()).unwrap();
        assert_eq!(
            header(&headers, "authorization"),
            "Keystone-HMAC-SHA256 Credential=abc,\
             SignedHeaders=host;x-keystone-content-sha256;x-keystone-timestamp,\
             Signature=3eb6ff838ac24a5541d216e448abc18db285db331183b07fc56491f72f013653"
        );

        let extra = vec![("content-type".to_string(), "application/json".to_string())];
        let headers = sign_request(
            &credential,
            "POST",
            "example.com",
            "/api/v1/records/notes?b=2&a=1",
            &extra,
            br#"{"title":"x"}"#,
            at(),
        )
        .unwrap();
        assert!(header(&headers, "authorization")
            .ends_with("Signature=73e795d84ab2f84817f3f392bb424495b3e50bc361d7b35533b11ef65d90f92e"));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let credential = ClientCredential::new("sid", "secret");
        let a = sign_request(&credential, "GET", "h", "/x?b=1&a=2", &[], b"", at()).unwrap();
        let b = sign_request(&credential, "GET", "h", "/x?a=2&b=1", &[], b"", at()).unwrap();
        assert_eq!(a, b);

        let other = ClientCredential::new("sid", "other");
        let c = sign_request(&other, "GET", "h", "/x?a=2&b=1", &[], b"", at()).unwrap();
        assert_ne!(header(&a, "authorization"), header(&c, "authorization"));
    }
}
