//! Canonical request serialization.
//!
//! Client and server must derive the same bytes from the same request, so
//! every free-form part is normalized:
//!
//! ```text
//! METHOD
//! /percent/encoded/path
//! a=1&b=2%20x              sorted (key, value) pairs
//! host:example.com         one line per signed header, sorted by name
//! x-keystone-timestamp:...
//! host;x-keystone-timestamp
//! <hex sha256 of body>
//! ```

use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn decode(component: &str) -> Cow<'_, str> {
    urlencoding::decode(component).unwrap_or(Cow::Borrowed(component))
}

/// Percent-encodes a path, leaving RFC 3986 unreserved characters and `/`
/// verbatim. Segments are decoded first so an already-encoded path and its
/// decoded form canonicalize the same way.
pub fn canonical_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(&decode(segment)).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Splits a raw query string into decoded `(key, value)` pairs.
///
/// `+` is read as a space. A pair without `=` has an empty value.
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = key.replace('+', " ");
            let value = value.replace('+', " ");
            (decode(&key).into_owned(), decode(&value).into_owned())
        })
        .collect()
}

/// Pairs sorted by raw `(key, value)`, then percent-encoded as
/// `k=v&k=v`. Empty when there are no parameters.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    sorted
        .into_iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercased, sorted, deduplicated header names.
pub fn normalize_signed_headers<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut names: Vec<String> = names
        .iter()
        .map(|n| n.as_ref().trim().to_ascii_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Builds the canonical request bytes.
///
/// `headers` must be keyed by lowercase name. A signed header missing from
/// `headers` is emitted with an empty value; callers reject such requests
/// before they get here.
pub fn canonicalize<S: AsRef<str>>(
    method: &str,
    path: &str,
    query_params: &[(String, String)],
    headers: &BTreeMap<String, String>,
    body: &[u8],
    signed_header_names: &[S],
) -> Vec<u8> {
    let signed = normalize_signed_headers(signed_header_names);

    let header_lines = signed
        .iter()
        .map(|name| {
            let value = headers.get(name).map(|v| v.trim()).unwrap_or("");
            format!("{}:{}", name, value)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        canonical_path(path),
        canonical_query(query_params),
        header_lines,
        signed.join(";"),
        sha256_hex(body),
    )
    .into_bytes()
}
