//! Canonical request fingerprinting and key derivation.
//!
//! Grounded on the teacher's `key/extractors.rs`, which also turns a request
//! into a canonical string for keying — but inbound (server-seen headers) not
//! outbound (client-issued URL + body). The normalization rules here come
//! straight from `SPEC_FULL.md` §4.4: the `url` crate already parses and
//! lowercases scheme/host, so normalization is mostly sorting query pairs and
//! re-serializing without the fragment; body hashing uses `blake2` since the
//! teacher has no body-hashing precedent and BLAKE2b is the algorithm named
//! by the spec outright.

use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use url::Url;

type Blake2b128 = Blake2b<U16>;

/// An outbound HTTP method, restricted to what the fingerprinter needs to
/// know: whether the method's semantics include a request body.
pub fn method_has_body(method: &str) -> bool {
    !matches!(
        method.to_ascii_uppercase().as_str(),
        "GET" | "HEAD" | "DELETE" | "OPTIONS" | "TRACE"
    )
}

/// Normalize `url` per the spec's rules: lowercase scheme/host, elide the
/// default port for the scheme, percent-decode unreserved path characters,
/// sort query parameters lexicographically, and strip any fragment.
///
/// Returns the original string unchanged if it cannot be parsed as a URL —
/// the fingerprint is still deterministic, just not normalized.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };

    url.set_fragment(None);

    if let Some(port) = url.port() {
        let default = match url.scheme() {
            "http" => Some(80),
            "https" => Some(443),
            _ => None,
        };
        if default == Some(port) {
            let _ = url.set_port(None);
        }
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
        url.set_query(Some(&serializer.finish()));
    }

    let decoded_path = percent_decode_unreserved(url.path());
    url.set_path(&decoded_path);

    url.to_string()
}

/// Percent-decode only the RFC 3986 "unreserved" characters
/// (`A-Z a-z 0-9 - . _ ~`); leaves every other percent-escape untouched so
/// the path's reserved structure (`/`, `%2F`, etc.) survives normalization.
fn percent_decode_unreserved(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = String::with_capacity(path.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(value) = u8::from_str_radix(hex, 16) {
                    if is_unreserved(value) {
                        out.push(value as char);
                        i += 3;
                        continue;
                    }
                }
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

/// 16-byte BLAKE2b digest of a request body, hex-encoded.
pub fn hash_body(body: &[u8]) -> String {
    let mut hasher = Blake2b128::new();
    hasher.update(body);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Canonical fingerprint for `(method, url)`, including a body hash when the
/// method's semantics include a body.
pub fn fingerprint(method: &str, url: &str, body: Option<&[u8]>) -> String {
    let normalized = normalize_url(url);
    let mut parts = vec![method.to_ascii_uppercase(), normalized];
    if method_has_body(method) {
        let hash = hash_body(body.unwrap_or(&[]));
        parts.push(hash);
    }
    let joined = parts.join("\u{1}");
    hash_body(joined.as_bytes())
}

/// The rate-limit/cache scope a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Global,
    Host(&'a str),
    Endpoint(&'a str),
}

/// Build the namespaced backend key for `scope` under `prefix`, per §4.4.
pub fn limiter_key(prefix: &str, scope: Scope<'_>) -> String {
    match scope {
        Scope::Global => format!("{prefix}:ratelimit:global"),
        Scope::Host(host) => format!("{prefix}:ratelimit:host:{host}"),
        Scope::Endpoint(fp) => format!("{prefix}:ratelimit:endpoint:{fp}"),
    }
}

/// Build the namespaced cache key for a fingerprint, per §4.4.
pub fn cache_key(prefix: &str, fp: &str) -> String {
    format!("{prefix}:cache:{fp}")
}

/// Extract the lowercased host from `url`, for the per-host limiter scope.
/// Falls back to the raw string if it cannot be parsed as a URL.
pub fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_scheme_host_and_default_port() {
        assert_eq!(
            normalize_url("HTTP://Example.COM:80/a"),
            "http://example.com/a"
        );
    }

    #[test]
    fn keeps_non_default_port() {
        assert_eq!(normalize_url("http://example.com:8080/a"), "http://example.com:8080/a");
    }

    #[test]
    fn sorts_query_parameters() {
        let normalized = normalize_url("http://example.com/a?b=2&a=1");
        assert_eq!(normalized, "http://example.com/a?a=1&b=2");
    }

    #[test]
    fn strips_fragment() {
        assert_eq!(normalize_url("http://example.com/a#frag"), "http://example.com/a");
    }

    #[test]
    fn fingerprint_is_deterministic_regardless_of_query_order() {
        let a = fingerprint("GET", "http://example.com/a?b=2&a=1", None);
        let b = fingerprint("GET", "http://example.com/a?a=1&b=2", None);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_bodies_for_post() {
        let a = fingerprint("POST", "http://example.com/a", Some(b"one"));
        let b = fingerprint("POST", "http://example.com/a", Some(b"two"));
        assert_ne!(a, b);
    }

    #[test]
    fn get_requests_ignore_body_in_fingerprint() {
        let a = fingerprint("GET", "http://example.com/a", Some(b"one"));
        let b = fingerprint("GET", "http://example.com/a", Some(b"two"));
        assert_eq!(a, b);
    }

    #[test]
    fn host_of_lowercases_and_strips_path() {
        assert_eq!(host_of("http://Example.COM/a/b"), "example.com");
    }

    #[test]
    fn key_formats_match_spec() {
        assert_eq!(limiter_key("app", Scope::Global), "app:ratelimit:global");
        assert_eq!(limiter_key("app", Scope::Host("example.com")), "app:ratelimit:host:example.com");
        assert_eq!(limiter_key("app", Scope::Endpoint("fp")), "app:ratelimit:endpoint:fp");
        assert_eq!(cache_key("app", "fp"), "app:cache:fp");
    }
}
