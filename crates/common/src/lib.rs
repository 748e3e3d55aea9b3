// ================
// common/src/lib.rs
// ================
//! Common types and helpers
//! shared between the repogate service and the proxies that call it.
//! This module defines how credentials travel on the wire and the
//! payloads exposed over HTTP.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    DecodeError, Engine as _,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Realm advertised in `WWW-Authenticate` challenges
pub const REALM: &str = "repogate";

/// Authorization scheme accepted by the service
pub const BASIC_SCHEME: &str = "Basic";

/// Header carrying the scheme the client used to reach the reverse proxy
pub const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Header carrying the host the client asked the reverse proxy for
pub const FORWARDED_HOST: &str = "x-forwarded-host";

/// Standard alphabet; encodes without padding, decodes with or without it.
/// Non-zero trailing bits are rejected.
pub const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(false),
);

/// Decode base64 the way a MIME decoder would, skipping line breaks and other whitespace.
pub fn decode_lenient(input: &str) -> Result<Vec<u8>, DecodeError> {
    let compact: Zeroizing<String> =
        Zeroizing::new(input.chars().filter(|c| !c.is_ascii_whitespace()).collect());
    BASE64.decode(compact.as_bytes())
}

/// Decode an `Authorization: Basic <base64>` header value into raw `user:password` bytes.
///
/// Returns `None` for any other scheme or undecodable payload. The returned
/// buffer is wiped when dropped.
pub fn decode_basic_header(value: &str) -> Option<Zeroizing<Vec<u8>>> {
    let value = value.trim();
    let (scheme, payload) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(BASIC_SCHEME) {
        return None;
    }
    decode_lenient(payload).ok().map(Zeroizing::new)
}

/// Split raw Basic credentials at the first `:`.
///
/// User names cannot contain `:`, passwords can. A user name that is not
/// UTF-8 is rejected.
pub fn split_credentials(raw: &[u8]) -> Option<(&str, &[u8])> {
    let colon = raw.iter().position(|b| *b == b':')?;
    let user = std::str::from_utf8(&raw[..colon]).ok()?;
    Some((user, &raw[colon + 1..]))
}

/// Payload returned by `GET /health`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    /// Always `"ok"` while the process is serving
    pub status: String,
    /// Crate version of the running service
    pub version: String,
    /// Number of configured hosts, the wildcard host included
    pub hosts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_basic_header() {
        // "alice:s3cr:et" with padding, and once more split across lines
        let raw = decode_basic_header("Basic YWxpY2U6czNjcjpldA==").unwrap();
        assert_eq!(raw.as_slice(), b"alice:s3cr:et");

        let raw = decode_basic_header("basic YWxpY2U6\r\nczNjcjpldA").unwrap();
        assert_eq!(raw.as_slice(), b"alice:s3cr:et");

        assert!(decode_basic_header("Bearer YWxpY2U6czNjcjpldA").is_none());
        assert!(decode_basic_header("Basic").is_none());
        assert!(decode_basic_header("Basic !!!").is_none());
    }

    #[test]
    fn test_split_credentials() {
        let (user, password) = split_credentials(b"alice:s3cr:et").unwrap();
        assert_eq!(user, "alice");
        assert_eq!(password, b"s3cr:et");

        let (user, password) = split_credentials(b"bob:").unwrap();
        assert_eq!(user, "bob");
        assert!(password.is_empty());

        assert!(split_credentials(b"no-separator").is_none());
        assert!(split_credentials(&[0xff, 0xfe, b':', b'x']).is_none());
    }

    #[test]
    fn test_encoding_is_unpadded() {
        assert_eq!(BASE64.encode(b"ab"), "YWI");
        assert_eq!(decode_lenient("YWI=").unwrap(), b"ab");
    }

    #[test]
    fn test_non_canonical_trailing_bits_are_rejected() {
        // "YWJ" carries a set bit past the end of "ab"
        assert!(decode_lenient("YWJ").is_err());
        assert!(decode_lenient("YWJ=").is_err());

        let decoded = decode_lenient("c2FsdHNhbHQ").unwrap();
        assert_eq!(BASE64.encode(&decoded), "c2FsdHNhbHQ");
    }

    #[test]
    fn test_health_status_serialization() {
        let status = HealthStatus {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            hosts: 2,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["hosts"], 2);
    }
}
