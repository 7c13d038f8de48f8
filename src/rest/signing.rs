//! AWS Signature Version 4 request signing
//!
//! Used for S3-compatible object stores (MinIO). Signs the method, path,
//! query, `host`, `x-amz-content-sha256` and `x-amz-date` headers.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::macros::format_description;
use time::OffsetDateTime;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Hex SHA-256 of an empty payload
pub const EMPTY_PAYLOAD_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Headers to attach to a signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub host: String,
    pub amz_date: String,
    pub content_sha256: String,
    pub authorization: String,
}

/// SigV4 signer for one set of credentials
#[derive(Clone)]
pub struct RequestSigner {
    access_key_id: String,
    secret_access_key: String,
    region: String,
    service: &'static str,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    /// Signer for the S3 service
    pub fn s3(access_key_id: &str, secret_access_key: &str, region: &str) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            region: region.to_string(),
            service: "s3",
        }
    }

    /// Sign a request at the current time
    pub fn sign(&self, method: &str, url: &Url, payload_sha256: &str) -> SignedHeaders {
        self.sign_at(method, url, payload_sha256, OffsetDateTime::now_utc())
    }

    /// Sign a request at a fixed time
    pub fn sign_at(&self, method: &str, url: &Url, payload_sha256: &str, at: OffsetDateTime) -> SignedHeaders {
        let (amz_date, date) = timestamps(at);
        let host = host_header(url);

        let canonical = canonical_request(method, url, &host, &amz_date, payload_sha256);
        let scope = format!("{}/{}/{}/aws4_request", date, self.region, self.service);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            sha256_hex(canonical.as_bytes())
        );

        let key = signing_key(&self.secret_access_key, &date, &self.region, self.service);
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={}",
            ALGORITHM, self.access_key_id, scope, signature
        );

        SignedHeaders {
            host,
            amz_date,
            content_sha256: payload_sha256.to_string(),
            authorization,
        }
    }
}

/// Hex-encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Derive the SigV4 signing key for a date/region/service scope
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

/// Percent-encode per RFC 3986, keeping unreserved characters
///
/// Slashes survive when `keep_slash` is set (object key paths).
pub fn uri_encode(input: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn timestamps(at: OffsetDateTime) -> (String, String) {
    let at = at.to_offset(time::UtcOffset::UTC);
    let amz_date = at
        .format(format_description!("[year][month][day]T[hour][minute][second]Z"))
        .unwrap_or_default();
    let date = amz_date.get(..8).unwrap_or_default().to_string();
    (amz_date, date)
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn canonical_request(method: &str, url: &Url, host: &str, amz_date: &str, payload_sha256: &str) -> String {
    // Callers build the path from `uri_encode`d segments, so it is used as is.
    let path = if url.path().is_empty() { "/" } else { url.path() };

    let mut query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k, false), uri_encode(&v, false)))
        .collect();
    query.sort();
    let query = query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}\n{}\n{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\nhost;x-amz-content-sha256;x-amz-date\n{}",
        method, path, query, host, payload_sha256, amz_date, payload_sha256
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_signing_key_reference_vector() {
        // Published SigV4 key-derivation example (IAM, us-east-1, 2012-02-15)
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_empty_payload_hash() {
        assert_eq!(sha256_hex(b""), EMPTY_PAYLOAD_SHA256);
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("a b/c~d", true), "a%20b/c~d");
        assert_eq!(uri_encode("a b/c", false), "a%20b%2Fc");
        assert_eq!(uri_encode("Photo-1_2.JPG", false), "Photo-1_2.JPG");
    }

    #[test]
    fn test_canonical_request_layout() {
        let url = Url::parse("http://localhost:9000/bucket/key.txt?b=2&a=1").unwrap();
        let canonical = canonical_request("PUT", &url, "localhost:9000", "20240101T000000Z", "abc");
        let lines: Vec<&str> = canonical.lines().collect();

        assert_eq!(lines[0], "PUT");
        assert_eq!(lines[1], "/bucket/key.txt");
        assert_eq!(lines[2], "a=1&b=2");
        assert_eq!(lines[3], "host:localhost:9000");
        assert_eq!(lines[4], "x-amz-content-sha256:abc");
        assert_eq!(lines[5], "x-amz-date:20240101T000000Z");
        assert_eq!(lines[6], "");
        assert_eq!(lines[7], "host;x-amz-content-sha256;x-amz-date");
        assert_eq!(lines[8], "abc");
    }

    #[test]
    fn test_sign_at_is_deterministic() {
        let signer = RequestSigner::s3("minio", "minio123", "us-east-1");
        let url = Url::parse("http://127.0.0.1:9000/uploads/report.pdf").unwrap();
        let at = datetime!(2024-03-05 12:34:56 UTC);

        let first = signer.sign_at("GET", &url, EMPTY_PAYLOAD_SHA256, at);
        let second = signer.sign_at("GET", &url, EMPTY_PAYLOAD_SHA256, at);

        assert_eq!(first, second);
        assert_eq!(first.amz_date, "20240305T123456Z");
        assert_eq!(first.host, "127.0.0.1:9000");
        assert!(first
            .authorization
            .starts_with("AWS4-HMAC-SHA256 Credential=minio/20240305/us-east-1/s3/aws4_request, "));
        let signature = first.authorization.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_signature_depends_on_method() {
        let signer = RequestSigner::s3("minio", "minio123", "us-east-1");
        let url = Url::parse("http://127.0.0.1:9000/uploads/a").unwrap();
        let at = datetime!(2024-03-05 12:34:56 UTC);

        let get = signer.sign_at("GET", &url, EMPTY_PAYLOAD_SHA256, at);
        let delete = signer.sign_at("DELETE", &url, EMPTY_PAYLOAD_SHA256, at);
        assert_ne!(get.authorization, delete.authorization);
    }

    #[test]
    fn test_debug_hides_secret() {
        let signer = RequestSigner::s3("minio", "topsecret", "us-east-1");
        assert!(!format!("{:?}", signer).contains("topsecret"));
    }
}
