//! AWS Signature Version 4 request signing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// SHA-256 of an empty payload, hex encoded
pub const EMPTY_PAYLOAD_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(Debug, thiserror::Error)]
#[error("invalid HMAC signing key")]
pub struct SigningError;

/// Who signs, for which region and service, at what instant
pub struct SigningParams<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

impl SigningParams<'_> {
    fn date(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    fn timestamp(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn scope(&self) -> String {
        format!("{}/{}/{}/aws4_request", self.date(), self.region, self.service)
    }
}

/// Sign a request in place
///
/// `headers` must use lowercase names. `host`, `x-amz-date`,
/// `x-amz-content-sha256`, the session token (when present) and
/// `authorization` are added; every header present is signed.
pub fn sign(
    params: &SigningParams<'_>,
    method: &str,
    url: &Url,
    headers: &mut BTreeMap<String, String>,
    payload: &[u8],
) -> Result<(), SigningError> {
    headers.insert("host".to_string(), host_header(url));
    headers.insert("x-amz-date".to_string(), params.timestamp());
    headers.insert("x-amz-content-sha256".to_string(), hex_sha256(payload));
    if let Some(token) = params.session_token {
        headers.insert("x-amz-security-token".to_string(), token.to_string());
    }
    headers.remove("authorization");

    let signed_headers = headers.keys().map(String::as_str).collect::<Vec<_>>().join(";");
    let canonical_request = canonical_request(method, url, headers, &signed_headers, &hex_sha256(payload));

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        params.timestamp(),
        params.scope(),
        hex_sha256(canonical_request.as_bytes())
    );

    let key = signing_key(params.secret_access_key, &params.date(), params.region, params.service)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    headers.insert(
        "authorization".to_string(),
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            params.access_key_id,
            params.scope(),
            signed_headers,
            signature
        ),
    );

    Ok(())
}

fn canonical_request(
    method: &str,
    url: &Url,
    headers: &BTreeMap<String, String>,
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        url.path(),
        canonical_query(url),
        canonical_headers,
        signed_headers,
        payload_hash
    )
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();

    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// RFC 3986 encoding with the unreserved set AWS expects
fn uri_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect()
}

pub fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(|_| SigningError)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>, SigningError> {
    let key = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let key = hmac_sha256(&key, region.as_bytes())?;
    let key = hmac_sha256(&key, service.as_bytes())?;
    hmac_sha256(&key, b"aws4_request")
}
