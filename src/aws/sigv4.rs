// SigV4 request signing
// Canonical request, string to sign, derived key chain, hex signature

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const HMAC_BLOCK_LEN: usize = 64;
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// HMAC-SHA256, the textbook ipad/opad construction over sha2.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut key_block = [0u8; HMAC_BLOCK_LEN];
    if key.len() > HMAC_BLOCK_LEN {
        let digest = Sha256::digest(key);
        key_block[..digest.len()].copy_from_slice(&digest);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha256::new();
    for byte in key_block.iter() {
        inner.update([byte ^ 0x36]);
    }
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    for byte in key_block.iter() {
        outer.update([byte ^ 0x5c]);
    }
    outer.update(inner_hash);
    outer.finalize().into()
}

/// Percent-encode with the AWS unreserved set (A-Z a-z 0-9 - . _ ~).
/// Spaces become %20; slashes survive only when `encode_slash` is false,
/// as in canonical URI paths.
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

pub fn format_amz_date(t: DateTime<Utc>) -> String {
    t.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn format_date_stamp(t: DateTime<Utc>) -> String {
    t.format("%Y%m%d").to_string()
}

/// Everything the signature covers. `headers` must hold lowercase names
/// with trimmed values, sorted by name; `canonical_query` must already be
/// encoded and sorted.
pub struct SigningRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub canonical_query: &'a str,
    pub headers: &'a [(String, String)],
    pub payload_hash: &'a str,
    pub amz_date: &'a str,
    pub date_stamp: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

/// Produce the Authorization header value for a request.
pub fn authorization_header(req: &SigningRequest) -> String {
    let canonical_headers: String = req
        .headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    let signed_headers = req
        .headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method,
        req.path,
        req.canonical_query,
        canonical_headers,
        signed_headers,
        req.payload_hash
    );

    let scope = format!(
        "{}/{}/{}/aws4_request",
        req.date_stamp, req.region, req.service
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        req.amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let signature = hex::encode(hmac_sha256(
        &derive_signing_key(req.secret_key, req.date_stamp, req.region, req.service),
        string_to_sign.as_bytes(),
    ));

    format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, req.access_key, scope, signed_headers, signature
    )
}

fn derive_signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> [u8; 32] {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}
