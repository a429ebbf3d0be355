//! Request signing.
//!
//! Every request carries the client id, a millisecond timestamp and an
//! HMAC-SHA256 over `"<METHOD> <path?query> <hex(sha256(body))> <client id> <timestamp>"`
//! keyed with the client secret.

use crate::error::MercuryError;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use sha2::{Digest, Sha256};

pub const TIMESTAMP_HEADER: &str = "X-Authorization-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Authorization-Signature-SHA256";

pub fn sign(
    method: &str,
    path_and_query: &str,
    body: &[u8],
    client_id: &str,
    secret: &str,
    timestamp_ms: u128,
) -> Result<String, MercuryError> {
    let body_hash = hex::encode(Sha256::digest(body));
    let payload = format!("{method} {path_and_query} {body_hash} {client_id} {timestamp_ms}");

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|e| MercuryError::Auth(e.to_string()))?;
    Mac::update(&mut mac, payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Headers authenticating a `GET` of `path_and_query`.
pub fn auth_headers(
    path_and_query: &str,
    client_id: &str,
    secret: &str,
    timestamp_ms: u128,
) -> Result<HeaderMap, MercuryError> {
    let signature = sign("GET", path_and_query, &[], client_id, secret, timestamp_ms)?;
    let value = |s: &str| HeaderValue::from_str(s).map_err(|e| MercuryError::Auth(e.to_string()));

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(AUTHORIZATION, value(client_id)?);
    headers.insert(TIMESTAMP_HEADER, value(&timestamp_ms.to_string())?);
    headers.insert(SIGNATURE_HEADER, value(&signature)?);
    Ok(headers)
}
