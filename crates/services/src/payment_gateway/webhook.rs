//! `Stripe-Signature` header verification.
//!
//! The header looks like `t=1700000000,v1=<hex>,v1=<hex>`; each `v1` is an
//! HMAC-SHA256 of `"{t}.{payload}"` under the endpoint secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::GatewayClientError;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

struct SignatureHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Result<SignatureHeader<'_>, GatewayClientError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = value.parse::<i64>().ok();
            }
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(SignatureHeader {
            timestamp,
            signatures,
        }),
        _ => Err(GatewayClientError::InvalidSignature),
    }
}

fn mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, GatewayClientError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| GatewayClientError::InvalidSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Check the header against `payload` at time `now` (unix seconds).
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), GatewayClientError> {
    let header = parse_header(header)?;

    if (now - header.timestamp).abs() > tolerance_seconds {
        return Err(GatewayClientError::InvalidSignature);
    }

    let matches = header.signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        mac(secret, header.timestamp, payload)
            .map(|mac| mac.verify_slice(&expected).is_ok())
            .unwrap_or(false)
    });

    if matches {
        Ok(())
    } else {
        Err(GatewayClientError::InvalidSignature)
    }
}

/// Build a header value for `payload`, as the gateway would send it.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let signature = mac(secret, timestamp, payload)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default();
    format!("t={timestamp},v1={signature}")
}
