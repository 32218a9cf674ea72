//! HMAC-SHA256 signature checks for gateway callbacks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

fn hmac_hex(secret: &str, message: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Signature Razorpay returns to the checkout page: `hex(HMAC(secret, "order|payment"))`
pub fn razorpay_signature(secret: &str, razor_order_id: &str, payment_id: &str) -> String {
    hmac_hex(secret, format!("{}|{}", razor_order_id, payment_id).as_bytes())
        .unwrap_or_default()
}

pub fn verify_razorpay(
    secret: &str,
    razor_order_id: &str,
    payment_id: &str,
    signature: &str,
) -> Result<(), SignatureError> {
    let expected = hmac_hex(secret, format!("{}|{}", razor_order_id, payment_id).as_bytes())?;
    if constant_time_eq(&expected, signature.trim()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Value for a `Stripe-Signature` header over `payload` at `timestamp`
pub fn stripe_signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    format!(
        "t={},v1={}",
        timestamp,
        hmac_hex(secret, &signed).unwrap_or_default()
    )
}

/// Verifies a `Stripe-Signature: t=...,v1=...` header.
///
/// Any of several `v1` entries may match, which is how the provider signs
/// during secret rotation.
pub fn verify_stripe(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: i64,
    tolerance_secs: u64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse().map_err(|_| SignatureError::Malformed)?);
            }
            Some(("v1", value)) if !value.is_empty() => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now - timestamp).unsigned_abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    let expected = hmac_hex(secret, &signed)?;

    if candidates.iter().any(|c| constant_time_eq(&expected, c)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
