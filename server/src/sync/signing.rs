//! HMAC-SHA256 Request Signing
//!
//! Sibling systems sign the raw request body with the shared sync key and
//! send the hex digest in `X-Auth-Signature`. Outbound page-permission
//! calls are signed the same way.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex signature.
pub const SIGNATURE_HEADER: &str = "X-Auth-Signature";

/// Sign a payload and return the hex-encoded signature.
///
/// `None` only if the key is rejected by the MAC.
pub fn sign_payload(key: &[u8], payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex signature against a payload in constant time.
pub fn verify_signature(key: &[u8], payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
