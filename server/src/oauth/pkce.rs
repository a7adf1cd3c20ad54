//! PKCE (RFC 7636) with the S256 method only.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

/// The only accepted `code_challenge_method`.
pub const S256: &str = "S256";

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Whether `verifier` hashes to the stored `challenge`.
pub fn verify(verifier: &str, challenge: &str) -> bool {
    challenge_for(verifier).as_bytes() == challenge.as_bytes()
}
