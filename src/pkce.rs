//! PKCE verifier and challenge generation
//!
//! Pure functions binding an authorization code to a client-held secret so
//! an intercepted code cannot be replayed. The verifier is sourced from 32
//! bytes of OS randomness; an unavailable randomness source is a fatal
//! environment error, not a recoverable condition.

use rand::Rng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Bytes of randomness backing a generated verifier
const VERIFIER_ENTROPY_BYTES: usize = 32;

/// Generate a URL-safe random PKCE code verifier.
///
/// 32 bytes of randomness base64url-encode to 43 characters, inside the
/// 43-128 range RFC 7636 allows.
pub fn generate_verifier() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; VERIFIER_ENTROPY_BYTES]);
    rand::thread_rng().fill(&mut bytes[..]);
    Zeroizing::new(base64_url::encode(&bytes[..]))
}

/// Derive the S256 challenge for a verifier: base64url(sha256(verifier)).
pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64_url::encode(&digest)
}

/// Hex-encoded SHA-256 of a verifier, safe to keep in audit records.
pub fn verifier_hash(verifier: &str) -> String {
    hex::encode(Sha256::digest(verifier.as_bytes()))
}
