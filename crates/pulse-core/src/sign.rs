//! HMAC-SHA256 payload signing.
//!
//! The signature is computed over the exact (uncompressed) body bytes and
//! transported hex-encoded in the [`SIGNATURE_HEADER`] header.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Header carrying the hex-encoded HMAC of the body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies payloads with a shared secret.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Signer { key: <redacted> }")
    }
}

impl Signer {
    /// Build a signer. Returns `None` for an empty key, which callers
    /// treat as "signing disabled".
    pub fn new(key: &str) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        // HMAC accepts keys of any length.
        let mac = HmacSha256::new_from_slice(key.as_bytes()).ok()?;
        Some(Self { mac })
    }

    /// Build a signer from an optional configured key.
    pub fn from_key(key: Option<&str>) -> Option<Self> {
        key.and_then(Self::new)
    }

    /// Hex-encoded HMAC-SHA256 of `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature against `body`.
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}
