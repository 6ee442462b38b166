//! Text encodings shared by every envelope format

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;

use crate::error::{Error, Result};

/// Encode bytes as standard (padded) base64
pub fn b64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64, reporting failures against `kind`
pub fn b64_decode(kind: &'static str, input: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(input)
        .map_err(|e| Error::format(kind, format!("invalid base64: {}", e)))
}

/// Encode bytes as base64url without padding
pub fn b64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode unpadded base64url
pub fn b64url_decode(kind: &'static str, input: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(input)
        .map_err(|e| Error::format(kind, format!("invalid base64url: {}", e)))
}

/// Compare two byte buffers without short-circuiting on the first difference.
///
/// Buffers of different length compare unequal immediately; length is not
/// treated as secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    std::hint::black_box(diff) == 0
}
