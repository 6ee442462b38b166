//! Deterministic blind indexes for equality lookups on encrypted columns

use crate::crypto::codec::b64_encode;
use crate::crypto::MasterKey;
use ring::hmac;

/// base64(HMAC-SHA256(master key, value))
///
/// Same value and same master secret always give the same index.
pub fn blind_index(value: &str, master: &MasterKey) -> String {
    let tag = hmac::sign(master.hmac_key(), value.as_bytes());
    b64_encode(tag.as_ref())
}
