//! Secure randomness for nonces, salts and opaque tokens

use crate::crypto::codec::b64url_encode;
use crate::crypto::{NONCE_SIZE, SALT_SIZE, TOKEN_SIZE};
use crate::error::{Error, Result};
use ring::rand::{SecureRandom, SystemRandom};

/// Fill `buf` from the operating system CSPRNG
pub fn fill(buf: &mut [u8]) -> Result<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| Error::Internal("System random source unavailable".to_string()))
}

/// Fresh fixed-size random array
pub fn random_array<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    fill(&mut out)?;
    Ok(out)
}

/// A 96-bit AES-GCM nonce
pub fn nonce() -> Result<[u8; NONCE_SIZE]> {
    random_array()
}

/// A 128-bit password salt
pub fn salt() -> Result<[u8; SALT_SIZE]> {
    random_array()
}

/// Opaque session / invite token: 256 bits, base64url, no padding
pub fn secure_token() -> Result<String> {
    let bytes = zeroize::Zeroizing::new(random_array::<TOKEN_SIZE>()?);
    Ok(b64url_encode(&bytes[..]))
}
