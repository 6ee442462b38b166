//! AES-256-GCM field envelopes
//!
//! Every encrypted field value is stored as `enc:1:<base64 nonce>:<base64 ciphertext||tag>`.
//! AES-256-GCM provides:
//! - Confidentiality: Data is encrypted
//! - Integrity: Any tampering is detected
//! - Authentication: Verifies the data came from the key holder

use crate::crypto::codec::{b64_decode, b64_encode};
use crate::crypto::{random, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use ring::aead::{Aad, LessSafeKey, Nonce};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Any key that can seal and open AES-256-GCM envelopes
pub trait EnvelopeKey {
    fn aead_key(&self) -> &LessSafeKey;
}

impl<K: EnvelopeKey + ?Sized> EnvelopeKey for Arc<K> {
    fn aead_key(&self) -> &LessSafeKey {
        (**self).aead_key()
    }
}

/// Parsed form of a stored field envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// `enc:1:` - random 96-bit nonce, ciphertext with appended GCM tag
    V1 {
        nonce: [u8; NONCE_SIZE],
        ciphertext: Vec<u8>,
    },
}

impl Envelope {
    pub const PREFIX: &'static str = "enc:";
    const KIND: &'static str = "envelope";

    /// Whether `value` carries the envelope prefix at all
    pub fn is_envelope(value: &str) -> bool {
        value.starts_with(Self::PREFIX)
    }

    /// Parse the wire form, rejecting anything malformed
    pub fn parse(value: &str) -> Result<Self> {
        let body = value
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| Error::format(Self::KIND, "missing enc: prefix"))?;

        let (version, rest) = body
            .split_once(':')
            .ok_or_else(|| Error::format(Self::KIND, "missing version separator"))?;

        match version {
            "1" => {
                let (nonce, ciphertext) = parse_nonce_and_payload(Self::KIND, rest)?;
                Ok(Envelope::V1 { nonce, ciphertext })
            }
            other => Err(Error::format(
                Self::KIND,
                format!("unsupported version {:?}", other),
            )),
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::V1 { nonce, ciphertext } => write!(
                f,
                "{}1:{}:{}",
                Self::PREFIX,
                b64_encode(nonce),
                b64_encode(ciphertext)
            ),
        }
    }
}

impl FromStr for Envelope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Envelope::parse(s)
    }
}

/// Encrypt a string into a versioned envelope under `key`
pub fn encrypt<K: EnvelopeKey + ?Sized>(plaintext: &str, key: &K) -> Result<String> {
    let (nonce, ciphertext) = seal(key.aead_key(), plaintext.as_bytes())?;
    Ok(Envelope::V1 { nonce, ciphertext }.to_string())
}

/// Decrypt an envelope produced by [`encrypt`].
///
/// Fails with a format error for anything that is not a well-formed envelope
/// and with an authentication error if the tag does not verify.
pub fn decrypt<K: EnvelopeKey + ?Sized>(envelope: &str, key: &K) -> Result<String> {
    let plaintext = match Envelope::parse(envelope)? {
        Envelope::V1 { nonce, ciphertext } => open(key.aead_key(), nonce, ciphertext)?,
    };

    String::from_utf8(plaintext)
        .map_err(|_| Error::format(Envelope::KIND, "plaintext is not valid UTF-8"))
}

/// Migration passthrough: values without the envelope prefix are returned
/// unchanged, everything else goes through the strict [`decrypt`].
pub fn decrypt_if_envelope<K: EnvelopeKey + ?Sized>(value: &str, key: &K) -> Result<String> {
    if Envelope::is_envelope(value) {
        decrypt(value, key)
    } else {
        Ok(value.to_string())
    }
}

/// Split `<b64 nonce>:<b64 payload>` and validate sizes
pub(crate) fn parse_nonce_and_payload(
    kind: &'static str,
    rest: &str,
) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
    let (nonce_b64, payload_b64) = rest
        .split_once(':')
        .ok_or_else(|| Error::format(kind, "missing nonce/ciphertext separator"))?;

    let nonce_bytes = b64_decode(kind, nonce_b64)?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(Error::format(
            kind,
            format!("invalid nonce length: {}", nonce_bytes.len()),
        ));
    }
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&nonce_bytes);

    let payload = b64_decode(kind, payload_b64)?;
    if payload.len() < TAG_SIZE {
        return Err(Error::format(kind, "ciphertext too short"));
    }

    Ok((nonce, payload))
}

/// AES-256-GCM encrypt with a fresh random nonce
pub(crate) fn seal(key: &LessSafeKey, plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
    let nonce_bytes = random::nonce()?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    // Prepare buffer: plaintext + space for tag
    let mut in_out = Vec::with_capacity(plaintext.len() + TAG_SIZE);
    in_out.extend_from_slice(plaintext);

    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| Error::Encryption("Encryption failed".to_string()))?;

    Ok((nonce_bytes, in_out))
}

/// AES-256-GCM decrypt; any tag failure is an authentication error
pub(crate) fn open(
    key: &LessSafeKey,
    nonce: [u8; NONCE_SIZE],
    mut ciphertext: Vec<u8>,
) -> Result<Vec<u8>> {
    let nonce = Nonce::assume_unique_for_key(nonce);
    let len = key
        .open_in_place(nonce, Aad::empty(), &mut ciphertext)
        .map_err(|_| Error::Authentication)?
        .len();
    ciphertext.truncate(len);
    Ok(ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DataKey, MasterKey, KEY_SIZE};

    fn test_key() -> MasterKey {
        MasterKey::from_bytes(&random::random_array::<KEY_SIZE>().unwrap()).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = test_key();
        let envelope = encrypt("Hello, fieldcrypt!", &key).unwrap();

        assert!(envelope.starts_with("enc:1:"));
        assert_eq!(decrypt(&envelope, &key).unwrap(), "Hello, fieldcrypt!");
    }

    #[test]
    fn test_empty_plaintext() {
        let key = test_key();
        let envelope = encrypt("", &key).unwrap();
        assert_eq!(decrypt(&envelope, &key).unwrap(), "");
    }

    #[test]
    fn test_large_and_unicode_plaintext() {
        let key = test_key();
        let long = "x".repeat(10_000);
        assert_eq!(decrypt(&encrypt(&long, &key).unwrap(), &key).unwrap(), long);

        let unicode = "пароль 密码 🔐 contraseña";
        assert_eq!(
            decrypt(&encrypt(unicode, &key).unwrap(), &key).unwrap(),
            unicode
        );
    }

    #[test]
    fn test_encryption_is_nondeterministic() {
        let key = test_key();
        let a = encrypt("same value", &key).unwrap();
        let b = encrypt("same value", &key).unwrap();

        assert_ne!(a, b);
        assert_eq!(decrypt(&a, &key).unwrap(), "same value");
        assert_eq!(decrypt(&b, &key).unwrap(), "same value");
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = encrypt("Secret data", &test_key()).unwrap();
        let err = decrypt(&envelope, &test_key()).unwrap_err();
        assert!(err.is_authentication());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key();
        let envelope = encrypt("Secret data", &key).unwrap();

        let Envelope::V1 { nonce, ciphertext } = Envelope::parse(&envelope).unwrap();
        for i in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            tampered[i] ^= 0x01;
            let forged = Envelope::V1 {
                nonce,
                ciphertext: tampered,
            }
            .to_string();
            assert!(decrypt(&forged, &key).unwrap_err().is_authentication());
        }
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let key = test_key();
        let envelope = encrypt("Secret data", &key).unwrap();

        let Envelope::V1 {
            mut nonce,
            ciphertext,
        } = Envelope::parse(&envelope).unwrap();
        nonce[0] ^= 0xFF;
        let forged = Envelope::V1 { nonce, ciphertext }.to_string();
        assert!(decrypt(&forged, &key).unwrap_err().is_authentication());
    }

    #[test]
    fn test_malformed_envelopes_are_format_errors() {
        let key = test_key();
        for bad in [
            "not encrypted",
            "enc:1:nocolon",
            "enc:",
            "enc:1",
            "enc:2:AAAA:BBBB",
            "enc:1:!!!:AAAA",
            "enc:1:AAAA:AAAA",
        ] {
            let err = decrypt(bad, &key).unwrap_err();
            assert!(err.is_format(), "{:?} should be a format error", bad);
        }
    }

    #[test]
    fn test_decrypt_if_envelope_passthrough() {
        let key = test_key();
        assert_eq!(
            decrypt_if_envelope("legacy plaintext", &key).unwrap(),
            "legacy plaintext"
        );

        let envelope = encrypt("secret", &key).unwrap();
        assert_eq!(decrypt_if_envelope(&envelope, &key).unwrap(), "secret");

        // Prefixed but malformed is still rejected
        assert!(decrypt_if_envelope("enc:1:nocolon", &key)
            .unwrap_err()
            .is_format());
    }

    #[test]
    fn test_envelope_display_parse() {
        let key = DataKey::generate().unwrap();
        let envelope = encrypt("value", &key).unwrap();
        let parsed: Envelope = envelope.parse().unwrap();
        assert_eq!(parsed.to_string(), envelope);
    }
}
