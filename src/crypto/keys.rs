//! Key hierarchy for fieldcrypt
//!
//! Implements a two-path wrapping scheme:
//! - Data Key: random AES-256 key, one per principal, never stored in the clear
//! - Password KEK: PBKDF2 over the principal's password hash, salted with the master secret
//! - Session KEK: single-iteration PBKDF2 over a session token, salted with a
//!   fixed label plus the master secret
//!
//! Both KEKs wrap the same Data Key into independent `wk:1:` records, so a
//! password change only needs the password-path record recomputed.

use crate::config::KeyWrapConfig;
use crate::crypto::codec::b64_encode;
use crate::crypto::encryption::{open, parse_nonce_and_payload, seal, EnvelopeKey};
use crate::crypto::{random, MasterKey, DEFAULT_PBKDF2_ITERATIONS, KEY_SIZE, NONCE_SIZE};
use crate::error::{Error, Result};
use ring::aead::{LessSafeKey, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Domain separation label for session-token KEKs
const SESSION_KEK_LABEL: &[u8] = b"fieldcrypt-session-kek-v1:";

fn import_aes_key(bytes: &[u8]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, bytes).map_err(|_| Error::InvalidKeyLength {
        expected: KEY_SIZE,
        got: bytes.len(),
    })?;
    Ok(LessSafeKey::new(unbound))
}

/// Per-principal symmetric data key
pub struct DataKey {
    bytes: Zeroizing<[u8; KEY_SIZE]>,
    aead: LessSafeKey,
}

impl DataKey {
    /// Generate a fresh random data key
    pub fn generate() -> Result<Self> {
        let bytes = Zeroizing::new(random::random_array::<KEY_SIZE>()?);
        Self::from_bytes(&bytes[..])
    }

    /// Import raw key bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: KEY_SIZE,
                got: bytes.len(),
            });
        }
        let mut owned = Zeroizing::new([0u8; KEY_SIZE]);
        owned.copy_from_slice(bytes);

        Ok(DataKey {
            aead: import_aes_key(&owned[..])?,
            bytes: owned,
        })
    }

    pub(crate) fn bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl EnvelopeKey for DataKey {
    fn aead_key(&self) -> &LessSafeKey {
        &self.aead
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

/// Key-encrypting key: only ever used to wrap and unwrap data keys
pub struct Kek {
    aead: LessSafeKey,
}

impl Kek {
    fn derive(iterations: NonZeroU32, salt: &[u8], secret: &[u8]) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::KeyDerivation(
                "KEK key material must not be empty".to_string(),
            ));
        }
        let mut out = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            secret,
            &mut out[..],
        );
        Ok(Kek {
            aead: import_aes_key(&out[..])?,
        })
    }
}

impl EnvelopeKey for Kek {
    fn aead_key(&self) -> &LessSafeKey {
        &self.aead
    }
}

impl fmt::Debug for Kek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Kek([REDACTED])")
    }
}

/// Parsed form of a stored wrapped key record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrappedKey {
    /// `wk:1:` - AES-GCM over the raw data key bytes
    V1 {
        nonce: [u8; NONCE_SIZE],
        wrapped: Vec<u8>,
    },
}

impl WrappedKey {
    pub const PREFIX: &'static str = "wk:";
    const KIND: &'static str = "wrapped key";

    pub fn parse(value: &str) -> Result<Self> {
        let body = value
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| Error::format(Self::KIND, "missing wk: prefix"))?;

        let (version, rest) = body
            .split_once(':')
            .ok_or_else(|| Error::format(Self::KIND, "missing version separator"))?;

        match version {
            "1" => {
                let (nonce, wrapped) = parse_nonce_and_payload(Self::KIND, rest)?;
                Ok(WrappedKey::V1 { nonce, wrapped })
            }
            other => Err(Error::format(
                Self::KIND,
                format!("unsupported version {:?}", other),
            )),
        }
    }
}

impl fmt::Display for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WrappedKey::V1 { nonce, wrapped } => write!(
                f,
                "{}1:{}:{}",
                Self::PREFIX,
                b64_encode(nonce),
                b64_encode(wrapped)
            ),
        }
    }
}

impl FromStr for WrappedKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        WrappedKey::parse(s)
    }
}

/// Wraps and unwraps data keys along the password and session paths
#[derive(Debug, Clone, Copy)]
pub struct KeyWrapper {
    iterations: NonZeroU32,
}

impl KeyWrapper {
    /// Wrapper whose password KEKs use `iterations` rounds of PBKDF2
    pub fn new(iterations: NonZeroU32) -> Self {
        KeyWrapper { iterations }
    }

    /// Build from the pinned key wrapping configuration
    pub fn from_config(config: &KeyWrapConfig) -> Result<Self> {
        let iterations = NonZeroU32::new(config.kek_iterations).ok_or_else(|| {
            Error::InvalidConfig("KEK iterations must be greater than 0".to_string())
        })?;
        if iterations.get() < DEFAULT_PBKDF2_ITERATIONS && !config.allow_weak_iterations {
            return Err(Error::InvalidConfig(format!(
                "KEK iterations must be at least {} (got {})",
                DEFAULT_PBKDF2_ITERATIONS, iterations
            )));
        }
        Ok(KeyWrapper { iterations })
    }

    pub fn iterations(&self) -> NonZeroU32 {
        self.iterations
    }

    /// Password-path KEK; deterministic for a given (password hash, master secret)
    pub fn derive_kek(&self, password_hash: &str, master: &MasterKey) -> Result<Kek> {
        Kek::derive(self.iterations, master.secret(), password_hash.as_bytes())
    }

    /// Session-path KEK. A single round is enough because tokens carry 256 bits of entropy.
    pub fn derive_session_kek(&self, session_token: &str, master: &MasterKey) -> Result<Kek> {
        let mut salt = Zeroizing::new(Vec::with_capacity(SESSION_KEK_LABEL.len() + KEY_SIZE));
        salt.extend_from_slice(SESSION_KEK_LABEL);
        salt.extend_from_slice(master.secret());

        Kek::derive(NonZeroU32::MIN, &salt, session_token.as_bytes())
    }

    /// Wrap a data key under any wrapping key
    pub fn wrap<K: EnvelopeKey + ?Sized>(&self, data_key: &DataKey, wrapping_key: &K) -> Result<String> {
        let (nonce, wrapped) = seal(wrapping_key.aead_key(), data_key.bytes())?;
        Ok(WrappedKey::V1 { nonce, wrapped }.to_string())
    }

    /// Recover a data key from a `wk:1:` record
    pub fn unwrap<K: EnvelopeKey + ?Sized>(&self, record: &str, wrapping_key: &K) -> Result<DataKey> {
        let raw = match WrappedKey::parse(record)? {
            WrappedKey::V1 { nonce, wrapped } => {
                Zeroizing::new(open(wrapping_key.aead_key(), nonce, wrapped)?)
            }
        };
        DataKey::from_bytes(&raw)
    }

    /// Wrap a data key for an active session
    pub fn wrap_with_token(
        &self,
        data_key: &DataKey,
        session_token: &str,
        master: &MasterKey,
    ) -> Result<String> {
        let kek = self.derive_session_kek(session_token, master)?;
        self.wrap(data_key, &kek)
    }

    /// Recover a data key using only an active session token
    pub fn unwrap_with_token(
        &self,
        record: &str,
        session_token: &str,
        master: &MasterKey,
    ) -> Result<DataKey> {
        let kek = self.derive_session_kek(session_token, master)?;
        self.unwrap(record, &kek)
    }
}

impl Default for KeyWrapper {
    fn default() -> Self {
        KeyWrapper {
            iterations: NonZeroU32::new(DEFAULT_PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{decrypt, encrypt};

    fn wrapper() -> KeyWrapper {
        KeyWrapper::new(NonZeroU32::new(1_000).unwrap())
    }

    fn master(fill: u8) -> MasterKey {
        MasterKey::from_bytes(&[fill; KEY_SIZE]).unwrap()
    }

    #[test]
    fn test_wrap_unwrap_password_path() {
        let wrapper = wrapper();
        let master = master(1);
        let data_key = DataKey::generate().unwrap();
        let envelope = encrypt("private material", &data_key).unwrap();

        let kek = wrapper.derive_kek("pbkdf2:1000:salt:hash", &master).unwrap();
        let record = wrapper.wrap(&data_key, &kek).unwrap();
        assert!(record.starts_with("wk:1:"));

        // Unwrap with an independently re-derived KEK
        let kek_again = wrapper.derive_kek("pbkdf2:1000:salt:hash", &master).unwrap();
        let recovered = wrapper.unwrap(&record, &kek_again).unwrap();
        assert_eq!(decrypt(&envelope, &recovered).unwrap(), "private material");
    }

    #[test]
    fn test_dual_path_equivalence() {
        let wrapper = wrapper();
        let master = master(1);
        let data_key = DataKey::generate().unwrap();

        let kek = wrapper.derive_kek("hash", &master).unwrap();
        let password_record = wrapper.wrap(&data_key, &kek).unwrap();
        let session_record = wrapper.wrap_with_token(&data_key, "token-abc", &master).unwrap();
        assert_ne!(password_record, session_record);

        let via_password = wrapper.unwrap(&password_record, &kek).unwrap();
        let via_session = wrapper
            .unwrap_with_token(&session_record, "token-abc", &master)
            .unwrap();

        assert_eq!(via_password.bytes(), data_key.bytes());
        assert_eq!(via_session.bytes(), data_key.bytes());
    }

    #[test]
    fn test_cross_path_isolation() {
        let wrapper = wrapper();
        let master = master(1);
        let data_key = DataKey::generate().unwrap();

        let kek = wrapper.derive_kek("hash-one", &master).unwrap();
        let record = wrapper.wrap(&data_key, &kek).unwrap();
        let other = wrapper.derive_kek("hash-two", &master).unwrap();
        assert!(wrapper.unwrap(&record, &other).unwrap_err().is_authentication());

        let session_record = wrapper.wrap_with_token(&data_key, "token-a", &master).unwrap();
        assert!(wrapper
            .unwrap_with_token(&session_record, "token-b", &master)
            .unwrap_err()
            .is_authentication());

        // Same token string on the password path is a different key
        let as_password = wrapper.derive_kek("token-a", &master).unwrap();
        assert!(wrapper
            .unwrap(&session_record, &as_password)
            .unwrap_err()
            .is_authentication());
    }

    #[test]
    fn test_kek_requires_master_secret() {
        let wrapper = wrapper();
        let data_key = DataKey::generate().unwrap();

        let record = wrapper.wrap_with_token(&data_key, "token", &master(1)).unwrap();
        assert!(wrapper
            .unwrap_with_token(&record, "token", &master(2))
            .unwrap_err()
            .is_authentication());

        let kek = wrapper.derive_kek("hash", &master(1)).unwrap();
        let record = wrapper.wrap(&data_key, &kek).unwrap();
        let other_master = wrapper.derive_kek("hash", &master(2)).unwrap();
        assert!(wrapper.unwrap(&record, &other_master).is_err());
    }

    #[test]
    fn test_malformed_records_are_format_errors() {
        let wrapper = wrapper();
        let kek = wrapper.derive_kek("hash", &master(1)).unwrap();
        for bad in ["invalid", "wk:1:nocolon", "wk:9:AAAA:AAAA", "enc:1:AAAA:AAAA"] {
            assert!(wrapper.unwrap(bad, &kek).unwrap_err().is_format(), "{:?}", bad);
        }
    }

    #[test]
    fn test_empty_key_material_rejected() {
        let wrapper = wrapper();
        assert!(matches!(
            wrapper.derive_kek("", &master(1)),
            Err(Error::KeyDerivation(_))
        ));
        assert!(wrapper.derive_session_kek("", &master(1)).is_err());
    }

    #[test]
    fn test_data_key_length_checked() {
        assert!(matches!(
            DataKey::from_bytes(&[0u8; 16]),
            Err(Error::InvalidKeyLength { expected: 32, got: 16 })
        ));
    }

    #[test]
    fn test_wrapped_record_display_parse() {
        let wrapper = wrapper();
        let kek = wrapper.derive_kek("hash", &master(1)).unwrap();
        let record = wrapper.wrap(&DataKey::generate().unwrap(), &kek).unwrap();
        let parsed: WrappedKey = record.parse().unwrap();
        assert_eq!(parsed.to_string(), record);
    }

    #[test]
    fn test_from_config_pins_kek_iterations() {
        let config = KeyWrapConfig::default();
        assert_eq!(
            KeyWrapper::from_config(&config).unwrap().iterations().get(),
            DEFAULT_PBKDF2_ITERATIONS
        );

        let weak = KeyWrapConfig {
            kek_iterations: 1_000,
            allow_weak_iterations: false,
        };
        assert!(KeyWrapper::from_config(&weak).is_err());

        let weak = KeyWrapConfig {
            allow_weak_iterations: true,
            ..weak
        };
        assert_eq!(KeyWrapper::from_config(&weak).unwrap().iterations().get(), 1_000);

        let zero = KeyWrapConfig {
            kek_iterations: 0,
            allow_weak_iterations: true,
        };
        assert!(KeyWrapper::from_config(&zero).is_err());
    }
}
