//! Master key management
//!
//! The master secret is a base64-encoded 256-bit value supplied by external
//! configuration. It is imported once into AES-GCM and HMAC key objects and
//! cached against the exact string it came from, so a changed secret
//! invalidates the cache on the next lookup.

use crate::crypto::codec::{b64_encode, constant_time_eq};
use crate::crypto::encryption::EnvelopeKey;
use crate::crypto::{random, KEY_SIZE};
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::RwLock;
use ring::aead::{LessSafeKey, UnboundKey, AES_256_GCM};
use ring::hmac;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Where the raw master secret string comes from
pub trait SecretSource: Send + Sync {
    /// Current raw value, or `None` if unset
    fn read(&self) -> Option<String>;
}

/// Reads the master secret from an environment variable on every lookup
#[derive(Debug, Clone)]
pub struct EnvSecretSource {
    var: String,
}

impl EnvSecretSource {
    pub fn new(var: impl Into<String>) -> Self {
        EnvSecretSource { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl SecretSource for EnvSecretSource {
    fn read(&self) -> Option<String> {
        std::env::var(&self.var).ok()
    }
}

/// In-process master secret that can be replaced or cleared at runtime
#[derive(Default)]
pub struct StaticSecretSource {
    value: RwLock<Option<Zeroizing<String>>>,
}

impl StaticSecretSource {
    pub fn new(value: impl Into<String>) -> Self {
        StaticSecretSource {
            value: RwLock::new(Some(Zeroizing::new(value.into()))),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, value: impl Into<String>) {
        *self.value.write() = Some(Zeroizing::new(value.into()));
    }

    pub fn clear(&self) {
        *self.value.write() = None;
    }
}

impl SecretSource for StaticSecretSource {
    fn read(&self) -> Option<String> {
        self.value.read().as_ref().map(|v| v.as_str().to_string())
    }
}

/// Imported master key, usable for AES-GCM envelopes and HMAC blind indexes
pub struct MasterKey {
    secret: Zeroizing<[u8; KEY_SIZE]>,
    aead: LessSafeKey,
    hmac: hmac::Key,
}

impl MasterKey {
    /// Decode and import a base64 master secret
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|_| {
            Error::Configuration("Master secret is not valid base64".to_string())
        })?);
        Self::from_bytes(&bytes)
    }

    /// Import raw master secret bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::Configuration(format!(
                "Master secret must decode to {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut secret = Zeroizing::new([0u8; KEY_SIZE]);
        secret.copy_from_slice(bytes);

        let unbound = UnboundKey::new(&AES_256_GCM, &secret[..])
            .map_err(|_| Error::Configuration("Failed to import master key".to_string()))?;

        Ok(MasterKey {
            aead: LessSafeKey::new(unbound),
            hmac: hmac::Key::new(hmac::HMAC_SHA256, &secret[..]),
            secret,
        })
    }

    /// Raw secret bytes, used as salt material by the key wrapper
    pub(crate) fn secret(&self) -> &[u8; KEY_SIZE] {
        &self.secret
    }

    pub(crate) fn hmac_key(&self) -> &hmac::Key {
        &self.hmac
    }
}

impl EnvelopeKey for MasterKey {
    fn aead_key(&self) -> &LessSafeKey {
        &self.aead
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

struct CachedKey {
    source_value: Zeroizing<String>,
    key: Arc<MasterKey>,
}

/// Owns the single-slot master key cache for one service instance
pub struct MasterKeyManager {
    source: Arc<dyn SecretSource>,
    cache: RwLock<Option<CachedKey>>,
}

impl MasterKeyManager {
    pub fn new(source: Arc<dyn SecretSource>) -> Self {
        MasterKeyManager {
            source,
            cache: RwLock::new(None),
        }
    }

    /// Manager reading the secret from an environment variable
    pub fn from_env(var: impl Into<String>) -> Self {
        Self::new(Arc::new(EnvSecretSource::new(var)))
    }

    /// Return the imported master key, re-importing if the secret changed
    pub fn master_key(&self) -> Result<Arc<MasterKey>> {
        let raw = match self.source.read() {
            Some(v) if !v.trim().is_empty() => Zeroizing::new(v),
            _ => {
                self.clear_cache();
                return Err(Error::Configuration("Master secret is not set".to_string()));
            }
        };

        if let Some(cached) = self.cache.read().as_ref() {
            if constant_time_eq(cached.source_value.as_bytes(), raw.as_bytes()) {
                return Ok(Arc::clone(&cached.key));
            }
        }

        let key = match MasterKey::from_base64(&raw) {
            Ok(key) => Arc::new(key),
            Err(e) => {
                self.clear_cache();
                return Err(e);
            }
        };

        // Last writer wins; importing is a pure function of the secret
        *self.cache.write() = Some(CachedKey {
            source_value: raw,
            key: Arc::clone(&key),
        });
        debug!("Master key imported");

        Ok(key)
    }

    /// Fail-fast check for startup
    pub fn validate(&self) -> Result<()> {
        self.master_key().map(|_| ())
    }

    /// Drop the cached key so the next lookup re-imports
    pub fn clear_cache(&self) {
        if self.cache.write().take().is_some() {
            info!("Master key cache cleared");
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cache.read().is_some()
    }
}

/// Fresh random master secret, base64-encoded
pub fn generate_master_secret() -> Result<String> {
    let bytes = Zeroizing::new(random::random_array::<KEY_SIZE>()?);
    Ok(b64_encode(&bytes[..]))
}
