//! Field-protection service
//!
//! A [`Vault`] is the long-lived object the database layer talks to. It owns
//! the master key cache and the configured work factors; every operation is
//! otherwise stateless. Clones share the same cache.

use crate::config::Config;
use crate::crypto::{
    self, blind_index, random, DataKey, EnvSecretSource, EnvelopeKey, Kek, KeyPair, KeyWrapper,
    MasterKey, MasterKeyManager, PasswordHasher, PrivateKey, SecretSource, StaticSecretSource,
};
use crate::error::Result;
use std::sync::Arc;
use tokio::task;
use tracing::info;
use zeroize::Zeroizing;

struct VaultInner {
    keys: MasterKeyManager,
    hasher: PasswordHasher,
    wrapper: KeyWrapper,
    rsa_bits: usize,
}

/// Envelope encryption and key hierarchy bound to one master secret source
#[derive(Clone)]
pub struct Vault {
    inner: Arc<VaultInner>,
}

impl Vault {
    /// Build from configuration and check the master secret immediately
    pub fn new(config: &Config) -> Result<Self> {
        let source: Arc<dyn SecretSource> = match &config.master_secret.value {
            Some(value) => Arc::new(StaticSecretSource::new(value.clone())),
            None => Arc::new(EnvSecretSource::new(config.master_secret.env_var.clone())),
        };
        let vault = Self::with_source(config, source)?;
        vault.inner.keys.validate()?;

        info!(
            "Vault ready (pbkdf2 iterations: {}, kek iterations: {}, rsa bits: {})",
            vault.inner.hasher.iterations(),
            vault.inner.wrapper.iterations(),
            vault.inner.rsa_bits
        );
        Ok(vault)
    }

    /// Build with an explicit secret source; the secret is checked lazily
    pub fn with_source(config: &Config, source: Arc<dyn SecretSource>) -> Result<Self> {
        config.validate()?;
        Ok(Vault {
            inner: Arc::new(VaultInner {
                keys: MasterKeyManager::new(source),
                hasher: PasswordHasher::from_config(&config.password)?,
                wrapper: KeyWrapper::from_config(&config.key_wrap)?,
                rsa_bits: config.keypair.rsa_bits,
            }),
        })
    }

    /// Current master key (cached until the secret changes)
    pub fn master_key(&self) -> Result<Arc<MasterKey>> {
        self.inner.keys.master_key()
    }

    /// Force the next operation to re-import the master secret
    pub fn clear_master_key_cache(&self) {
        self.inner.keys.clear_cache();
    }

    pub fn password_hasher(&self) -> &PasswordHasher {
        &self.inner.hasher
    }

    pub fn key_wrapper(&self) -> &KeyWrapper {
        &self.inner.wrapper
    }

    // Field encryption under the master key

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        crypto::encrypt(plaintext, &*self.master_key()?)
    }

    pub fn decrypt(&self, envelope: &str) -> Result<String> {
        crypto::decrypt(envelope, &*self.master_key()?)
    }

    /// Lenient read path for columns that may still hold legacy plaintext
    pub fn decrypt_if_envelope(&self, value: &str) -> Result<String> {
        crypto::decrypt_if_envelope(value, &*self.master_key()?)
    }

    // Encryption under an arbitrary key (data keys, KEKs)

    pub fn encrypt_with_key<K: EnvelopeKey + ?Sized>(&self, plaintext: &str, key: &K) -> Result<String> {
        crypto::encrypt(plaintext, key)
    }

    pub fn decrypt_with_key<K: EnvelopeKey + ?Sized>(&self, envelope: &str, key: &K) -> Result<String> {
        crypto::decrypt(envelope, key)
    }

    // Passwords and lookups

    pub fn hash_password(&self, password: &str) -> Result<String> {
        self.inner.hasher.hash(password)
    }

    pub fn verify_password(&self, password: &str, record: &str) -> bool {
        self.inner.hasher.verify(password, record)
    }

    pub fn blind_index(&self, value: &str) -> Result<String> {
        Ok(blind_index(value, &*self.master_key()?))
    }

    // Key hierarchy

    pub fn generate_data_key(&self) -> Result<DataKey> {
        DataKey::generate()
    }

    pub fn derive_kek(&self, password_hash: &str) -> Result<Kek> {
        self.inner.wrapper.derive_kek(password_hash, &*self.master_key()?)
    }

    pub fn wrap<K: EnvelopeKey + ?Sized>(&self, data_key: &DataKey, wrapping_key: &K) -> Result<String> {
        self.inner.wrapper.wrap(data_key, wrapping_key)
    }

    pub fn unwrap<K: EnvelopeKey + ?Sized>(&self, record: &str, wrapping_key: &K) -> Result<DataKey> {
        self.inner.wrapper.unwrap(record, wrapping_key)
    }

    pub fn wrap_with_token(&self, data_key: &DataKey, session_token: &str) -> Result<String> {
        self.inner
            .wrapper
            .wrap_with_token(data_key, session_token, &*self.master_key()?)
    }

    pub fn unwrap_with_token(&self, record: &str, session_token: &str) -> Result<DataKey> {
        self.inner
            .wrapper
            .unwrap_with_token(record, session_token, &*self.master_key()?)
    }

    // Asymmetric keys

    pub fn generate_key_pair(&self) -> Result<KeyPair> {
        crypto::generate_key_pair(self.inner.rsa_bits)
    }

    pub fn recover_private_key(
        &self,
        session_token: &str,
        wrapped_data_key: &str,
        wrapped_private_key: &str,
    ) -> Result<PrivateKey> {
        crypto::recover_private_key(
            &self.inner.wrapper,
            &*self.master_key()?,
            session_token,
            wrapped_data_key,
            wrapped_private_key,
        )
    }

    // Utilities

    /// 256-bit base64url token for sessions and invites
    pub fn generate_secure_token() -> Result<String> {
        random::secure_token()
    }

    pub fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
        crypto::constant_time_eq(a, b)
    }

    // Blocking-pool variants of the expensive operations

    pub async fn hash_password_async(&self, password: String) -> Result<String> {
        let vault = self.clone();
        let password = Zeroizing::new(password);
        task::spawn_blocking(move || vault.hash_password(&password)).await?
    }

    pub async fn verify_password_async(&self, password: String, record: String) -> Result<bool> {
        let vault = self.clone();
        let password = Zeroizing::new(password);
        Ok(task::spawn_blocking(move || vault.verify_password(&password, &record)).await?)
    }

    pub async fn derive_kek_async(&self, password_hash: String) -> Result<Kek> {
        let vault = self.clone();
        task::spawn_blocking(move || vault.derive_kek(&password_hash)).await?
    }

    pub async fn generate_key_pair_async(&self) -> Result<KeyPair> {
        let vault = self.clone();
        task::spawn_blocking(move || vault.generate_key_pair()).await?
    }
}
