//! Principal key lifecycle built on top of [`Vault`]
//!
//! None of these touch storage. The caller persists the returned records and
//! is responsible for committing them atomically.

use crate::crypto::random;
use crate::error::Result;
use crate::vault::Vault;
use std::fmt;
use tokio::task;
use tracing::debug;
use zeroize::Zeroizing;

/// Records to store for a newly provisioned principal
#[derive(Debug, Clone)]
pub struct PrincipalKeys {
    /// Data key wrapped under the password KEK (`wk:1:`)
    pub wrapped_data_key: String,
    /// Public key JWK, safe to store in the clear
    pub public_key: String,
    /// Private key JWK sealed under the data key (`enc:1:`)
    pub wrapped_private_key: String,
}

/// Session credential plus the data key wrapped for that session
pub struct SessionKeys {
    /// Opaque token handed to the client
    pub token: Zeroizing<String>,
    /// Data key wrapped under the session KEK (`wk:1:`)
    pub session_wrapped_data_key: String,
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("token", &"[REDACTED]")
            .field("session_wrapped_data_key", &self.session_wrapped_data_key)
            .finish()
    }
}

impl Vault {
    /// Create a data key and key pair for a principal whose password record is `password_hash`
    pub fn provision_principal(&self, password_hash: &str) -> Result<PrincipalKeys> {
        let data_key = self.generate_data_key()?;
        let kek = self.derive_kek(password_hash)?;
        let pair = self.generate_key_pair()?;

        let keys = PrincipalKeys {
            wrapped_data_key: self.wrap(&data_key, &kek)?,
            public_key: pair.public_key.clone(),
            wrapped_private_key: self.encrypt_with_key(&pair.private_key, &data_key)?,
        };
        debug!("Provisioned principal keys");
        Ok(keys)
    }

    /// After a successful login: unwrap along the password path and re-wrap for a new session
    pub fn open_session(&self, password_hash: &str, wrapped_data_key: &str) -> Result<SessionKeys> {
        let kek = self.derive_kek(password_hash)?;
        let data_key = self.unwrap(wrapped_data_key, &kek)?;

        let token = Zeroizing::new(random::secure_token()?);
        let session_wrapped_data_key = self.wrap_with_token(&data_key, &token)?;

        Ok(SessionKeys {
            token,
            session_wrapped_data_key,
        })
    }

    /// New password-path record after a password change. The data key, and
    /// everything sealed under it, stays the same.
    pub fn rewrap_for_password_change(
        &self,
        old_password_hash: &str,
        new_password_hash: &str,
        wrapped_data_key: &str,
    ) -> Result<String> {
        let old_kek = self.derive_kek(old_password_hash)?;
        let data_key = self.unwrap(wrapped_data_key, &old_kek)?;
        let new_kek = self.derive_kek(new_password_hash)?;
        self.wrap(&data_key, &new_kek)
    }

    pub async fn provision_principal_async(&self, password_hash: String) -> Result<PrincipalKeys> {
        let vault = self.clone();
        task::spawn_blocking(move || vault.provision_principal(&password_hash)).await?
    }

    pub async fn open_session_async(
        &self,
        password_hash: String,
        wrapped_data_key: String,
    ) -> Result<SessionKeys> {
        let vault = self.clone();
        task::spawn_blocking(move || vault.open_session(&password_hash, &wrapped_data_key)).await?
    }
}
