//! PBKDF2-HMAC-SHA256 password hashing
//!
//! Records are stored as `pbkdf2:<iterations>:<base64 salt>:<base64 hash>`.
//! The iteration count travels with the record, so raising the configured
//! cost later never breaks verification of older records.

use crate::config::PasswordConfig;
use crate::crypto::codec::{b64_decode, b64_encode, constant_time_eq};
use crate::crypto::{random, DEFAULT_PBKDF2_ITERATIONS, PASSWORD_HASH_SIZE};
use crate::error::{Error, Result};
use ring::pbkdf2;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use tracing::warn;
use zeroize::Zeroizing;

/// Upper bound accepted from stored records
const MAX_ITERATIONS: u32 = 10_000_000;

/// Parsed password hash record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRecord {
    pub iterations: NonZeroU32,
    pub salt: Vec<u8>,
    pub hash: Vec<u8>,
}

impl PasswordRecord {
    pub const PREFIX: &'static str = "pbkdf2";
    const KIND: &'static str = "password record";

    pub fn parse(record: &str) -> Result<Self> {
        let fields: Vec<&str> = record.split(':').collect();
        if fields.len() != 4 {
            return Err(Error::format(
                Self::KIND,
                format!("expected 4 fields, got {}", fields.len()),
            ));
        }
        if fields[0] != Self::PREFIX {
            return Err(Error::format(Self::KIND, "missing pbkdf2 prefix"));
        }

        let iterations = fields[1]
            .parse::<u32>()
            .ok()
            .filter(|n| *n <= MAX_ITERATIONS)
            .and_then(NonZeroU32::new)
            .ok_or_else(|| Error::format(Self::KIND, "invalid iteration count"))?;

        Ok(PasswordRecord {
            iterations,
            salt: b64_decode(Self::KIND, fields[2])?,
            hash: b64_decode(Self::KIND, fields[3])?,
        })
    }
}

impl fmt::Display for PasswordRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            Self::PREFIX,
            self.iterations,
            b64_encode(&self.salt),
            b64_encode(&self.hash)
        )
    }
}

impl FromStr for PasswordRecord {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PasswordRecord::parse(s)
    }
}

/// Salted PBKDF2 hasher with a fixed work factor
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: NonZeroU32,
}

impl PasswordHasher {
    /// Hasher at a production-grade iteration count
    pub fn new(iterations: u32) -> Result<Self> {
        if iterations < DEFAULT_PBKDF2_ITERATIONS {
            return Err(Error::InvalidConfig(format!(
                "PBKDF2 iterations must be at least {} (got {}); weak parameters need an explicit override",
                DEFAULT_PBKDF2_ITERATIONS, iterations
            )));
        }
        Self::with_iterations(iterations)
    }

    /// Hasher below the production floor. Only for tests and local tooling.
    pub fn insecure_for_testing(iterations: u32) -> Result<Self> {
        if iterations < DEFAULT_PBKDF2_ITERATIONS {
            warn!(
                "Using weak PBKDF2 iteration count {} (production requires {})",
                iterations, DEFAULT_PBKDF2_ITERATIONS
            );
        }
        Self::with_iterations(iterations)
    }

    /// Build from configuration, honouring its weak-parameter override
    pub fn from_config(config: &PasswordConfig) -> Result<Self> {
        if config.allow_weak_iterations {
            Self::insecure_for_testing(config.iterations)
        } else {
            Self::new(config.iterations)
        }
    }

    fn with_iterations(iterations: u32) -> Result<Self> {
        let iterations = NonZeroU32::new(iterations)
            .filter(|n| n.get() <= MAX_ITERATIONS)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("Invalid PBKDF2 iteration count: {}", iterations))
            })?;
        Ok(PasswordHasher { iterations })
    }

    pub fn iterations(&self) -> NonZeroU32 {
        self.iterations
    }

    /// Hash a password with a fresh random salt
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = random::salt()?;
        let mut hash = vec![0u8; PASSWORD_HASH_SIZE];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            &salt,
            password.as_bytes(),
            &mut hash,
        );

        Ok(PasswordRecord {
            iterations: self.iterations,
            salt: salt.to_vec(),
            hash,
        }
        .to_string())
    }

    /// Check a password against a stored record.
    ///
    /// Malformed records simply fail to verify.
    pub fn verify(&self, password: &str, record: &str) -> bool {
        let record = match PasswordRecord::parse(record) {
            Ok(record) => record,
            Err(_) => return false,
        };
        if record.hash.len() != PASSWORD_HASH_SIZE {
            return false;
        }

        let mut derived = Zeroizing::new([0u8; PASSWORD_HASH_SIZE]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            record.iterations,
            &record.salt,
            password.as_bytes(),
            &mut derived[..],
        );

        constant_time_eq(&derived[..], &record.hash)
    }

    /// Whether a stored record was made with fewer iterations than this hasher uses
    pub fn needs_rehash(&self, record: &str) -> bool {
        match PasswordRecord::parse(record) {
            Ok(record) => record.iterations < self.iterations,
            Err(_) => true,
        }
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        PasswordHasher {
            iterations: NonZeroU32::new(DEFAULT_PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN),
        }
    }
}
