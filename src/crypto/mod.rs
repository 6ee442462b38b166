//! Cryptography module for fieldcrypt
//!
//! Turns a single externally supplied master secret into:
//! - AES-256-GCM envelopes for arbitrary field values
//! - Deterministic HMAC-SHA256 blind indexes for equality lookups
//! - Salted PBKDF2-HMAC-SHA256 password records
//! - Per-principal data keys, wrapped either under a password KEK or a
//!   session-token KEK, which in turn protect an RSA-OAEP private key

mod blind_index;
pub mod codec;
mod encryption;
mod keypair;
mod keys;
mod master;
mod password;
pub mod random;

pub use blind_index::blind_index;
pub use codec::constant_time_eq;
pub use encryption::{decrypt, decrypt_if_envelope, encrypt, Envelope, EnvelopeKey};
pub use keypair::{generate_key_pair, recover_private_key, KeyPair, PrivateKey, PublicKey, RsaJwk};
pub use keys::{DataKey, Kek, KeyWrapper, WrappedKey};
pub use master::{
    generate_master_secret, EnvSecretSource, MasterKey, MasterKeyManager, SecretSource,
    StaticSecretSource,
};
pub use password::{PasswordHasher, PasswordRecord};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Size of password salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of a PBKDF2 password digest in bytes
pub const PASSWORD_HASH_SIZE: usize = 32;

/// Entropy of a session / invite token in bytes
pub const TOKEN_SIZE: usize = 32;

/// Production PBKDF2 iteration count for password hashing and password KEKs
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;

/// Default RSA modulus size
pub const DEFAULT_RSA_BITS: usize = 2048;
