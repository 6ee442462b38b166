//! fieldcrypt - Envelope encryption for sensitive database fields
//!
//! This library turns one externally supplied master secret into searchable
//! blind indexes, authenticated field envelopes, salted password records and
//! a per-principal key hierarchy that can be unlocked either from a password
//! or from an active session token.

pub mod config;
pub mod crypto;
pub mod error;
pub mod principal;
pub mod vault;

pub use config::Config;
pub use error::{Error, Result};
pub use principal::{PrincipalKeys, SessionKeys};
pub use vault::Vault;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crypto::{DataKey, Kek, PrivateKey, PublicKey};
    pub use crate::error::{Error, Result};
    pub use crate::vault::Vault;
}
