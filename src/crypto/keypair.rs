//! RSA-OAEP key pairs for principals
//!
//! Both halves are exported as JWK JSON. The private half is only ever
//! stored sealed under the principal's data key.

use crate::crypto::codec::{b64url_decode, b64url_encode};
use crate::crypto::encryption::decrypt;
use crate::crypto::{KeyWrapper, MasterKey};
use crate::error::{Error, Result};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const JWK_ALG: &str = "RSA-OAEP-256";

/// JSON Web Key for an RSA-OAEP-256 key
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RsaJwk {
    pub kty: String,
    pub alg: String,
    pub n: String,
    pub e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    #[serde(default)]
    pub key_ops: Vec<String>,
}

impl RsaJwk {
    fn is_private(&self) -> bool {
        self.d.is_some()
    }
}

impl fmt::Debug for RsaJwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaJwk")
            .field("kty", &self.kty)
            .field("alg", &self.alg)
            .field("n", &self.n)
            .field("e", &self.e)
            .field("private", &self.is_private())
            .finish()
    }
}

fn encode_uint(value: &BigUint) -> String {
    b64url_encode(&value.to_bytes_be())
}

fn decode_uint(kind: &'static str, value: Option<&str>, member: &str) -> Result<BigUint> {
    let value = value.ok_or_else(|| Error::format(kind, format!("missing JWK member {}", member)))?;
    let bytes = Zeroizing::new(b64url_decode(kind, value)?);
    if bytes.is_empty() {
        return Err(Error::format(kind, format!("empty JWK member {}", member)));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

fn parse_jwk(kind: &'static str, json: &str) -> Result<RsaJwk> {
    let jwk: RsaJwk = serde_json::from_str(json)
        .map_err(|e| Error::format(kind, format!("invalid JWK: {}", e)))?;
    if jwk.kty != "RSA" {
        return Err(Error::format(kind, format!("unsupported key type {:?}", jwk.kty)));
    }
    if jwk.alg != JWK_ALG {
        return Err(Error::format(kind, format!("unsupported algorithm {:?}", jwk.alg)));
    }
    Ok(jwk)
}

/// Public half of a principal's key pair
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
}

impl PublicKey {
    const KIND: &'static str = "public key";

    pub fn from_jwk_json(json: &str) -> Result<Self> {
        let jwk = parse_jwk(Self::KIND, json)?;
        let n = decode_uint(Self::KIND, Some(jwk.n.as_str()), "n")?;
        let e = decode_uint(Self::KIND, Some(jwk.e.as_str()), "e")?;
        let inner = RsaPublicKey::new(n, e)
            .map_err(|e| Error::format(Self::KIND, format!("invalid RSA public key: {}", e)))?;
        Ok(PublicKey { inner })
    }

    pub fn to_jwk(&self) -> RsaJwk {
        RsaJwk {
            kty: "RSA".to_string(),
            alg: JWK_ALG.to_string(),
            n: encode_uint(self.inner.n()),
            e: encode_uint(self.inner.e()),
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            key_ops: vec!["encrypt".to_string()],
        }
    }

    pub fn to_jwk_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_jwk())?)
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.inner.n().bits()
    }

    /// RSA-OAEP (SHA-256) encrypt a short message to this key
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.inner
            .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| Error::Encryption(format!("RSA-OAEP encryption failed: {}", e)))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(RSA-{})", self.bits())
    }
}

/// Usable private half of a principal's key pair
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl PrivateKey {
    const KIND: &'static str = "private key";

    pub fn from_jwk_json(json: &str) -> Result<Self> {
        let jwk = parse_jwk(Self::KIND, json)?;
        if !jwk.is_private() {
            return Err(Error::format(Self::KIND, "JWK has no private exponent"));
        }

        let n = decode_uint(Self::KIND, Some(jwk.n.as_str()), "n")?;
        let e = decode_uint(Self::KIND, Some(jwk.e.as_str()), "e")?;
        let d = decode_uint(Self::KIND, jwk.d.as_deref(), "d")?;
        let p = decode_uint(Self::KIND, jwk.p.as_deref(), "p")?;
        let q = decode_uint(Self::KIND, jwk.q.as_deref(), "q")?;

        let inner = RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|e| Error::format(Self::KIND, format!("invalid RSA private key: {}", e)))?;
        inner
            .validate()
            .map_err(|e| Error::format(Self::KIND, format!("invalid RSA private key: {}", e)))?;

        Ok(PrivateKey { inner })
    }

    pub fn to_jwk(&self) -> Result<RsaJwk> {
        let primes = self.inner.primes();
        if primes.len() != 2 {
            return Err(Error::Internal(format!(
                "Expected a two-prime RSA key, got {} primes",
                primes.len()
            )));
        }
        let (p, q) = (&primes[0], &primes[1]);
        let one = BigUint::from(1u32);
        let two = BigUint::from(2u32);
        let d = self.inner.d();

        // CRT members; qi = q^(p-2) mod p since p is prime
        let dp = d % &(p - &one);
        let dq = d % &(q - &one);
        let qi = q.modpow(&(p - &two), p);

        let mut jwk = self.public_key().to_jwk();
        jwk.d = Some(encode_uint(d));
        jwk.p = Some(encode_uint(p));
        jwk.q = Some(encode_uint(q));
        jwk.dp = Some(encode_uint(&dp));
        jwk.dq = Some(encode_uint(&dq));
        jwk.qi = Some(encode_uint(&qi));
        jwk.key_ops = vec!["decrypt".to_string()];
        Ok(jwk)
    }

    pub fn to_jwk_json(&self) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new(serde_json::to_string(&self.to_jwk()?)?))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: RsaPublicKey::from(&self.inner),
        }
    }

    /// RSA-OAEP (SHA-256) decrypt; a wrong key or tampered ciphertext is an authentication error
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.inner
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|_| Error::Authentication)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(RSA-{}, [REDACTED])", self.inner.n().bits())
    }
}

/// Freshly generated key pair, both halves as JWK JSON
pub struct KeyPair {
    pub public_key: String,
    pub private_key: Zeroizing<String>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Generate an RSA-OAEP key pair with a `bits`-bit modulus
pub fn generate_key_pair(bits: usize) -> Result<KeyPair> {
    let inner = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
        .map_err(|e| Error::KeyDerivation(format!("RSA key generation failed: {}", e)))?;
    let private = PrivateKey { inner };

    debug!("Generated RSA-{} key pair", bits);

    Ok(KeyPair {
        public_key: private.public_key().to_jwk_json()?,
        private_key: private.to_jwk_json()?,
    })
}

/// Unlock a principal's private key with only an active session.
///
/// Unwraps the data key along the session path, opens the sealed JWK with it
/// and imports the result. Nothing is returned unless every step succeeds.
pub fn recover_private_key(
    wrapper: &KeyWrapper,
    master: &MasterKey,
    session_token: &str,
    wrapped_data_key: &str,
    wrapped_private_key: &str,
) -> Result<PrivateKey> {
    let data_key = wrapper.unwrap_with_token(wrapped_data_key, session_token, master)?;
    let jwk_json = Zeroizing::new(decrypt(wrapped_private_key, &data_key)?);
    PrivateKey::from_jwk_json(&jwk_json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{encrypt, DataKey, KEY_SIZE};
    use std::num::NonZeroU32;
    use std::sync::OnceLock;

    fn test_pair() -> &'static KeyPair {
        static PAIR: OnceLock<KeyPair> = OnceLock::new();
        PAIR.get_or_init(|| generate_key_pair(1024).unwrap())
    }

    #[test]
    fn test_exported_halves() {
        let pair = test_pair();
        let public: RsaJwk = serde_json::from_str(&pair.public_key).unwrap();
        assert_eq!(public.kty, "RSA");
        assert_eq!(public.alg, "RSA-OAEP-256");
        assert_eq!(public.e, "AQAB");
        assert!(public.d.is_none());

        let private: RsaJwk = serde_json::from_str(&pair.private_key).unwrap();
        assert_eq!(private.n, public.n);
        assert!(private.d.is_some());
        assert!(private.qi.is_some());
    }

    #[test]
    fn test_oaep_roundtrip_via_export() {
        let pair = test_pair();
        let public = PublicKey::from_jwk_json(&pair.public_key).unwrap();
        let private = PrivateKey::from_jwk_json(&pair.private_key).unwrap();

        assert_eq!(public.bits(), 1024);
        assert_eq!(private.public_key(), public);

        let ciphertext = public.encrypt(b"api secret").unwrap();
        assert_eq!(private.decrypt(&ciphertext).unwrap(), b"api secret");
    }

    #[test]
    fn test_oaep_tamper_fails() {
        let pair = test_pair();
        let public = PublicKey::from_jwk_json(&pair.public_key).unwrap();
        let private = PrivateKey::from_jwk_json(&pair.private_key).unwrap();

        let mut ciphertext = public.encrypt(b"api secret").unwrap();
        ciphertext[10] ^= 0x01;
        assert!(private.decrypt(&ciphertext).unwrap_err().is_authentication());
    }

    #[test]
    fn test_crt_members_match_definition() {
        let private = PrivateKey::from_jwk_json(&test_pair().private_key).unwrap();
        let jwk = private.to_jwk().unwrap();
        let p = BigUint::from_bytes_be(&b64url_decode("t", jwk.p.as_deref().unwrap()).unwrap());
        let q = BigUint::from_bytes_be(&b64url_decode("t", jwk.q.as_deref().unwrap()).unwrap());
        let qi = BigUint::from_bytes_be(&b64url_decode("t", jwk.qi.as_deref().unwrap()).unwrap());

        assert_eq!((q * qi) % &p, BigUint::from(1u32));
    }

    #[test]
    fn test_import_rejects_bad_jwk() {
        assert!(PublicKey::from_jwk_json("not json").unwrap_err().is_format());
        assert!(PrivateKey::from_jwk_json(&test_pair().public_key)
            .unwrap_err()
            .is_format());

        let mut jwk: RsaJwk = serde_json::from_str(&test_pair().public_key).unwrap();
        jwk.kty = "EC".to_string();
        let json = serde_json::to_string(&jwk).unwrap();
        assert!(PublicKey::from_jwk_json(&json).unwrap_err().is_format());
    }

    #[test]
    fn test_recover_private_key() {
        let wrapper = KeyWrapper::new(NonZeroU32::new(1_000).unwrap());
        let master = MasterKey::from_bytes(&[5u8; KEY_SIZE]).unwrap();
        let pair = test_pair();

        let data_key = DataKey::generate().unwrap();
        let wrapped_private_key = encrypt(&pair.private_key, &data_key).unwrap();
        let wrapped_data_key = wrapper.wrap_with_token(&data_key, "session", &master).unwrap();

        let private = recover_private_key(
            &wrapper,
            &master,
            "session",
            &wrapped_data_key,
            &wrapped_private_key,
        )
        .unwrap();
        let public = PublicKey::from_jwk_json(&pair.public_key).unwrap();
        let ciphertext = public.encrypt(b"hello").unwrap();
        assert_eq!(private.decrypt(&ciphertext).unwrap(), b"hello");

        let err = recover_private_key(
            &wrapper,
            &master,
            "other-session",
            &wrapped_data_key,
            &wrapped_private_key,
        )
        .unwrap_err();
        assert!(err.is_authentication());

        let err = recover_private_key(&wrapper, &master, "session", &wrapped_data_key, "garbage")
            .unwrap_err();
        assert!(err.is_format());
    }
}
