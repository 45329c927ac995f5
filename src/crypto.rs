//! Key identities, hashes, and signature primitives.
//!
//! Ed25519 only: the corpus this engine was built against has no call for any other scheme, and
//! a single scheme keeps key wire encoding unambiguous.

use std::fmt;
use std::io::Read;

use data_encoding::BASE64URL_NOPAD;
use ring::digest;
use ring::signature::{self, Ed25519KeyPair, KeyPair};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::metadata::RoleName;
use crate::Result;

/// Hash algorithms a `FileHash` entry may be keyed by. Only SHA-256 is ever checked; any other
/// algorithm name parses successfully (so a mirror can add a second digest without breaking this
/// implementation) but is ignored by `FileHash::verify`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Unrecognized(String),
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Unrecognized(s) => write!(f, "{s}"),
        }
    }
}

impl Serialize for HashAlgorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HashAlgorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "sha256" => HashAlgorithm::Sha256,
            _ => HashAlgorithm::Unrecognized(s),
        })
    }
}

/// A hex-encoded digest value. Hex, not base64, because every `FileHash` map in the wire format
/// uses it and downstream tooling expects to `hex::decode` it directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashValue(Vec<u8>);

impl HashValue {
    pub fn new(bytes: Vec<u8>) -> Self {
        HashValue(bytes)
    }

    pub fn value(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for HashValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for HashValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(DeError::custom)?;
        Ok(HashValue(bytes))
    }
}

/// Computes the length and SHA-256 digest of a byte stream in a single pass.
pub fn sha256_digest<R: Read>(mut reader: R) -> Result<(u64, HashValue)> {
    let mut ctx = digest::Context::new(&digest::SHA256);
    let mut buf = [0u8; 8192];
    let mut len = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.update(&buf[..n]);
        len += n as u64;
    }
    Ok((len, HashValue(ctx.finish().as_ref().to_vec())))
}

/// Base64url-SHA256-of-public-key identifier for a key. Derived, never chosen by the signer, so
/// two documents can never disagree about which key produced a signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    fn of(public_key_bytes: &[u8]) -> Self {
        let digest = digest::digest(&digest::SHA256, public_key_bytes);
        KeyId(BASE64URL_NOPAD.encode(digest.as_ref()))
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for KeyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(KeyId(String::deserialize(deserializer)?))
    }
}

/// Signature schemes a `PublicKey` may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureScheme {
    #[serde(rename = "ed25519")]
    Ed25519,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyValShim {
    public: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PublicKeyShim {
    keytype: String,
    scheme: SignatureScheme,
    keyval: KeyValShim,
}

/// An Ed25519 public key, addressable by its derived `KeyId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key_id: KeyId,
    scheme: SignatureScheme,
    value: Vec<u8>,
}

impl PublicKey {
    pub fn new(scheme: SignatureScheme, value: Vec<u8>) -> Self {
        let key_id = KeyId::of(&value);
        PublicKey {
            key_id,
            scheme,
            value,
        }
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// Verifies `signature` over `msg`. Any failure, including a scheme mismatch, collapses to a
    /// single opaque result: a signature either authenticates a message under this key or it
    /// doesn't, and callers should not branch on why.
    pub fn verify(&self, msg: &[u8], sig: &Signature) -> Result<()> {
        match self.scheme {
            SignatureScheme::Ed25519 => {
                let key = signature::UnparsedPublicKey::new(&signature::ED25519, &self.value);
                key.verify(msg, sig.value()).map_err(|_| Error::SignatureError {
                    role: RoleName::Root,
                    message: format!("signature by {} did not verify", self.key_id),
                })
            }
        }
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        PublicKeyShim {
            keytype: "ed25519".into(),
            scheme: self.scheme,
            keyval: KeyValShim {
                public: BASE64URL_NOPAD.encode(&self.value),
            },
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let shim = PublicKeyShim::deserialize(deserializer)?;
        let value = BASE64URL_NOPAD
            .decode(shim.keyval.public.as_bytes())
            .map_err(DeError::custom)?;
        Ok(PublicKey::new(shim.scheme, value))
    }
}

/// A private signing key. Never serialized; only ever loaded from PKCS#8 bytes held outside the
/// document graph this crate manages.
pub struct PrivateKey {
    ed25519: Ed25519KeyPair,
    public: PublicKey,
}

impl PrivateKey {
    pub fn from_pkcs8(der: &[u8], scheme: SignatureScheme) -> Result<Self> {
        let ed25519 = Ed25519KeyPair::from_pkcs8(der)?;
        let public = PublicKey::new(scheme, ed25519.public_key().as_ref().to_vec());
        Ok(PrivateKey { ed25519, public })
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        let sig = self.ed25519.sign(msg);
        Signature {
            key_id: self.public.key_id().clone(),
            value: sig.as_ref().to_vec(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SignatureShim {
    keyid: KeyId,
    sig: String,
}

/// A single signature over a signed document's canonical payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    key_id: KeyId,
    value: Vec<u8>,
}

impl Signature {
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        SignatureShim {
            keyid: self.key_id.clone(),
            sig: BASE64URL_NOPAD.encode(&self.value),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let shim = SignatureShim::deserialize(deserializer)?;
        let value = BASE64URL_NOPAD
            .decode(shim.sig.as_bytes())
            .map_err(DeError::custom)?;
        Ok(Signature {
            key_id: shim.keyid,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    fn generate_key() -> PrivateKey {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        PrivateKey::from_pkcs8(pkcs8.as_ref(), SignatureScheme::Ed25519).unwrap()
    }

    #[test]
    fn sign_and_verify_round_trips() {
        let key = generate_key();
        let sig = key.sign(b"hello");
        key.public().verify(b"hello", &sig).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let key = generate_key();
        let sig = key.sign(b"hello");
        assert!(key.public().verify(b"goodbye", &sig).is_err());
    }

    #[test]
    fn key_id_is_derived_not_arbitrary() {
        let key = generate_key();
        let expected = KeyId::of(&key.public().value);
        assert_eq!(&expected, key.public().key_id());
    }

    #[test]
    fn public_key_round_trips_through_json() {
        let key = generate_key();
        let json = serde_json::to_string(key.public()).unwrap();
        let decoded: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(&decoded, key.public());
    }

    #[test]
    fn hash_value_hex_round_trips() {
        let (len, digest) = sha256_digest(b"things fade, alternatives exclude".as_slice()).unwrap();
        assert_eq!(len, 34);
        let json = serde_json::to_string(&digest).unwrap();
        let decoded: HashValue = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, digest);
    }
}
