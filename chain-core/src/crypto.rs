//! Key pairs, public keys and ECDSA signatures
//!
//! All signatures in the system are secp256k1 ECDSA signatures in compact
//! (64-byte `r || s`) form over the Keccak-256 digest of the signed data.

use crate::codec::{BinaryReader, BinaryWriter, Decode, Encode};
use crate::{CoreError, CoreResult, Hash};
use secp256k1::{ecdsa, Message, Secp256k1, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Keccak-256 digest of arbitrary data
pub fn keccak256(data: &[u8]) -> Hash {
    let digest = Keccak256::digest(data);
    Hash::from_slice(digest.as_slice())
}

/// Compressed secp256k1 public key (33 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; 33]);

impl PublicKey {
    /// Size of a compressed public key in bytes
    pub const LEN: usize = 33;

    /// Parse and validate a compressed public key
    pub fn from_slice(bytes: &[u8]) -> CoreResult<Self> {
        let key = secp256k1::PublicKey::from_slice(bytes)
            .map_err(|e| CoreError::InvalidPublicKey(e.to_string()))?;
        Ok(Self(key.serialize()))
    }

    /// Get the compressed encoding
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(hex: &str) -> CoreResult<Self> {
        let bytes = hex::decode(hex)?;
        Self::from_slice(&bytes)
    }

    /// Verify a compact signature over `data`
    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        let Ok(key) = secp256k1::PublicKey::from_slice(&self.0) else {
            return false;
        };
        let Ok(sig) = ecdsa::Signature::from_compact(signature.as_bytes()) else {
            return false;
        };
        let message = Message::from_digest(*keccak256(data).as_bytes());
        Secp256k1::verification_only()
            .verify_ecdsa(message, &sig, &key)
            .is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        PublicKey::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

impl Encode for PublicKey {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_bytes(&self.0);
    }
}

impl Decode for PublicKey {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        let bytes = reader.read_array::<33>()?;
        Self::from_slice(&bytes)
    }
}

/// Compact ECDSA signature (`r || s`)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Size of a compact signature in bytes
    pub const LEN: usize = 64;

    pub fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, failing unless it is exactly 64 bytes
    pub fn from_slice(bytes: &[u8]) -> CoreResult<Self> {
        let array: [u8; 64] = bytes.try_into().map_err(|_| CoreError::InvalidSignature)?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
    }
}

impl Encode for Signature {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_bytes(&self.0);
    }
}

impl Decode for Signature {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        Ok(Self(reader.read_array::<64>()?))
    }
}

/// secp256k1 key pair
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Build a key pair from 32 secret bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let secret = SecretKey::from_slice(bytes)?;
        let public = secp256k1::PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret);
        Ok(Self {
            secret,
            public: PublicKey(public.serialize()),
        })
    }

    /// Generate a random key pair
    pub fn generate() -> Self {
        loop {
            let bytes: [u8; 32] = rand::random();
            if let Ok(pair) = Self::from_secret_bytes(&bytes) {
                return pair;
            }
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Sign arbitrary data
    pub fn sign(&self, data: &[u8]) -> Signature {
        let message = Message::from_digest(*keccak256(data).as_bytes());
        let sig = Secp256k1::signing_only().sign_ecdsa(message, &self.secret);
        Signature(sig.serialize_compact())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}
