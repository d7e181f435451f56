//! Wrappers around secp256k1 keys with the hex wire encoding.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use bitcoin::secp256k1;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::SECP256K1;

/// A compressed secp256k1 public key, hex encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey {
    inner: secp256k1::PublicKey,
}

impl PublicKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        Ok(secp256k1::PublicKey::from_slice(bytes)?.into())
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, Error> {
        Self::from_slice(&hex::decode(hex_key)?)
    }

    pub fn to_bytes(&self) -> [u8; 33] {
        self.inner.serialize()
    }

    pub fn to_uncompressed_bytes(&self) -> [u8; 65] {
        self.inner.serialize_uncompressed()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn x_only(&self) -> secp256k1::XOnlyPublicKey {
        self.inner.x_only_public_key().0
    }

    /// Point addition.
    pub fn combine(&self, other: &PublicKey) -> Result<PublicKey, Error> {
        Ok(self.inner.combine(&other.inner)?.into())
    }

    /// Scalar multiplication.
    pub fn mul_tweak(&self, scalar: &secp256k1::Scalar) -> Result<PublicKey, Error> {
        Ok(self.inner.mul_tweak(&SECP256K1, scalar)?.into())
    }

    pub fn negate(&self) -> PublicKey {
        self.inner.negate(&SECP256K1).into()
    }
}

impl Deref for PublicKey {
    type Target = secp256k1::PublicKey;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<secp256k1::PublicKey> for PublicKey {
    fn from(inner: secp256k1::PublicKey) -> Self {
        PublicKey { inner }
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PublicKey::from_hex(s)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_key = String::deserialize(deserializer)?;
        PublicKey::from_hex(&hex_key).map_err(D::Error::custom)
    }
}

/// A secp256k1 secret key.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey {
    inner: secp256k1::SecretKey,
}

impl SecretKey {
    pub fn generate() -> Self {
        secp256k1::SecretKey::new(&mut rand::thread_rng()).into()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        Ok(secp256k1::SecretKey::from_slice(bytes)?.into())
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, Error> {
        Self::from_slice(&hex::decode(hex_key)?)
    }

    pub fn to_secret_bytes(&self) -> [u8; 32] {
        self.inner.secret_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_secret_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        self.inner.public_key(&SECP256K1).into()
    }

    pub fn as_scalar(&self) -> secp256k1::Scalar {
        secp256k1::Scalar::from(self.inner)
    }

    /// Scalar addition mod the curve order.
    pub fn add_tweak(&self, tweak: &secp256k1::Scalar) -> Result<SecretKey, Error> {
        Ok(self.inner.add_tweak(tweak)?.into())
    }

    /// Scalar multiplication mod the curve order.
    pub fn mul_tweak(&self, tweak: &secp256k1::Scalar) -> Result<SecretKey, Error> {
        Ok(self.inner.mul_tweak(tweak)?.into())
    }
}

impl Deref for SecretKey {
    type Target = secp256k1::SecretKey;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<secp256k1::SecretKey> for SecretKey {
    fn from(inner: secp256k1::SecretKey) -> Self {
        SecretKey { inner }
    }
}

impl FromStr for SecretKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecretKey::from_hex(s)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print key material
        write!(f, "SecretKey(..)")
    }
}

impl Serialize for SecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_key = String::deserialize(deserializer)?;
        SecretKey::from_hex(&hex_key).map_err(D::Error::custom)
    }
}
