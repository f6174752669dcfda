use std::{fmt, str::FromStr};

use ripemd160::{Digest as Ripemd160Digest, Ripemd160};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::serialization::SerializationError;

/// The version byte prepended to a P2PKH address payload before
/// base58check encoding.
const P2PKH_VERSION: u8 = 0x00;

/// A 20-byte HASH160 of a public key: the owner identity attached to
/// P2PKH outputs.
///
/// A single version byte is prepended to the hash, the result is hashed
/// with sha256d, the first four bytes of the output are appended as a
/// checksum, and the result is Base58Check encoded.
///
/// https://en.bitcoin.it/wiki/Base58Check_encoding
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PKHash(pub [u8; 20]);

impl PKHash {
    /// HASH160: a RIPEMD-160 hash of a SHA-256 hash of `bytes`.
    ///
    /// The resulting hash is always exactly 20 bytes.
    pub fn hash160(bytes: &[u8]) -> PKHash {
        let sha_hash = Sha256::digest(bytes);
        let ripe_hash = Ripemd160::digest(&sha_hash);
        let mut payload = [0u8; 20];
        payload[..].copy_from_slice(&ripe_hash[..]);
        PKHash(payload)
    }

    /// The base58check address form of this hash.
    pub fn address(&self) -> String {
        let mut payload = Vec::with_capacity(21);
        payload.push(P2PKH_VERSION);
        payload.extend_from_slice(&self.0);
        bs58::encode(payload).with_check().into_string()
    }
}

impl fmt::Display for PKHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.address())
    }
}

impl fmt::Debug for PKHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("PKHash").field(&hex::encode(&self.0)).finish()
    }
}

impl FromStr for PKHash {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|_| SerializationError::Parse("address decoding error"))?;

        if bytes.len() != 21 || bytes[0] != P2PKH_VERSION {
            return Err(SerializationError::Parse("bad address version/length"));
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[1..]);
        Ok(PKHash(hash))
    }
}

/// Persisted documents carry owners in address form, so serde round-trips
/// through `address()`.
impl serde::Serialize for PKHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for PKHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        string.parse().map_err(serde::de::Error::custom)
    }
}
