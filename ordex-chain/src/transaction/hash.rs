use std::{fmt, io};

use serde::Deserialize;

use crate::serialization::{sha256d, ChainDeserialize, ChainSerialize, SerializationError};

use super::Transaction;

/// A transaction id: the sha256d hash of the serialized transaction.
///
/// Displayed in big-endian byte order, following the u256 convention set
/// by Bitcoin.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash used by coinbase previous outpoints.
    pub const fn zero() -> Hash {
        Hash([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.write_str(&hex::encode(&reversed_bytes))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.debug_tuple("transaction::Hash")
            .field(&hex::encode(&reversed_bytes))
            .finish()
    }
}

impl std::str::FromStr for Hash {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; 32];
        if hex::decode_to_slice(s, &mut bytes[..]).is_err() {
            Err(SerializationError::Parse("hex decoding error"))
        } else {
            bytes.reverse();
            Ok(Hash(bytes))
        }
    }
}

impl<'a> From<&'a Transaction> for Hash {
    fn from(transaction: &'a Transaction) -> Self {
        let mut hash_writer = sha256d::Writer::default();
        transaction
            .chain_serialize(&mut hash_writer)
            .expect("sha256d::Writer is infallible");
        Self(hash_writer.finish())
    }
}

impl serde::Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        string.parse().map_err(serde::de::Error::custom)
    }
}

impl ChainSerialize for Hash {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_all(&self.0)
    }
}

impl ChainDeserialize for Hash {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Hash(<[u8; 32]>::chain_deserialize(&mut reader)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_roundtrip() {
        ordex_test::init();

        let hex = "11b55c265bcb1270c06c1459734a426798ea14b0b1ea51e9ba48d71e77ea8b1c";
        let hash: Hash = hex.parse().unwrap();

        assert_eq!(hash.to_string(), hex);
    }

    #[test]
    fn json_is_display_form() {
        ordex_test::init();

        let hex = "11b55c265bcb1270c06c1459734a426798ea14b0b1ea51e9ba48d71e77ea8b1c";
        let hash: Hash = hex.parse().unwrap();

        assert_eq!(
            serde_json::to_string(&hash).unwrap(),
            format!("\"{}\"", hex)
        );
        let parsed: Hash = serde_json::from_str(&format!("\"{}\"", hex)).unwrap();
        assert_eq!(parsed, hash);
    }
}
