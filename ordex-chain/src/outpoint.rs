use std::{fmt, io, str::FromStr};

use serde::Deserialize;

use crate::serialization::{ChainDeserialize, ChainSerialize, SerializationError};
use crate::transaction;

/// A particular transaction output reference: `(txid, vout)`.
///
/// The canonical string form is `<txid hex>_<vout>`, which is also the
/// member format used by every ordered index in the store, so a txid
/// prefix scan finds all outputs of one transaction.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Outpoint {
    /// References the transaction that contains the output.
    pub txid: transaction::Hash,
    /// Identifies which output of that transaction is referenced; the
    /// first output is 0, etc.
    pub vout: u32,
}

impl Outpoint {
    pub fn new(txid: transaction::Hash, vout: u32) -> Outpoint {
        Outpoint { txid, vout }
    }

    /// Returns `true` for the null reference used by coinbase inputs.
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::max_value()
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}", self.txid, self.vout)
    }
}

impl fmt::Debug for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Outpoint").field(&self.to_string()).finish()
    }
}

impl FromStr for Outpoint {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = match s.split_once('_') {
            Some(parts) => parts,
            None => return Err(SerializationError::Parse("outpoint missing separator")),
        };
        Ok(Outpoint {
            txid: txid.parse()?,
            vout: vout
                .parse()
                .map_err(|_| SerializationError::Parse("bad outpoint vout"))?,
        })
    }
}

impl serde::Serialize for Outpoint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Outpoint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        string.parse().map_err(serde::de::Error::custom)
    }
}

impl ChainSerialize for Outpoint {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.txid.chain_serialize(&mut writer)?;
        self.vout.chain_serialize(&mut writer)
    }
}

impl ChainDeserialize for Outpoint {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Outpoint {
            txid: transaction::Hash::chain_deserialize(&mut reader)?,
            vout: u32::chain_deserialize(&mut reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip() {
        ordex_test::init();

        let text = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b_1";
        let outpoint: Outpoint = text.parse().unwrap();

        assert_eq!(outpoint.vout, 1);
        assert_eq!(outpoint.to_string(), text);
    }

    #[test]
    fn rejects_malformed() {
        ordex_test::init();

        assert!("deadbeef".parse::<Outpoint>().is_err());
        assert!("xyz_0".parse::<Outpoint>().is_err());
        assert!(
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b_x"
                .parse::<Outpoint>()
                .is_err()
        );
    }
}
