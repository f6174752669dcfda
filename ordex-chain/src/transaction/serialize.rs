//! Wire (de)serialization for transactions, so that all of the
//! serialization logic is in one place.

use std::io::{self, Read};

use crate::cached::Cached;
use crate::serialization::{ChainDeserialize, ChainSerialize, SerializationError};
use crate::{Outpoint, Script};

use super::{Input, Output, Transaction};

/// A sanity limit on the size of a single transaction, to protect against
/// unbounded allocation from malformed length prefixes.
pub const MAX_TX_SIZE: u64 = 10_000_000;

impl ChainSerialize for Transaction {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.version.chain_serialize(&mut writer)?;
        self.inputs.chain_serialize(&mut writer)?;
        self.outputs.chain_serialize(&mut writer)?;
        self.lock_time.chain_serialize(&mut writer)
    }
}

/// Deserializes a transaction, calculating and caching its txid.
impl ChainDeserialize for Transaction {
    fn chain_deserialize<R: io::Read>(src: R) -> Result<Self, SerializationError> {
        let mut src = src.take(MAX_TX_SIZE);
        let version = i32::chain_deserialize(&mut src)?;
        let inputs = <Vec<Input>>::chain_deserialize(&mut src)?;
        let outputs = <Vec<Output>>::chain_deserialize(&mut src)?;
        let lock_time = u32::chain_deserialize(&mut src)?;
        let mut tx = Transaction::new(version, inputs, outputs, lock_time);
        // Calculate and cache the txid.
        let own_hash = tx.hash();
        tx.hash = Cached::from(own_hash);
        Ok(tx)
    }
}

impl ChainSerialize for Input {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.prevout.chain_serialize(&mut writer)?;
        self.unlock_script.chain_serialize(&mut writer)?;
        self.sequence.chain_serialize(&mut writer)
    }
}

impl ChainDeserialize for Input {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Input {
            prevout: Outpoint::chain_deserialize(&mut reader)?,
            unlock_script: Script::chain_deserialize(&mut reader)?,
            sequence: u32::chain_deserialize(&mut reader)?,
        })
    }
}

impl ChainSerialize for Output {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.satoshis.chain_serialize(&mut writer)?;
        self.lock_script.chain_serialize(&mut writer)
    }
}

impl ChainDeserialize for Output {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Output {
            satoshis: u64::chain_deserialize(&mut reader)?,
            lock_script: Script::chain_deserialize(&mut reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Hash;

    fn sample_tx() -> Transaction {
        Transaction::new(
            1,
            vec![Input {
                prevout: Outpoint::new(Hash([7u8; 32]), 2),
                unlock_script: Script(vec![0x00, 0x01]),
                sequence: 0xffff_ffff,
            }],
            vec![
                Output {
                    satoshis: 1,
                    lock_script: Script(vec![0x51]),
                },
                Output {
                    satoshis: 546,
                    lock_script: Script(vec![]),
                },
            ],
            0,
        )
    }

    #[test]
    fn transaction_roundtrip() {
        ordex_test::init();

        let tx = sample_tx();
        let bytes = tx.chain_serialize_to_vec().unwrap();
        let parsed = Transaction::chain_deserialize(&bytes[..]).unwrap();

        assert_eq!(tx, parsed);
        assert_eq!(tx.hash(), parsed.hash());
    }

    #[test]
    fn coinbase_detection() {
        ordex_test::init();

        let coinbase = Transaction::new(
            1,
            vec![Input {
                prevout: Outpoint::new(Hash::zero(), u32::max_value()),
                unlock_script: Script(vec![1, 2, 3]),
                sequence: 0,
            }],
            vec![],
            0,
        );

        assert!(coinbase.is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }
}
