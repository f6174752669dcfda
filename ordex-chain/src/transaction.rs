//! Transactions and transaction-related structures.

use crate::cached::Cached;
use crate::{Outpoint, Script};

mod hash;
mod serialize;

pub use hash::Hash;

/// A pre-SegWit Bitcoin-format transaction, as carried by the BSV chain
/// the token protocol lives on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// The transaction version.
    pub version: i32,
    /// The transaction inputs.
    pub inputs: Vec<Input>,
    /// The transaction outputs.
    pub outputs: Vec<Output>,
    /// The transaction lock time.
    pub lock_time: u32,
    hash: Cached<Hash>,
}

/// A transaction input spending a previous output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Input {
    /// The previous output being spent.
    pub prevout: Outpoint,
    /// The script that authorizes spending `prevout`.
    pub unlock_script: Script,
    /// The sequence number for the input.
    pub sequence: u32,
}

/// A transaction output.
///
/// Everything the indexer tracks hangs off outputs: the satoshi value and
/// the locking script that inscription envelopes and market locks are
/// embedded in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Output {
    /// Output value in satoshis.
    pub satoshis: u64,
    /// The lock script defines the conditions under which this output can
    /// be spent.
    pub lock_script: Script,
}

impl Transaction {
    pub fn new(
        version: i32,
        inputs: Vec<Input>,
        outputs: Vec<Output>,
        lock_time: u32,
    ) -> Transaction {
        Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            hash: Cached::new(),
        }
    }

    /// Get the id of this transaction.
    pub fn hash(&self) -> Hash {
        // If we have a cached version, just return that
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        // Otherwise, serialize the tx to calculate and return the hash
        Hash::from(self)
    }

    /// Returns `true` if this transaction creates new coins from the block
    /// reward: a single input whose previous outpoint is null.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }
}
