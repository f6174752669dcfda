//! Chain-level primitives and parsers for the ordex fungible-token indexer.
//!
//! This crate owns everything that can be computed from raw transaction
//! bytes alone: the wire format, locking-script decoding, inscription
//! envelopes, bitcom segments, market-lock listings, token-protocol
//! payloads, and the deterministic funding-key derivation. Nothing in here
//! touches storage or the network.
#![allow(clippy::unit_arg)]

pub mod bitcom;
mod cached;
mod compactint;
pub mod envelope;
pub mod funding;
mod outpoint;
mod pkhash;
pub mod ordlock;
pub mod script;
pub mod serialization;
pub mod token;
pub mod transaction;

pub use compactint::CompactInt;
pub use outpoint::Outpoint;
pub use pkhash::PKHash;
pub use script::Script;
pub use serialization::{ChainDeserialize, ChainSerialize, SerializationError};
pub use transaction::Transaction;
