//! Persistent state for the ordex fungible-token indexer.
//!
//! Everything the pipeline knows lives behind [`FungibleStore`]: per-output
//! records with their ordered indices, token documents, supply counters,
//! funding accounts, and the validator work sets. The store is written
//! against a small key-value contract ([`kv::Kv`]) providing JSON
//! documents, hashes, sorted sets, key scans, atomic pipelines, and
//! pub/sub; the in-memory backend here is the reference implementation and
//! the key layout is the stable part of the contract.

mod ftxo;
mod funds;
pub mod keys;
pub mod kv;
pub mod queries;
mod store;

pub use ftxo::{listing_score, spent_score, FungibleTxo, TxoStatus};
pub use funds::TokenFunds;
pub use store::FungibleStore;

use thiserror::Error;

/// Satoshis charged against a token's funding balance for each validated
/// operation.
pub const FUNGIBLE_OP_COST: i64 = 1000;

/// Funding balance at which a token is included in default listings.
pub const INCLUDE_THRESHOLD: i64 = 10_000_000;

/// A boxed error for trait-object plumbing at the service edge.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error raised by the store backend or by a malformed stored value.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A stored document failed to (de)serialize.
    #[error("stored document codec failure: {0}")]
    Codec(#[from] serde_json::Error),
    /// The backing lock was poisoned by a crashed writer.
    #[error("store lock poisoned")]
    Poisoned,
    /// A record that must exist was absent.
    #[error("missing document: {0}")]
    Missing(String),
    /// A stored value had an impossible shape.
    #[error("malformed stored value: {0}")]
    Malformed(&'static str),
}
