//! The persisted key layout.
//!
//! Key naming is a stable contract shared with external readers of the
//! store; values are opaque per the record schemas. Everything here is a
//! pure string function so the layout is greppable in one place.

use ordex_chain::{transaction, Outpoint};

/// `FUNGIBLE:{tick}` — token document.
pub fn token(tick_id: &str) -> String {
    format!("FUNGIBLE:{}", tick_id)
}

pub const TOKEN_PREFIX: &str = "FUNGIBLE:";

/// `FTXO:{outpoint}` — per-output record document.
pub fn ftxo(outpoint: &Outpoint) -> String {
    format!("FTXO:{}", outpoint)
}

/// `FVALIDATE:{tick}:{block07}` — the validator work set for one token
/// and block, scored by transaction index. Heights are zero-padded so the
/// lexicographic key order is also the numeric block order; height 0 is
/// the mempool bucket, scanned ahead of every mined block.
pub fn validate(tick_id: &str, height: u32) -> String {
    format!("FVALIDATE:{}:{:07}", tick_id, height)
}

/// Prefix enumerating a token's pending work keys, oldest block first.
pub fn validate_prefix(tick_id: &str) -> String {
    format!("FVALIDATE:{}:", tick_id)
}

/// `FTXOSTATE:{tick}` — every output of a token, scored by the spent
/// partition, member-ordered so a txid prefix scan finds a tx's outputs.
pub fn txo_state(tick_id: &str) -> String {
    format!("FTXOSTATE:{}", tick_id)
}

/// `FADDTXO:{address}:{tick}` — outputs by owner, spent-partitioned.
pub fn address_txos(address: &str, tick_id: &str) -> String {
    format!("FADDTXO:{}:{}", address, tick_id)
}

pub fn address_txos_prefix(address: &str) -> String {
    format!("FADDTXO:{}:", address)
}

/// `FADDSPND:{address}:{tick}` — spent outputs by owner, scored by spend
/// height.
pub fn address_spends(address: &str, tick_id: &str) -> String {
    format!("FADDSPND:{}:{}", address, tick_id)
}

/// `FLIST:{tick}` — market listings scored by status and ask price.
pub fn listings(tick_id: &str) -> String {
    format!("FLIST:{}", tick_id)
}

/// `FSALE:{tick}` — sales log scored by spend height.
pub fn sales(tick_id: &str) -> String {
    format!("FSALE:{}", tick_id)
}

/// `FHOLD:{tick}` — addresses holding the token.
pub fn holders(tick_id: &str) -> String {
    format!("FHOLD:{}", tick_id)
}

/// `FSTATUS:{tick}` — outputs scored by validation status.
pub fn status(tick_id: &str) -> String {
    format!("FSTATUS:{}", tick_id)
}

/// `FTXI:{txid}:{tick}` — inputs consumed by one spending transaction,
/// scored by input position.
pub fn tx_inputs(txid: &transaction::Hash, tick_id: &str) -> String {
    format!("FTXI:{}:{}", txid, tick_id)
}

pub fn tx_inputs_prefix(txid: &transaction::Hash) -> String {
    format!("FTXI:{}:", txid)
}

/// `f:{tick}:func` — funding account document.
pub fn funds(tick_id: &str) -> String {
    format!("f:{}:func", tick_id)
}

/// `FSUPPLY` — minted supply per token.
pub const SUPPLY: &str = "FSUPPLY";

/// `TXOSTATE` — every indexed output, spent-partitioned.
pub const GLOBAL_TXO_STATE: &str = "TXOSTATE";

/// `TXLOG` — indexed transactions scored by height.
pub const TX_LOG: &str = "TXLOG";

/// `f:fund:total` — fund totals per token, for threshold-ordered listing.
pub const FUND_TOTALS: &str = "f:fund:total";

/// `PROGRESS` — per-indexer checkpoint heights.
pub const PROGRESS: &str = "PROGRESS";

/// Pub/sub channel for funding account updates.
pub const CHANNEL_TOKEN_FUNDS: &str = "tokenFunds";

/// Pub/sub channel announcing validated listings.
pub const CHANNEL_LISTINGS: &str = "bsv20listings";

/// Pub/sub channel for address-level chain events; payloads are the hex
/// pkhash of the address that changed.
pub const CHANNEL_ADDRESS_EVENTS: &str = "fundAddress";
