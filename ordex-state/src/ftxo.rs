//! The per-output record and its index score encodings.

use serde::{Deserialize, Serialize};

use ordex_chain::ordlock::Listing;
use ordex_chain::token::FungibleOp;
use ordex_chain::{transaction, Outpoint, PKHash, Script};

/// Validation status of a fungible output.
///
/// Status only ever progresses out of `Pending`; `Valid` and `Invalid`
/// are terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxoStatus {
    Invalid,
    Pending,
    Valid,
}

impl TxoStatus {
    pub fn as_i8(self) -> i8 {
        match self {
            TxoStatus::Invalid => -1,
            TxoStatus::Pending => 0,
            TxoStatus::Valid => 1,
        }
    }

    pub fn from_i8(value: i8) -> Option<TxoStatus> {
        match value {
            -1 => Some(TxoStatus::Invalid),
            0 => Some(TxoStatus::Pending),
            1 => Some(TxoStatus::Valid),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        self != TxoStatus::Pending
    }
}

impl Default for TxoStatus {
    fn default() -> Self {
        TxoStatus::Pending
    }
}

impl Serialize for TxoStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_i8())
    }
}

impl<'de> Deserialize<'de> for TxoStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i8::deserialize(deserializer)?;
        TxoStatus::from_i8(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid status {}", value)))
    }
}

/// One record per indexed transaction output.
///
/// Plain (non-token) outputs still get a record when they are hydrated as
/// spends, so satoshi accounting works; only records with a token
/// reference participate in the token-keyed indices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FungibleTxo {
    pub outpoint: Outpoint,
    /// Block height; 0 while unconfirmed.
    #[serde(default)]
    pub height: u32,
    /// Index of the transaction within its block.
    #[serde(default)]
    pub idx: u64,
    #[serde(default)]
    pub satoshis: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
    /// Running total of satoshis in earlier outputs of the same tx.
    #[serde(rename = "outacc", default)]
    pub out_acc: u64,
    /// Running total of satoshis in earlier inputs of the spending tx,
    /// stamped when the output is consumed.
    #[serde(rename = "inacc", default)]
    pub in_acc: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<PKHash>,
    #[serde(rename = "tick", skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Outpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<FungibleOp>,
    #[serde(default)]
    pub amt: u64,
    /// The txid that consumed this output, once spent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spend: Option<transaction::Hash>,
    #[serde(rename = "spendHeight", default)]
    pub spend_height: u32,
    #[serde(rename = "spendIdx", default)]
    pub spend_idx: u64,
    /// Input position within the spending transaction.
    #[serde(default)]
    pub vin: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<Listing>,
    #[serde(default)]
    pub status: TxoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// True when synthesized from a `deploy+mint` issue rather than an
    /// explicit inscription.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub implied: bool,
}

impl FungibleTxo {
    /// An empty record for `outpoint`; the indexer fills in what it
    /// learns.
    pub fn new(outpoint: Outpoint) -> FungibleTxo {
        FungibleTxo {
            outpoint,
            height: 0,
            idx: 0,
            satoshis: 0,
            script: None,
            out_acc: 0,
            in_acc: 0,
            owner: None,
            ticker: None,
            id: None,
            op: None,
            amt: 0,
            spend: None,
            spend_height: 0,
            spend_idx: 0,
            vin: 0,
            listing: None,
            status: TxoStatus::Pending,
            reason: None,
            implied: false,
        }
    }

    /// The owning token's identity: the v2 id if present, else the v1
    /// ticker. `None` for plain outputs.
    pub fn tick_id(&self) -> Option<String> {
        if let Some(id) = &self.id {
            Some(id.to_string())
        } else {
            self.ticker.clone()
        }
    }

    pub fn is_spent(&self) -> bool {
        self.spend.is_some()
    }
}

/// Largest price-per-unit value representable in the market index
/// fraction: 16 decimal digits.
pub const MAX_SCALED_PRICE: u64 = 9_999_999_999_999_999;

/// Score for the spent-partition indices: integer part 0 (unspent) or 1
/// (spent), fractional part the height scaled to ten digits, so range
/// scans can take either partition and stay height-ordered inside it.
pub fn spent_score(spent: bool, height: u32) -> f64 {
    (spent as u8) as f64 + (height as f64) / 1e10
}

/// Score for the market index: integer part the validation status,
/// fractional part the price per unit in 8-decimal fixed point, capped at
/// 16 digits. Negative statuses sink below zero so an ascending scan from
/// 1.0 sees only valid listings, cheapest first.
pub fn listing_score(status: TxoStatus, price_per: f64) -> f64 {
    let mut scaled = (price_per * 1e8) as u64;
    if scaled > MAX_SCALED_PRICE {
        scaled = MAX_SCALED_PRICE;
    }
    let fraction = scaled as f64 / 1e16;
    match status {
        TxoStatus::Invalid => -(1.0 + fraction),
        _ => status.as_i8() as f64 + fraction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outpoint() -> Outpoint {
        "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b_0"
            .parse()
            .unwrap()
    }

    #[test]
    fn record_json_roundtrip() {
        ordex_test::init();

        let mut record = FungibleTxo::new(outpoint());
        record.height = 800_123;
        record.idx = 7;
        record.satoshis = 1;
        record.ticker = Some("FOO".to_string());
        record.op = Some(FungibleOp::Mint);
        record.amt = 50;
        record.owner = Some(PKHash([9u8; 20]));

        let json = serde_json::to_string(&record).unwrap();
        let parsed: FungibleTxo = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, record);
        assert_eq!(parsed.tick_id().as_deref(), Some("FOO"));
    }

    #[test]
    fn status_serializes_as_integer() {
        ordex_test::init();

        assert_eq!(serde_json::to_string(&TxoStatus::Invalid).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&TxoStatus::Pending).unwrap(), "0");
        assert_eq!(serde_json::to_string(&TxoStatus::Valid).unwrap(), "1");
        assert!(serde_json::from_str::<TxoStatus>("3").is_err());
    }

    #[test]
    fn spent_scores_partition() {
        ordex_test::init();

        let unspent = spent_score(false, 800_000);
        let spent = spent_score(true, 1);

        assert!(unspent < 1.0);
        assert!(spent >= 1.0);
        assert!(spent_score(false, 800_001) > unspent);
    }

    #[test]
    fn listing_scores_order_by_price_within_status() {
        ordex_test::init();

        let cheap = listing_score(TxoStatus::Valid, 0.5);
        let pricey = listing_score(TxoStatus::Valid, 2.0);
        let pending = listing_score(TxoStatus::Pending, 5.0);
        let invalid = listing_score(TxoStatus::Invalid, 0.5);

        assert!(cheap < pricey);
        assert!(pending < 1.0);
        assert!(cheap >= 1.0);
        assert!(invalid < 0.0);
    }

    #[test]
    fn listing_score_caps_at_sixteen_digits() {
        ordex_test::init();

        let capped = listing_score(TxoStatus::Valid, 1e12);
        assert_eq!(capped, 1.0 + MAX_SCALED_PRICE as f64 / 1e16);
    }
}
