//! The read-API surface.
//!
//! These queries back the HTTP layer, which lives outside this workspace;
//! everything here speaks store types and leaves transport concerns to
//! the caller.

use serde::Serialize;

use ordex_chain::token::Token;
use ordex_chain::{transaction, Outpoint, PKHash};

use crate::{keys, FungibleStore, FungibleTxo, StoreError, TxoStatus, INCLUDE_THRESHOLD};

/// Canonicalize a tick-or-id path parameter: outpoint-form identities
/// (64-hex txid + `_` + vout, so length ≥ 66) are lowercased, v1 tickers
/// uppercased.
pub fn normalize_tick_id(input: &str) -> String {
    if input.len() >= 66 {
        input.to_lowercase()
    } else {
        input.to_uppercase()
    }
}

/// A token plus its live funding figures.
#[derive(Clone, Debug, Serialize)]
pub struct TokenDetail {
    #[serde(flatten)]
    pub token: Token,
    #[serde(rename = "fundTotal")]
    pub fund_total: i64,
    #[serde(rename = "fundUsed")]
    pub fund_used: i64,
    #[serde(rename = "pendingOps")]
    pub pending_ops: u32,
    pub included: bool,
}

/// Confirmed/pending split of one balance figure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub confirmed: u64,
    pub pending: u64,
}

/// An address's holdings in one token.
#[derive(Clone, Debug, Serialize)]
pub struct TokenBalance {
    #[serde(rename = "tick", skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Outpoint>,
    #[serde(rename = "sym", skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(rename = "dec")]
    pub decimals: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Outpoint>,
    pub all: Balance,
    pub listed: Balance,
}

impl FungibleStore {
    /// Tokens ordered by funding total, optionally restricted to those
    /// above the inclusion threshold.
    pub fn list_tokens(
        &self,
        limit: usize,
        offset: usize,
        included_only: bool,
    ) -> Result<Vec<Token>, StoreError> {
        let min = if included_only {
            INCLUDE_THRESHOLD as f64
        } else {
            f64::NEG_INFINITY
        };
        let tick_ids =
            self.kv()
                .zrevrange_by_score(keys::FUND_TOTALS, min, f64::INFINITY, offset, limit)?;
        Ok(self
            .load_tokens(&tick_ids)?
            .into_iter()
            .flatten()
            .collect())
    }

    /// One token with live `fundTotal`/`fundUsed`/`pendingOps`.
    pub fn token_detail(&self, tick_or_id: &str) -> Result<Option<TokenDetail>, StoreError> {
        let tick = normalize_tick_id(tick_or_id);
        let token = match self.load_token(&tick)? {
            Some(token) => token,
            None => return Ok(None),
        };
        let fund_total = self.fund_total(&tick)?;
        Ok(Some(TokenDetail {
            token,
            fund_total,
            fund_used: self.fund_used(&tick)?,
            pending_ops: self.pending_ops(&tick)?,
            included: fund_total >= INCLUDE_THRESHOLD,
        }))
    }

    /// One output record by outpoint.
    pub fn txo_by_outpoint(
        &self,
        outpoint: &Outpoint,
    ) -> Result<Option<FungibleTxo>, StoreError> {
        self.load(outpoint)
    }

    /// The token outputs consumed by `txid`, across every token.
    pub fn txos_by_spending_tx(
        &self,
        txid: &transaction::Hash,
    ) -> Result<Vec<FungibleTxo>, StoreError> {
        let mut records = Vec::new();
        for key in self.kv().scan_keys(&keys::tx_inputs_prefix(txid))? {
            for (member, _) in self.kv().zscan(&key)? {
                let outpoint: Outpoint = member
                    .parse()
                    .map_err(|_| StoreError::Malformed("input member is not an outpoint"))?;
                if let Some(record) = self.load(&outpoint)? {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Per-token `{confirmed, pending} × {all, listed}` balances of an
    /// address, over its unspent outputs.
    pub fn address_balances(&self, address: &PKHash) -> Result<Vec<TokenBalance>, StoreError> {
        let address = address.address();
        let prefix = keys::address_txos_prefix(&address);
        let mut balances = Vec::new();

        for key in self.kv().scan_keys(&prefix)? {
            let tick = key[prefix.len()..].to_string();
            let token = match self.load_token(&tick)? {
                Some(token) => token,
                None => continue,
            };

            let mut all = Balance::default();
            let mut listed = Balance::default();
            for member in
                self.kv()
                    .zrange_by_score(&key, 0.0, 1.0, 0, usize::max_value())?
            {
                let outpoint: Outpoint = member
                    .parse()
                    .map_err(|_| StoreError::Malformed("address member is not an outpoint"))?;
                let record = match self.load(&outpoint)? {
                    Some(record) => record,
                    None => continue,
                };
                let bucket: fn(&mut Balance, u64) = match record.status {
                    TxoStatus::Valid => |balance, amt| balance.confirmed += amt,
                    TxoStatus::Pending => |balance, amt| balance.pending += amt,
                    TxoStatus::Invalid => continue,
                };
                bucket(&mut all, record.amt);
                if record.listing.is_some() {
                    bucket(&mut listed, record.amt);
                }
            }

            if all == Balance::default() {
                continue;
            }
            balances.push(TokenBalance {
                ticker: token.ticker,
                id: token.id,
                symbol: token.symbol,
                decimals: token.decimals,
                icon: token.icon,
                all,
                listed,
            });
        }
        Ok(balances)
    }

    /// Unspent outputs of `address` in one token.
    pub fn unspent(
        &self,
        tick_or_id: &str,
        address: &PKHash,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FungibleTxo>, StoreError> {
        let tick = normalize_tick_id(tick_or_id);
        let key = keys::address_txos(&address.address(), &tick);
        self.load_members(self.kv().zrange_by_score(&key, 0.0, 1.0, offset, limit)?)
    }

    /// Spent outputs of `address` in one token, oldest spend first.
    pub fn address_history(
        &self,
        tick_or_id: &str,
        address: &PKHash,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FungibleTxo>, StoreError> {
        let tick = normalize_tick_id(tick_or_id);
        let key = keys::address_txos(&address.address(), &tick);
        self.load_members(
            self.kv()
                .zrange_by_score(&key, 1.0, f64::INFINITY, offset, limit)?,
        )
    }

    /// Valid market asks for a token, cheapest first.
    pub fn market(
        &self,
        tick_or_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FungibleTxo>, StoreError> {
        let tick = normalize_tick_id(tick_or_id);
        self.load_members(self.kv().zrange_by_score(
            &keys::listings(&tick),
            1.0,
            f64::INFINITY,
            offset,
            limit,
        )?)
    }

    /// Completed sales for a token, most recent spend first.
    pub fn token_sales(
        &self,
        tick_or_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FungibleTxo>, StoreError> {
        let tick = normalize_tick_id(tick_or_id);
        self.load_members(self.kv().zrevrange_by_score(
            &keys::sales(&tick),
            0.0,
            f64::INFINITY,
            offset,
            limit,
        )?)
    }

    fn load_members(&self, members: Vec<String>) -> Result<Vec<FungibleTxo>, StoreError> {
        let mut records = Vec::with_capacity(members.len());
        for member in members {
            let outpoint: Outpoint = member
                .parse()
                .map_err(|_| StoreError::Malformed("index member is not an outpoint"))?;
            if let Some(record) = self.load(&outpoint)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Kv;
    use ordex_chain::ordlock::Listing;
    use ordex_chain::token::{FungibleOp, IssueOp};

    fn outpoint(n: u8, vout: u32) -> Outpoint {
        Outpoint::new(transaction::Hash([n; 32]), vout)
    }

    fn seeded_store() -> (FungibleStore, PKHash) {
        let store = FungibleStore::new(Kv::new());
        let owner = PKHash([0x11; 20]);

        let token = Token {
            height: 800_000,
            idx: 0,
            outpoint: Some(outpoint(1, 0)),
            ticker: Some("FOO".to_string()),
            id: None,
            op: IssueOp::Deploy,
            max: 1000,
            limit: None,
            decimals: 2,
            symbol: None,
            icon: None,
            contract: None,
            fund_path: "21/1/2".to_string(),
            fund_pkhash: PKHash([9u8; 20]),
        };
        store.save_token(&token).unwrap();

        let mut confirmed = FungibleTxo::new(outpoint(2, 0));
        confirmed.height = 800_001;
        confirmed.ticker = Some("FOO".to_string());
        confirmed.op = Some(FungibleOp::Mint);
        confirmed.amt = 40;
        confirmed.owner = Some(owner);
        store.put(&confirmed).unwrap();
        store
            .set_status(&outpoint(2, 0), TxoStatus::Valid, None)
            .unwrap();

        let mut pending = FungibleTxo::new(outpoint(3, 0));
        pending.height = 800_002;
        pending.ticker = Some("FOO".to_string());
        pending.op = Some(FungibleOp::Mint);
        pending.amt = 7;
        pending.owner = Some(owner);
        pending.listing = Some(Listing {
            price: 700,
            payout: vec![1, 2, 3],
            price_per: 100.0,
            sale: false,
            seller: Some(owner),
        });
        store.put(&pending).unwrap();

        (store, owner)
    }

    #[test]
    fn tick_id_normalization() {
        ordex_test::init();

        assert_eq!(normalize_tick_id("ordi"), "ORDI");
        let id = "4A5E1E4BAAB89F3A32518A88C31BC87F618F76673E2CC77AB2127B7AFDEDA33B_0";
        assert_eq!(normalize_tick_id(id), id.to_lowercase());
    }

    #[test]
    fn balances_split_confirmed_pending_and_listed() {
        ordex_test::init();

        let (store, owner) = seeded_store();
        let balances = store.address_balances(&owner).unwrap();

        assert_eq!(balances.len(), 1);
        let balance = &balances[0];
        assert_eq!(balance.ticker.as_deref(), Some("FOO"));
        assert_eq!(balance.all, Balance { confirmed: 40, pending: 7 });
        assert_eq!(balance.listed, Balance { confirmed: 0, pending: 7 });
    }

    #[test]
    fn unspent_excludes_spent_outputs() {
        ordex_test::init();

        let (store, owner) = seeded_store();
        assert_eq!(store.unspent("foo", &owner, 100, 0).unwrap().len(), 2);

        store
            .set_spend(&outpoint(2, 0), &transaction::Hash([9; 32]), 800_010, 0, 0, 0, false)
            .unwrap();

        let unspent = store.unspent("foo", &owner, 100, 0).unwrap();
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].outpoint, outpoint(3, 0));

        let history = store.address_history("foo", &owner, 100, 0).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outpoint, outpoint(2, 0));
    }

    #[test]
    fn market_lists_only_valid_listings_by_price() {
        ordex_test::init();

        let (store, _) = seeded_store();
        // pending listing is excluded
        assert!(store.market("FOO", 100, 0).unwrap().is_empty());

        store
            .set_status(&outpoint(3, 0), TxoStatus::Valid, None)
            .unwrap();
        let asks = store.market("FOO", 100, 0).unwrap();
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0].outpoint, outpoint(3, 0));
    }

    #[test]
    fn token_detail_reports_live_funding() {
        ordex_test::init();

        let (store, _) = seeded_store();
        let funds = crate::TokenFunds {
            ticker: Some("FOO".to_string()),
            id: None,
            pkhash: PKHash([9u8; 20]),
            total: INCLUDE_THRESHOLD,
            used: 0,
            pending_ops: 0,
            included: true,
        };
        store.save_funds(&funds).unwrap();

        let detail = store.token_detail("foo").unwrap().unwrap();
        assert_eq!(detail.fund_total, INCLUDE_THRESHOLD);
        assert_eq!(detail.fund_used, crate::FUNGIBLE_OP_COST);
        assert_eq!(detail.pending_ops, 1);
        assert!(detail.included);

        assert_eq!(store.list_tokens(10, 0, true).unwrap().len(), 1);
        assert!(store.token_detail("none").unwrap().is_none());
    }
}
