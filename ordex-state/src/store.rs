//! The fungible-output store: records, tokens, funding accounts, and the
//! ordered indices over all of them.
//!
//! Every mutation groups the record write and all of its index updates
//! into one pipelined submission, so a reader never observes a record
//! whose indices disagree with it. Mutations are idempotent: reapplying a
//! spend or a status patch rewrites the same members with the same scores.

use chrono::Utc;
use tracing::trace;

use ordex_chain::token::Token;
use ordex_chain::{transaction, Outpoint};

use crate::kv::{Kv, Pipeline};
use crate::{
    keys, listing_score, spent_score, FungibleTxo, StoreError, TokenFunds, TxoStatus,
    FUNGIBLE_OP_COST,
};

/// Handle to the token-indexer state; cheap to clone.
#[derive(Clone)]
pub struct FungibleStore {
    kv: Kv,
}

impl FungibleStore {
    pub fn new(kv: Kv) -> FungibleStore {
        FungibleStore { kv }
    }

    /// The underlying key-value service, for subscriptions and scans that
    /// don't warrant a dedicated method.
    pub fn kv(&self) -> &Kv {
        &self.kv
    }

    fn now() -> u32 {
        Utc::now().timestamp() as u32
    }

    // ------------------------------------------------------------------
    // Per-output records
    // ------------------------------------------------------------------

    pub fn load(&self, outpoint: &Outpoint) -> Result<Option<FungibleTxo>, StoreError> {
        self.kv.json_get(&keys::ftxo(outpoint))
    }

    pub fn load_many(
        &self,
        outpoints: &[Outpoint],
    ) -> Result<Vec<Option<FungibleTxo>>, StoreError> {
        outpoints.iter().map(|outpoint| self.load(outpoint)).collect()
    }

    /// Idempotent upsert. A new record is written in full; an existing
    /// one is patched only on the fields that are now known (height/idx,
    /// spend, listing). An initial `put` of a Pending token record
    /// registers it in the validator work set; unconfirmed records queue
    /// in the zero-height bucket until they are mined.
    pub fn put(&self, ftxo: &FungibleTxo) -> Result<(), StoreError> {
        let key = keys::ftxo(&ftxo.outpoint);
        let now = Self::now();
        self.kv.pipelined(|pipe| {
            let prior: Option<FungibleTxo> = pipe.json_get(&key)?;
            let (effective, prior_status) = match prior {
                None => {
                    pipe.json_set(&key, ftxo)?;
                    (ftxo.clone(), None)
                }
                Some(mut existing) => {
                    let prior_status = existing.status;
                    let mut patch = serde_json::Map::new();
                    if ftxo.height > 0 {
                        existing.height = ftxo.height;
                        existing.idx = ftxo.idx;
                        patch.insert("height".into(), ftxo.height.into());
                        patch.insert("idx".into(), ftxo.idx.into());
                    }
                    if let Some(spend) = &ftxo.spend {
                        existing.spend = Some(*spend);
                        existing.spend_height = ftxo.spend_height;
                        existing.spend_idx = ftxo.spend_idx;
                        existing.vin = ftxo.vin;
                        patch.insert("spend".into(), spend.to_string().into());
                        patch.insert("spendHeight".into(), ftxo.spend_height.into());
                        patch.insert("spendIdx".into(), ftxo.spend_idx.into());
                        patch.insert("vin".into(), ftxo.vin.into());
                    }
                    if let Some(listing) = &ftxo.listing {
                        existing.listing = Some(listing.clone());
                        patch.insert("listing".into(), serde_json::to_value(listing)?);
                    }
                    if !patch.is_empty() {
                        pipe.json_merge(&key, serde_json::Value::Object(patch))?;
                    }
                    (existing, Some(prior_status))
                }
            };
            Self::index_record(pipe, &effective, prior_status, now);
            Ok(())
        })?;
        metrics::counter!("store.ftxo.put.count", 1);
        Ok(())
    }

    /// Marks `outpoint` as consumed by `spend_txid`. Returns the patched
    /// record so callers can chain satoshi accounting. Idempotent under
    /// repeated application.
    #[allow(clippy::too_many_arguments)]
    pub fn set_spend(
        &self,
        outpoint: &Outpoint,
        spend_txid: &transaction::Hash,
        spend_height: u32,
        spend_idx: u64,
        vin: u32,
        in_acc: u64,
        sale: bool,
    ) -> Result<FungibleTxo, StoreError> {
        let key = keys::ftxo(outpoint);
        let now = Self::now();
        let mut updated = None;
        self.kv.pipelined(|pipe| {
            let mut record: FungibleTxo = pipe
                .json_get(&key)?
                .ok_or_else(|| StoreError::Missing(key.clone()))?;
            let prior_status = record.status;
            record.spend = Some(*spend_txid);
            record.spend_height = spend_height;
            record.spend_idx = spend_idx;
            record.vin = vin;
            record.in_acc = in_acc;

            let mut patch = serde_json::Map::new();
            patch.insert("spend".into(), spend_txid.to_string().into());
            patch.insert("spendHeight".into(), spend_height.into());
            patch.insert("spendIdx".into(), spend_idx.into());
            patch.insert("vin".into(), vin.into());
            patch.insert("inacc".into(), in_acc.into());
            if sale {
                if let Some(listing) = record.listing.as_mut() {
                    listing.sale = true;
                    patch.insert("listing".into(), serde_json::to_value(&*listing)?);
                }
            }
            pipe.json_merge(&key, serde_json::Value::Object(patch))?;

            Self::index_record(pipe, &record, Some(prior_status), now);
            updated = Some(record);
            Ok(())
        })?;
        metrics::counter!("store.ftxo.spend.count", 1);
        Ok(updated.expect("pipeline populated the record"))
    }

    /// Transitions `outpoint` to a terminal status, patching the record
    /// and every status-bearing index, and clears its work-set entry.
    pub fn set_status(
        &self,
        outpoint: &Outpoint,
        status: TxoStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let key = keys::ftxo(outpoint);
        self.kv.pipelined(|pipe| {
            let mut record: FungibleTxo = pipe
                .json_get(&key)?
                .ok_or_else(|| StoreError::Missing(key.clone()))?;
            record.status = status;
            record.reason = reason.map(String::from);

            let mut patch = serde_json::Map::new();
            patch.insert("status".into(), status.as_i8().into());
            if let Some(reason) = reason {
                patch.insert("reason".into(), reason.into());
            }
            pipe.json_merge(&key, serde_json::Value::Object(patch))?;

            let member = outpoint.to_string();
            if let Some(tick) = record.tick_id() {
                pipe.zadd(&keys::status(&tick), &member, status.as_i8() as f64);
                if let Some(listing) = &record.listing {
                    pipe.zadd(
                        &keys::listings(&tick),
                        &member,
                        listing_score(status, listing.price_per),
                    );
                }
                pipe.zrem(&keys::validate(&tick, record.height), &member);
            }
            Ok(())
        })?;
        trace!(?outpoint, status = status.as_i8(), "status transition");
        metrics::counter!("store.ftxo.status.count", 1);
        Ok(())
    }

    /// Rewrites a record's token amount; used by the supply-boundary
    /// clamp.
    pub fn rewrite_amt(&self, outpoint: &Outpoint, amt: u64) -> Result<(), StoreError> {
        self.kv
            .json_merge(&keys::ftxo(outpoint), serde_json::json!({ "amt": amt }))
    }

    /// Index maintenance shared by `put` and `set_spend`.
    fn index_record(
        pipe: &mut Pipeline<'_>,
        record: &FungibleTxo,
        prior_status: Option<TxoStatus>,
        now: u32,
    ) {
        let member = record.outpoint.to_string();
        let spent = record.is_spent();
        let score_height = if record.height > 0 { record.height } else { now };
        let score = spent_score(spent, score_height);

        if let Some(tick) = record.tick_id() {
            if let Some(spend) = &record.spend {
                pipe.zadd(&keys::tx_inputs(spend, &tick), &member, record.vin as f64);
            }

            if let Some(owner) = &record.owner {
                let address = owner.address();
                if spent {
                    pipe.zadd(
                        &keys::address_spends(&address, &tick),
                        &member,
                        record.spend_height as f64,
                    );
                }
                pipe.zadd(&keys::address_txos(&address, &tick), &member, score);
                pipe.zadd(&keys::holders(&tick), &address, 0.0);
            }

            if let Some(listing) = &record.listing {
                pipe.zadd(
                    &keys::listings(&tick),
                    &member,
                    listing_score(record.status, listing.price_per),
                );
                if listing.sale {
                    let sale_score = if record.spend_height > 0 {
                        record.spend_height as f64
                    } else {
                        now as f64
                    };
                    pipe.zadd(&keys::sales(&tick), &member, sale_score);
                }
            }

            // Pending token records are validator work; unconfirmed ones
            // queue under the zero-height bucket until they are mined.
            // Anything else must not linger in the work set.
            if record.op.is_some() {
                let work_key = keys::validate(&tick, record.height);
                let was_pending = prior_status.unwrap_or(TxoStatus::Pending) == TxoStatus::Pending;
                if record.status == TxoStatus::Pending && was_pending {
                    pipe.zadd(&work_key, &member, record.idx as f64);
                } else {
                    pipe.zrem(&work_key, &member);
                }
                if record.height > 0 {
                    // Confirmation moves the entry out of the mempool
                    // bucket.
                    pipe.zrem(&keys::validate(&tick, 0), &member);
                }
            }

            pipe.zadd(&keys::status(&tick), &member, record.status.as_i8() as f64);
            pipe.zadd(&keys::txo_state(&tick), &member, score);
        }

        pipe.zadd(keys::GLOBAL_TXO_STATE, &member, score);
    }

    // ------------------------------------------------------------------
    // Tokens and supply
    // ------------------------------------------------------------------

    /// Persists a token document. Tokens are immutable once persisted;
    /// unmined v1 deploys are not persisted at all (their ticker is only
    /// claimed on confirmation). Seeds the supply counter at zero.
    pub fn save_token(&self, token: &Token) -> Result<(), StoreError> {
        if token.height == 0 && token.id.is_none() {
            return Ok(());
        }
        let tick = token.tick_id();
        let key = keys::token(&tick);
        self.kv.pipelined(|pipe| {
            if pipe.json_get::<serde_json::Value>(&key)?.is_some() {
                return Ok(());
            }
            pipe.json_set(&key, token)?;
            if pipe.zscore(keys::SUPPLY, &tick).is_none() {
                pipe.zadd(keys::SUPPLY, &tick, 0.0);
            }
            Ok(())
        })?;
        metrics::counter!("store.token.save.count", 1);
        Ok(())
    }

    pub fn load_token(&self, tick_id: &str) -> Result<Option<Token>, StoreError> {
        self.kv.json_get(&keys::token(tick_id))
    }

    pub fn load_tokens(&self, tick_ids: &[String]) -> Result<Vec<Option<Token>>, StoreError> {
        tick_ids.iter().map(|tick| self.load_token(tick)).collect()
    }

    /// Every persisted token identity.
    pub fn token_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .kv
            .scan_keys(keys::TOKEN_PREFIX)?
            .into_iter()
            .map(|key| key[keys::TOKEN_PREFIX.len()..].to_string())
            .collect())
    }

    /// Minted-so-far supply of a token.
    pub fn supply(&self, tick_id: &str) -> Result<u64, StoreError> {
        Ok(self.kv.zscore(keys::SUPPLY, tick_id)?.unwrap_or(0.0) as u64)
    }

    /// Adds a validated mint's amount to the supply counter.
    pub fn add_supply(&self, tick_id: &str, amt: u64) -> Result<u64, StoreError> {
        Ok(self.kv.zincrby(keys::SUPPLY, amt as f64, tick_id)? as u64)
    }

    // ------------------------------------------------------------------
    // Validator work sets
    // ------------------------------------------------------------------

    /// A token's pending work keys, oldest block first.
    pub fn work_blocks(&self, tick_id: &str) -> Result<Vec<String>, StoreError> {
        self.kv.scan_keys(&keys::validate_prefix(tick_id))
    }

    /// Entries of one work key, ascending by transaction index.
    pub fn work_entries(&self, work_key: &str) -> Result<Vec<(Outpoint, u64)>, StoreError> {
        self.kv
            .zscan(work_key)?
            .into_iter()
            .map(|(member, score)| {
                member
                    .parse()
                    .map(|outpoint| (outpoint, score as u64))
                    .map_err(|_| StoreError::Malformed("work set member is not an outpoint"))
            })
            .collect()
    }

    pub fn clear_work(&self, work_key: &str, outpoint: &Outpoint) -> Result<(), StoreError> {
        self.kv.zrem(work_key, &outpoint.to_string())
    }

    // ------------------------------------------------------------------
    // Transfer lookups
    // ------------------------------------------------------------------

    /// The token inputs consumed by `txid`, in input order.
    pub fn transfer_inputs(
        &self,
        txid: &transaction::Hash,
        tick_id: &str,
    ) -> Result<Vec<Outpoint>, StoreError> {
        self.kv
            .zscan(&keys::tx_inputs(txid, tick_id))?
            .into_iter()
            .map(|(member, _)| {
                member
                    .parse()
                    .map_err(|_| StoreError::Malformed("input member is not an outpoint"))
            })
            .collect()
    }

    /// All of a token's outputs created by `txid`, in vout order.
    pub fn tx_outputs(
        &self,
        txid: &transaction::Hash,
        tick_id: &str,
    ) -> Result<Vec<Outpoint>, StoreError> {
        let min = txid.to_string();
        let max = format!("{}_a", txid);
        let mut outpoints = self
            .kv
            .zrange_by_lex(&keys::txo_state(tick_id), &min, &max)?
            .into_iter()
            .map(|member| {
                member
                    .parse::<Outpoint>()
                    .map_err(|_| StoreError::Malformed("state member is not an outpoint"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        // Lexicographic member order puts `_10` before `_2`; conservation
        // must deduct in vout order.
        outpoints.sort_by_key(|outpoint| outpoint.vout);
        Ok(outpoints)
    }

    // ------------------------------------------------------------------
    // Funding accounts
    // ------------------------------------------------------------------

    /// Persists a funding account and publishes the update. Accounts with
    /// no funds at all are not worth a document.
    pub fn save_funds(&self, funds: &TokenFunds) -> Result<(), StoreError> {
        if funds.total == 0 {
            return Ok(());
        }
        let tick = funds.tick_id();
        let payload = serde_json::to_string(funds)?;
        self.kv.pipelined(|pipe| {
            pipe.zadd(keys::FUND_TOTALS, &tick, funds.total as f64);
            pipe.json_set(&keys::funds(&tick), funds)?;
            pipe.publish(keys::CHANNEL_TOKEN_FUNDS, payload.clone());
            Ok(())
        })?;
        metrics::gauge!("store.funds.total", funds.total as f64, "tick" => tick);
        Ok(())
    }

    pub fn load_funds(&self, tick_id: &str) -> Result<Option<TokenFunds>, StoreError> {
        self.kv.json_get(&keys::funds(tick_id))
    }

    pub fn fund_total(&self, tick_id: &str) -> Result<i64, StoreError> {
        Ok(self.kv.zscore(keys::FUND_TOTALS, tick_id)?.unwrap_or(0.0) as i64)
    }

    /// Count of records still awaiting validation.
    pub fn pending_ops(&self, tick_id: &str) -> Result<u32, StoreError> {
        Ok(self.kv.zcount(&keys::status(tick_id), 0.0, 0.0)? as u32)
    }

    /// Satoshis consumed so far: one op-cost per resolved record.
    pub fn fund_used(&self, tick_id: &str) -> Result<i64, StoreError> {
        let valid = self.kv.zcount(&keys::status(tick_id), 1.0, 1.0)?;
        let invalid = self.kv.zcount(&keys::status(tick_id), -1.0, -1.0)?;
        Ok((valid + invalid) as i64 * FUNGIBLE_OP_COST)
    }

    // ------------------------------------------------------------------
    // Logs, progress, events
    // ------------------------------------------------------------------

    /// Appends `txid` to the indexed-transaction log.
    pub fn append_tx_log(&self, txid: &transaction::Hash, height: u32) -> Result<(), StoreError> {
        let score = if height > 0 { height } else { Self::now() };
        self.kv.zadd(keys::TX_LOG, &txid.to_string(), score as f64)
    }

    pub fn progress(&self, indexer: &str) -> Result<Option<u32>, StoreError> {
        Ok(self
            .kv
            .hget(keys::PROGRESS, indexer)?
            .and_then(|height| height.parse().ok()))
    }

    pub fn set_progress(&self, indexer: &str, height: u32) -> Result<(), StoreError> {
        self.kv.hset(keys::PROGRESS, indexer, &height.to_string())
    }

    /// Announces a validated listing to market subscribers.
    pub fn publish_listing(&self, record: &FungibleTxo) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        self.kv.publish(keys::CHANNEL_LISTINGS, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordex_chain::token::FungibleOp;
    use ordex_chain::PKHash;

    fn outpoint(n: u8, vout: u32) -> Outpoint {
        Outpoint::new(transaction::Hash([n; 32]), vout)
    }

    fn store() -> FungibleStore {
        FungibleStore::new(Kv::new())
    }

    fn mint_record(n: u8, vout: u32, height: u32, idx: u64) -> FungibleTxo {
        let mut record = FungibleTxo::new(outpoint(n, vout));
        record.height = height;
        record.idx = idx;
        record.ticker = Some("FOO".to_string());
        record.op = Some(FungibleOp::Mint);
        record.amt = 10;
        record.owner = Some(PKHash([n; 20]));
        record
    }

    use crate::kv::Kv;

    #[test]
    fn initial_pending_put_registers_work() {
        ordex_test::init();

        let store = store();
        store.put(&mint_record(1, 0, 800_000, 3)).unwrap();

        let blocks = store.work_blocks("FOO").unwrap();
        assert_eq!(blocks, vec![keys::validate("FOO", 800_000)]);
        let entries = store.work_entries(&blocks[0]).unwrap();
        assert_eq!(entries, vec![(outpoint(1, 0), 3)]);
        assert_eq!(store.pending_ops("FOO").unwrap(), 1);
    }

    #[test]
    fn mempool_put_queues_in_zero_bucket_until_mined() {
        ordex_test::init();

        let store = store();
        let mut record = mint_record(1, 0, 0, 0);
        record.height = 0;
        store.put(&record).unwrap();
        assert_eq!(
            store.work_blocks("FOO").unwrap(),
            vec![keys::validate("FOO", 0)]
        );

        // same record, now mined: the entry moves to its block's key
        record.height = 800_001;
        record.idx = 9;
        store.put(&record).unwrap();

        let loaded = store.load(&outpoint(1, 0)).unwrap().unwrap();
        assert_eq!(loaded.height, 800_001);
        assert_eq!(loaded.idx, 9);
        assert_eq!(
            store.work_blocks("FOO").unwrap(),
            vec![keys::validate("FOO", 800_001)]
        );
    }

    #[test]
    fn set_status_clears_work_and_moves_indices() {
        ordex_test::init();

        let store = store();
        store.put(&mint_record(1, 0, 800_000, 3)).unwrap();
        store
            .set_status(&outpoint(1, 0), TxoStatus::Valid, None)
            .unwrap();

        assert!(store
            .work_entries(&keys::validate("FOO", 800_000))
            .unwrap()
            .is_empty());
        assert_eq!(store.pending_ops("FOO").unwrap(), 0);
        assert_eq!(store.fund_used("FOO").unwrap(), FUNGIBLE_OP_COST);

        let loaded = store.load(&outpoint(1, 0)).unwrap().unwrap();
        assert_eq!(loaded.status, TxoStatus::Valid);

        // a later put must not resurrect the work entry
        store.put(&mint_record(1, 0, 800_000, 3)).unwrap();
        assert!(store
            .work_entries(&keys::validate("FOO", 800_000))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn set_spend_is_idempotent_on_indices() {
        ordex_test::init();

        let store = store();
        store.put(&mint_record(1, 0, 800_000, 3)).unwrap();

        let spender = transaction::Hash([9u8; 32]);
        store
            .set_spend(&outpoint(1, 0), &spender, 800_010, 4, 0, 0, false)
            .unwrap();
        let first_inputs = store.transfer_inputs(&spender, "FOO").unwrap();
        store
            .set_spend(&outpoint(1, 0), &spender, 800_010, 4, 0, 0, false)
            .unwrap();

        assert_eq!(store.transfer_inputs(&spender, "FOO").unwrap(), first_inputs);
        let loaded = store.load(&outpoint(1, 0)).unwrap().unwrap();
        assert_eq!(loaded.spend, Some(spender));
        assert_eq!(loaded.spend_height, 800_010);
    }

    #[test]
    fn tx_outputs_come_back_in_vout_order() {
        ordex_test::init();

        let store = store();
        for vout in &[0u32, 2, 10, 1] {
            store.put(&mint_record(7, *vout, 800_000, 1)).unwrap();
        }

        let outputs = store.tx_outputs(&transaction::Hash([7u8; 32]), "FOO").unwrap();
        let vouts: Vec<u32> = outputs.iter().map(|o| o.vout).collect();
        assert_eq!(vouts, vec![0, 1, 2, 10]);
    }

    #[test]
    fn token_save_is_write_once_and_seeds_supply() {
        ordex_test::init();

        let store = store();
        let mut token = sample_token();
        store.save_token(&token).unwrap();
        assert_eq!(store.supply("FOO").unwrap(), 0);

        token.max = 999_999;
        store.save_token(&token).unwrap();
        let loaded = store.load_token("FOO").unwrap().unwrap();
        assert_eq!(loaded.max, 100);

        assert_eq!(store.token_ids().unwrap(), vec!["FOO".to_string()]);
    }

    #[test]
    fn unmined_v1_deploy_is_not_persisted() {
        ordex_test::init();

        let store = store();
        let mut token = sample_token();
        token.height = 0;
        store.save_token(&token).unwrap();

        assert!(store.load_token("FOO").unwrap().is_none());
    }

    #[test]
    fn funds_save_publishes() {
        ordex_test::init();

        let store = store();
        let mut events = store.kv().subscribe(keys::CHANNEL_TOKEN_FUNDS);

        let funds = TokenFunds {
            ticker: Some("FOO".to_string()),
            id: None,
            pkhash: PKHash([3u8; 20]),
            total: 5000,
            used: 0,
            pending_ops: 0,
            included: false,
        };
        store.save_funds(&funds).unwrap();

        assert_eq!(store.fund_total("FOO").unwrap(), 5000);
        let event: TokenFunds =
            serde_json::from_str(&events.try_recv().unwrap()).unwrap();
        assert_eq!(event, funds);
    }

    fn sample_token() -> Token {
        use ordex_chain::token::IssueOp;
        Token {
            height: 800_000,
            idx: 0,
            outpoint: Some(outpoint(1, 0)),
            ticker: Some("FOO".to_string()),
            id: None,
            op: IssueOp::Deploy,
            max: 100,
            limit: Some(50),
            decimals: 0,
            symbol: None,
            icon: None,
            contract: None,
            fund_path: "21/1/2".to_string(),
            fund_pkhash: PKHash([8u8; 20]),
        }
    }
}
