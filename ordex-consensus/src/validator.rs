//! The supply and transfer validator.
//!
//! A state machine over pending records: `Pending → Valid` or
//! `Pending → Invalid`, terminal either way. Mints settle strictly in
//! `(height, idx)` order per token so the clamp at the supply boundary is
//! deterministic; transfers settle whole spending transactions at a time
//! so every output of a transfer shares one verdict.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, trace};

use ordex_chain::token::{FungibleOp, Token};
use ordex_chain::transaction;
use ordex_state::{FungibleStore, TxoStatus};

use crate::error::WorkError;
use crate::tip::TipTracker;
use crate::CONFIRMATION_DEPTH;

/// Outcome of one mint-shaped record.
enum MintOutcome {
    /// Too shallow under the confirmation buffer; retry next pass.
    NotReady,
    /// Reached a terminal status (and was charged for).
    Resolved,
}

/// Outcome of one spending transaction's transfer validation.
#[derive(Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// An upstream input is still pending (or a mempool balance could
    /// still settle); nothing was decided and nothing is charged.
    Aborted,
    /// The whole transaction took a verdict; the count is the number of
    /// outputs charged for.
    Resolved(usize),
}

/// Settles pending records, reading and writing through the store and
/// snapshotting the chain tip for confirmation gating.
#[derive(Clone)]
pub struct Validator {
    store: FungibleStore,
    tip: TipTracker,
}

impl Validator {
    pub fn new(store: FungibleStore, tip: TipTracker) -> Validator {
        Validator { store, tip }
    }

    /// Works through `token`'s pending set, oldest block first, ascending
    /// index within each block, stopping at `limit` charged operations.
    /// Returns the number of operations charged.
    pub fn validate_token(
        &self,
        token: &Token,
        limit: i64,
        cancel: &AtomicBool,
    ) -> Result<u64, WorkError> {
        let tick = token.tick_id();
        let mut charged: i64 = 0;
        let mut supply = self.store.supply(&tick)?;

        'blocks: for work_key in self.store.work_blocks(&tick)? {
            let mut prev_txid: Option<transaction::Hash> = None;
            for (outpoint, _idx) in self.store.work_entries(&work_key)? {
                // Mid-record work is uninterruptible; between records we
                // honor cancellation and the funding budget.
                if cancel.load(Ordering::Relaxed) || charged >= limit {
                    break 'blocks;
                }

                let record = match self.store.load(&outpoint)? {
                    Some(record) => record,
                    None => {
                        self.store.clear_work(&work_key, &outpoint)?;
                        continue;
                    }
                };

                match record.op {
                    Some(FungibleOp::Mint) | Some(FungibleOp::DeployMint) => {
                        match self.validate_mint(token, &tick, &record, &mut supply)? {
                            MintOutcome::NotReady => continue,
                            MintOutcome::Resolved => charged += 1,
                        }
                    }
                    Some(FungibleOp::Transfer) => {
                        // One settlement per spending txid per pass.
                        if prev_txid == Some(outpoint.txid) {
                            continue;
                        }
                        prev_txid = Some(outpoint.txid);
                        match self.validate_transfer(
                            &outpoint.txid,
                            &tick,
                            record.height == 0,
                        )? {
                            TransferOutcome::Aborted => continue,
                            TransferOutcome::Resolved(outputs) => charged += outputs as i64,
                        }
                    }
                    _ => {
                        // A non-token record cannot owe validation work.
                        self.store.clear_work(&work_key, &outpoint)?;
                    }
                }
            }
        }

        metrics::counter!("validator.ops.count", charged.max(0) as u64);
        Ok(charged.max(0) as u64)
    }

    /// The mint rule. An implied `deploy+mint` record is the token's
    /// supply-seeding mint and follows the same rules, per-mint limit
    /// included.
    fn validate_mint(
        &self,
        token: &Token,
        tick: &str,
        record: &ordex_state::FungibleTxo,
        supply: &mut u64,
    ) -> Result<MintOutcome, WorkError> {
        // Unconfirmed mints wait for a block; confirmed ones wait out the
        // reorg buffer.
        if record.height == 0
            || record.height > self.tip.height().saturating_sub(CONFIRMATION_DEPTH)
        {
            trace!(outpoint = %record.outpoint, "mint below confirmation buffer");
            return Ok(MintOutcome::NotReady);
        }

        if *supply >= token.max {
            let reason = format!("supply {} >= max {}", supply, token.max);
            self.store
                .set_status(&record.outpoint, TxoStatus::Invalid, Some(&reason))?;
            debug!(tick, outpoint = %record.outpoint, %reason, "mint invalid");
            return Ok(MintOutcome::Resolved);
        }

        if let Some(limit) = token.limit {
            if limit > 0 && record.amt > limit {
                let reason = format!("amt {} > limit {}", record.amt, limit);
                self.store
                    .set_status(&record.outpoint, TxoStatus::Invalid, Some(&reason))?;
                debug!(tick, outpoint = %record.outpoint, %reason, "mint invalid");
                return Ok(MintOutcome::Resolved);
            }
        }

        let headroom = token.max - *supply;
        let minted = if headroom < record.amt {
            // Clamp the boundary mint to what's left under the cap.
            let reason = format!(
                "supply {} + amt {} > max {}",
                supply, record.amt, token.max
            );
            self.store.rewrite_amt(&record.outpoint, headroom)?;
            self.store
                .set_status(&record.outpoint, TxoStatus::Valid, Some(&reason))?;
            headroom
        } else {
            self.store
                .set_status(&record.outpoint, TxoStatus::Valid, None)?;
            record.amt
        };

        *supply += minted;
        self.store.add_supply(tick, minted)?;
        info!(tick, supply = *supply, max = token.max, "validated mint");
        Ok(MintOutcome::Resolved)
    }

    /// The transfer rule, batched per spending txid: all of the token's
    /// outputs of `txid` settle together against the sum of its valid
    /// token inputs.
    pub fn validate_transfer(
        &self,
        txid: &transaction::Hash,
        tick: &str,
        is_mempool: bool,
    ) -> Result<TransferOutcome, WorkError> {
        let mut reason: Option<String> = None;
        let mut tokens_in: u64 = 0;

        for outpoint in self.store.transfer_inputs(txid, tick)? {
            let input = self
                .store
                .load(&outpoint)?
                .ok_or_else(|| ordex_state::StoreError::Missing(outpoint.to_string()))?;
            match input.status {
                TxoStatus::Invalid => reason = Some("invalid input".to_string()),
                TxoStatus::Pending => {
                    trace!(tick, %txid, "transfer inputs pending");
                    return Ok(TransferOutcome::Aborted);
                }
                TxoStatus::Valid => tokens_in += input.amt,
            }
        }

        let mut outputs = Vec::new();
        for outpoint in self.store.tx_outputs(txid, tick)? {
            let output = self
                .store
                .load(&outpoint)?
                .ok_or_else(|| ordex_state::StoreError::Missing(outpoint.to_string()))?;
            if output.status.is_terminal() {
                // The transaction was already settled by an earlier pass.
                return Ok(TransferOutcome::Resolved(0));
            }
            if reason.is_none() {
                if output.amt > tokens_in {
                    let overflow =
                        format!("insufficient balance {} < {}", tokens_in, output.amt);
                    if is_mempool {
                        // Mempool inputs may still settle in this tx's
                        // favor; don't finalize.
                        debug!(tick, %txid, %overflow, "mempool transfer abort");
                        return Ok(TransferOutcome::Aborted);
                    }
                    reason = Some(overflow);
                } else {
                    tokens_in -= output.amt;
                }
            }
            outputs.push(output);
        }

        if outputs.is_empty() {
            return Ok(TransferOutcome::Resolved(0));
        }

        match &reason {
            Some(reason) => {
                info!(tick, %txid, %reason, "transfer invalid");
                for output in &outputs {
                    self.store
                        .set_status(&output.outpoint, TxoStatus::Invalid, Some(reason))?;
                }
            }
            None => {
                info!(tick, %txid, "transfer valid");
                for output in &outputs {
                    self.store
                        .set_status(&output.outpoint, TxoStatus::Valid, None)?;
                    if output.listing.is_some() {
                        let mut settled = output.clone();
                        settled.status = TxoStatus::Valid;
                        self.store.publish_listing(&settled)?;
                    }
                }
            }
        }

        Ok(TransferOutcome::Resolved(outputs.len()))
    }
}
