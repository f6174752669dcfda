//! The transaction indexer: raw bytes in, store records out.
//!
//! For each transaction the indexer links every input to the output it
//! consumes (hydrating outputs the crawl never saw), decodes every output
//! script for inscription envelopes, market locks and token payloads, and
//! persists the lot. Output records are written in vout order so range
//! scans always observe a transaction's outputs together.

use std::sync::Arc;

use tracing::{debug, info, warn};

use ordex_chain::envelope;
use ordex_chain::funding::ExtendedPubKey;
use ordex_chain::ordlock;
use ordex_chain::token::{self, FungibleOp, IssueOp, TokenOp};
use ordex_chain::{ChainDeserialize, Outpoint, Transaction};
use ordex_state::{FungibleStore, FungibleTxo};

use crate::adapter::{with_retry, ChainAdapter, ChainEvent};
use crate::error::{AdapterError, FatalError, WorkError};
use crate::tip::{self, TipTracker};
use crate::CONFIRMATION_DEPTH;

/// Block context of a subscribed transaction.
#[derive(Clone, Debug)]
pub struct BlockRef {
    pub hash: String,
    pub height: u32,
    pub idx: u64,
}

/// Drives script decoding and token classification for every subscribed
/// transaction, and owns all writes into the store's record space.
pub struct Indexer<C> {
    store: FungibleStore,
    adapter: Arc<C>,
    master: ExtendedPubKey,
}

impl<C: ChainAdapter> Indexer<C> {
    pub fn new(store: FungibleStore, adapter: Arc<C>, master: ExtendedPubKey) -> Indexer<C> {
        Indexer {
            store,
            adapter,
            master,
        }
    }

    pub fn store(&self) -> &FungibleStore {
        &self.store
    }

    pub fn adapter(&self) -> &Arc<C> {
        &self.adapter
    }

    /// Indexes one transaction. `block` is `None` for mempool delivery.
    pub async fn index_transaction(
        &self,
        raw: &[u8],
        block: Option<&BlockRef>,
    ) -> Result<(), WorkError> {
        let tx = Transaction::chain_deserialize(raw).map_err(AdapterError::BadTransaction)?;
        let txid = tx.hash();
        let (height, idx) = match block {
            Some(block) => (block.height, block.idx),
            None => (0, 0),
        };

        // Inputs: link each spend to the output it consumes, carrying a
        // running satoshi total so downstream accounting has positions.
        if !tx.is_coinbase() {
            let mut in_acc = 0u64;
            for (vin, input) in tx.inputs.iter().enumerate() {
                let prevout = input.prevout;
                if self.store.load(&prevout)?.is_none() {
                    self.hydrate_output(&prevout).await?;
                }
                let sale = ordlock::is_sale(&input.unlock_script);
                let spent = self.store.set_spend(
                    &prevout,
                    &txid,
                    height,
                    idx,
                    vin as u32,
                    in_acc,
                    sale,
                )?;
                in_acc += spent.satoshis;
            }
        }

        // Outputs, in vout order.
        let mut out_acc = 0u64;
        for (vout, output) in tx.outputs.iter().enumerate() {
            let outpoint = Outpoint::new(txid, vout as u32);
            let mut record = FungibleTxo::new(outpoint);
            record.height = height;
            record.idx = idx;
            record.satoshis = output.satoshis;
            record.out_acc = out_acc;
            record.script = Some(output.lock_script.clone());
            record.owner = output.lock_script.p2pkh();

            let inscription = envelope::parse(&output.lock_script);
            if let Some(inscription) = &inscription {
                if record.owner.is_none() {
                    record.owner = inscription.owner;
                }
                match token::parse(inscription, &outpoint, height, &self.master) {
                    Some(TokenOp::Issue(mut issued)) => {
                        issued.height = height;
                        issued.idx = idx;
                        issued.outpoint = Some(outpoint);
                        let implied_mint = issued.op == IssueOp::DeployMint;
                        let id = issued.id;
                        let max = issued.max;
                        self.store.save_token(&issued)?;
                        info!(tick = %issued.tick_id(), op = ?issued.op, "token issued");
                        // A deploy+mint issue carries its whole supply in
                        // the same output.
                        if implied_mint {
                            record.id = id;
                            record.op = Some(FungibleOp::DeployMint);
                            record.amt = max;
                            record.implied = true;
                        }
                    }
                    Some(TokenOp::Txo(txo)) => {
                        record.ticker = txo.ticker;
                        record.id = txo.id;
                        record.op = Some(txo.op);
                        record.amt = txo.amt;
                    }
                    None => {}
                }
            }

            if let Some(mut listing) = ordlock::parse_listing(&output.lock_script) {
                if record.amt > 0 {
                    if let Some(tick) = record.tick_id() {
                        if let Some(token) = self.store.load_token(&tick)? {
                            let units =
                                record.amt as f64 / 10f64.powi(token.decimals as i32);
                            listing.price_per = listing.price as f64 / units;
                        }
                    }
                }
                record.listing = Some(listing);
            }

            self.store.put(&record)?;
            out_acc += output.satoshis;
        }

        self.store.append_tx_log(&txid, height)?;
        metrics::counter!("indexer.tx.count", 1);
        debug!(%txid, height, outputs = tx.outputs.len(), "indexed transaction");
        Ok(())
    }

    /// Synthesizes the record of an output created before the crawl
    /// started, by fetching and parsing its source transaction.
    async fn hydrate_output(&self, outpoint: &Outpoint) -> Result<FungibleTxo, WorkError> {
        let raw = with_retry(|| self.adapter.get_raw_transaction(&outpoint.txid)).await?;
        let tx = Transaction::chain_deserialize(&raw[..]).map_err(AdapterError::BadTransaction)?;

        let mut record = FungibleTxo::new(*outpoint);
        let mut out_acc = 0u64;
        for (vout, output) in tx.outputs.iter().enumerate() {
            if (vout as u32) < outpoint.vout {
                out_acc += output.satoshis;
                continue;
            }
            record.satoshis = output.satoshis;
            record.out_acc = out_acc;
            record.script = Some(output.lock_script.clone());
            record.owner = output.lock_script.p2pkh();
            break;
        }
        if record.script.is_none() {
            return Err(WorkError::Adapter(AdapterError::MissingTransaction(
                outpoint.txid,
            )));
        }

        self.store.put(&record)?;
        debug!(%outpoint, "hydrated prior output");
        Ok(record)
    }
}

/// Runs the subscription loop: deliver transactions to the indexer,
/// checkpoint progress on status 200, pause at the confirmation buffer,
/// and treat status 999 or a subscription error as fatal.
pub async fn run<C: ChainAdapter>(
    indexer: &Indexer<C>,
    tip: &TipTracker,
    topic: &str,
    from_block: u32,
    indexer_name: &str,
) -> Result<(), FatalError> {
    let mut from = from_block;
    if let Some(progress) = indexer.store().progress(indexer_name)? {
        // Resume a little behind the checkpoint so a partially indexed
        // block is re-covered; writes are idempotent.
        let resume = progress.saturating_sub(CONFIRMATION_DEPTH + 1);
        if resume > from {
            from = resume;
        }
    }

    loop {
        info!(topic, from, "subscribing to chain events");
        let mut events = indexer
            .adapter()
            .subscribe(topic, from)
            .await
            .map_err(|error| FatalError::Subscription(error.to_string()))?;

        let mut caught_up = false;
        while let Some(event) = events.recv().await {
            match event {
                ChainEvent::Status {
                    code: 200, block, ..
                } => {
                    indexer.store().set_progress(indexer_name, block)?;
                    from = block + 1;
                    if from > tip.height().saturating_sub(CONFIRMATION_DEPTH) {
                        // Caught up to the confirmation buffer; drop the
                        // subscription and wait for the chain to grow.
                        caught_up = true;
                        break;
                    }
                }
                ChainEvent::Status {
                    code: 999, message, ..
                } => {
                    warn!(%message, "subscription requested exit");
                    return Err(FatalError::RebuildRequested(message));
                }
                ChainEvent::Status { code, message, .. } => {
                    debug!(code, %message, "subscription status");
                }
                ChainEvent::Transaction {
                    raw,
                    block_hash,
                    height,
                    idx,
                } => {
                    let block = if height > 0 {
                        Some(BlockRef {
                            hash: block_hash.unwrap_or_default(),
                            height,
                            idx,
                        })
                    } else {
                        None
                    };
                    indexer.index_transaction(&raw, block.as_ref()).await?;
                }
                ChainEvent::Error { message } => {
                    return Err(FatalError::Subscription(message));
                }
            }
        }
        drop(events);

        if caught_up {
            while from > tip.height().saturating_sub(CONFIRMATION_DEPTH) {
                tokio::time::sleep(tip::REFRESH).await;
            }
        }
        // Resubscribe: either the buffer reopened or the stream closed
        // without a terminal status.
    }
}
