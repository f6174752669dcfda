//! The funded-work scheduler.
//!
//! Validation is not free: each settled record costs its token
//! `FUNGIBLE_OP_COST` satoshis of funding credit. The scheduler keeps a
//! funds table per token, selects the funded ones, and dispatches bounded
//! validator workers with a per-worker budget of `balance / cost`
//! records. Funding changes arrive over pub/sub and refresh the table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ordex_state::{keys, FungibleStore, StoreError, TokenFunds, FUNGIBLE_OP_COST};

use crate::adapter::{with_retry, ChainAdapter};
use crate::error::WorkError;
use crate::validator::Validator;

/// Concurrent validation workers per pass.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Sleep between passes when no token had any work.
pub const IDLE_SLEEP: Duration = Duration::from_secs(60);

#[derive(Default)]
struct FundsTable {
    by_tick: HashMap<String, TokenFunds>,
    tick_by_pkhash: HashMap<String, String>,
}

/// Meters validator work against per-token funding balances.
pub struct FundingScheduler<C> {
    store: FungibleStore,
    adapter: Arc<C>,
    validator: Validator,
    table: Arc<Mutex<FundsTable>>,
    concurrency: usize,
    cancel: Arc<AtomicBool>,
}

impl<C> Clone for FundingScheduler<C> {
    fn clone(&self) -> Self {
        FundingScheduler {
            store: self.store.clone(),
            adapter: self.adapter.clone(),
            validator: self.validator.clone(),
            table: self.table.clone(),
            concurrency: self.concurrency,
            cancel: self.cancel.clone(),
        }
    }
}

impl<C: ChainAdapter> FundingScheduler<C> {
    pub fn new(
        store: FungibleStore,
        adapter: Arc<C>,
        validator: Validator,
        concurrency: usize,
    ) -> FundingScheduler<C> {
        FundingScheduler {
            store,
            adapter,
            validator,
            table: Arc::new(Mutex::new(FundsTable::default())),
            concurrency,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask the scheduler to stop between records/passes.
    pub fn shutdown(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Boot: build the funds table from every persisted token, refreshing
    /// balances from the chain adapter with bounded concurrency.
    pub async fn initialize(&self) -> Result<(), WorkError> {
        let tick_ids = self.store.token_ids()?;
        info!(tokens = tick_ids.len(), "initializing token funding");

        let refreshes = stream::iter(tick_ids)
            .map(|tick| async move {
                let result = self.refresh_funding(&tick).await;
                (tick, result)
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        for (tick, result) in refreshes {
            if let Err(error) = result {
                warn!(%tick, %error, "funding refresh failed at boot");
            }
        }
        Ok(())
    }

    /// Recompute one token's funding account from the chain and the
    /// store's status counts, persist + publish it, and update the table.
    pub async fn refresh_funding(&self, tick: &str) -> Result<Option<TokenFunds>, WorkError> {
        let token = match self.store.load_token(tick)? {
            Some(token) => token,
            None => return Ok(None),
        };

        let address = token.fund_pkhash.address();
        let unspent = with_retry(|| self.adapter.get_address_unspent(&address)).await?;
        let total: i64 = unspent.iter().map(|utxo| utxo.satoshis as i64).sum();

        let mut funds = TokenFunds {
            ticker: token.ticker.clone(),
            id: token.id,
            pkhash: token.fund_pkhash,
            total,
            used: self.store.fund_used(tick)?,
            pending_ops: self.store.pending_ops(tick)?,
            included: false,
        };
        funds.refresh_included();
        self.store.save_funds(&funds)?;

        self.insert(funds.clone())?;
        debug!(tick, total, used = funds.used, "funding refreshed");
        Ok(Some(funds))
    }

    fn insert(&self, funds: TokenFunds) -> Result<(), StoreError> {
        let mut table = self.table.lock().map_err(|_| StoreError::Poisoned)?;
        table
            .tick_by_pkhash
            .insert(hex::encode(funds.pkhash.0), funds.tick_id());
        table.by_tick.insert(funds.tick_id(), funds);
        Ok(())
    }

    /// Tokens currently able to pay for at least one operation.
    fn funded_snapshot(&self) -> Result<Vec<TokenFunds>, StoreError> {
        let table = self.table.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(table
            .by_tick
            .values()
            .filter(|funds| funds.can_work())
            .cloned()
            .collect())
    }

    /// One pass over every funded token. Returns whether any worker did
    /// work. A failing worker is logged and skipped; other tokens
    /// proceed.
    pub async fn process_pass(&self) -> Result<bool, WorkError> {
        let mut snapshot = self.funded_snapshot()?;
        // Deterministic dispatch order keeps logs and tests readable.
        snapshot.sort_by_key(|funds| funds.tick_id());

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = Vec::new();

        for funds in snapshot {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            let scheduler = self.clone();
            workers.push(tokio::spawn(async move {
                let _permit = permit;
                let tick = funds.tick_id();
                let ops = scheduler.work_token(&funds).await?;
                Ok::<(String, u64), WorkError>((tick, ops))
            }));
        }

        let mut did_work = false;
        for worker in workers {
            match worker.await {
                Ok(Ok((tick, ops))) => {
                    if ops > 0 {
                        did_work = true;
                        debug!(%tick, ops, "validation worker finished");
                    }
                }
                Ok(Err(error)) => warn!(%error, "validation worker failed"),
                Err(error) => warn!(%error, "validation worker panicked"),
            }
        }
        Ok(did_work)
    }

    /// Validate one token within its funding budget, then refresh its
    /// consumption counters and publish the update.
    async fn work_token(&self, funds: &TokenFunds) -> Result<u64, WorkError> {
        let tick = funds.tick_id();
        let token = match self.store.load_token(&tick)? {
            Some(token) => token,
            None => return Ok(0),
        };

        let budget = funds.balance() / FUNGIBLE_OP_COST;
        let ops = self
            .validator
            .validate_token(&token, budget, &self.cancel)?;

        if ops > 0 {
            let used = self.store.fund_used(&tick)?;
            let pending_ops = self.store.pending_ops(&tick)?;
            let updated = {
                let mut table = self.table.lock().map_err(|_| StoreError::Poisoned)?;
                match table.by_tick.get_mut(&tick) {
                    Some(entry) => {
                        entry.used = used;
                        entry.pending_ops = pending_ops;
                        Some(entry.clone())
                    }
                    None => None,
                }
            };
            if let Some(updated) = updated {
                self.store.save_funds(&updated)?;
            }
        }
        Ok(ops)
    }

    /// The selection loop: pass, and sleep when a whole pass found no
    /// work anywhere.
    pub async fn run(&self) -> Result<(), WorkError> {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Ok(());
            }
            if !self.process_pass().await? {
                debug!("no validation work; sleeping");
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }
    }

    /// Background task consuming funding updates and fund-address chain
    /// events, refreshing the table as they land.
    pub fn spawn_subscriptions(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        let mut funds_events = self.store.kv().subscribe(keys::CHANNEL_TOKEN_FUNDS);
        let mut address_events = self.store.kv().subscribe(keys::CHANNEL_ADDRESS_EVENTS);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = funds_events.recv() => match message {
                        Ok(payload) => {
                            match serde_json::from_str::<TokenFunds>(&payload) {
                                Ok(funds) => {
                                    if let Err(error) = scheduler.insert(funds) {
                                        warn!(%error, "funds table update failed");
                                    }
                                }
                                Err(error) => warn!(%error, "undecodable funds event"),
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "funds events lagged");
                        }
                        Err(_) => break,
                    },
                    message = address_events.recv() => match message {
                        Ok(pkhash_hex) => {
                            let tick = {
                                match scheduler.table.lock() {
                                    Ok(table) => table.tick_by_pkhash.get(&pkhash_hex).cloned(),
                                    Err(_) => None,
                                }
                            };
                            if let Some(tick) = tick {
                                info!(%tick, "fund address changed; refreshing");
                                if let Err(error) = scheduler.refresh_funding(&tick).await {
                                    warn!(%tick, %error, "funding refresh failed");
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "address events lagged");
                        }
                        Err(_) => break,
                    },
                }
            }
        })
    }
}
