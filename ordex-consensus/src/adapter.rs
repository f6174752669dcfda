//! The chain-adapter interface the pipeline consumes.
//!
//! The concrete subscription service lives outside this workspace; the
//! pipeline sees only this trait plus the retry policy every call goes
//! through: a per-call deadline with exponential backoff, at most three
//! attempts.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use ordex_chain::{transaction, Outpoint};

use crate::error::AdapterError;

/// Deadline applied to every chain-adapter call.
pub const CALL_DEADLINE: Duration = Duration::from_secs(10);

/// Attempts per call, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// The chain tip as reported by the adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainTip {
    pub height: u32,
    pub hash: String,
}

/// Events delivered by a chain subscription.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// A control message. Code 200 marks crawl progress through `block`;
    /// code 999 is a terminal rebuild/exit request.
    Status {
        code: u32,
        message: String,
        block: u32,
    },
    /// A raw transaction, with its block context when mined.
    Transaction {
        raw: Vec<u8>,
        block_hash: Option<String>,
        height: u32,
        idx: u64,
    },
    /// The subscription failed.
    Error { message: String },
}

/// An unspent output at an address, as reported by the chain adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressUtxo {
    pub outpoint: Outpoint,
    pub satoshis: u64,
}

/// The chain services the pipeline consumes.
#[async_trait]
pub trait ChainAdapter: Send + Sync + 'static {
    async fn get_chain_tip(&self) -> Result<ChainTip, AdapterError>;

    /// Open a transaction subscription from `from_height`. Events arrive
    /// on the returned channel until the subscription ends.
    async fn subscribe(
        &self,
        topic: &str,
        from_height: u32,
    ) -> Result<mpsc::Receiver<ChainEvent>, AdapterError>;

    async fn get_raw_transaction(
        &self,
        txid: &transaction::Hash,
    ) -> Result<Vec<u8>, AdapterError>;

    async fn get_address_transactions(
        &self,
        address: &str,
        from_height: u32,
    ) -> Result<Vec<transaction::Hash>, AdapterError>;

    /// Unspent outputs currently held at `address`; the funding
    /// scheduler sums these into a token's balance.
    async fn get_address_unspent(
        &self,
        address: &str,
    ) -> Result<Vec<AddressUtxo>, AdapterError>;
}

/// Runs `call` under the standard deadline/backoff policy.
pub async fn with_retry<T, F, Fut>(mut call: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut last_error = None;

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
        match tokio::time::timeout(CALL_DEADLINE, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => {
                tracing::debug!(%error, attempt, "chain adapter call failed");
                last_error = Some(error);
            }
            Err(_) => {
                tracing::debug!(attempt, "chain adapter call timed out");
                last_error = Some(AdapterError::Timeout(CALL_DEADLINE));
            }
        }
    }

    Err(last_error.expect("at least one attempt was made"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        ordex_test::init();

        let attempts = AtomicU32::new(0);
        let result = with_retry(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(AdapterError::Transport("flaky".to_string()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        ordex_test::init();

        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = with_retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::Transport("down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
