//! Chain-tip tracking.
//!
//! One background task polls the adapter and publishes through a watch
//! channel; the validator reads a snapshot. Staleness up to the refresh
//! interval is fine because confirmation decisions sit behind a
//! five-block buffer anyway.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapter::{with_retry, ChainAdapter, ChainTip};
use crate::error::AdapterError;

/// How often the tip is re-read from the chain adapter.
pub const REFRESH: Duration = Duration::from_secs(15);

/// A read handle on the current chain tip.
#[derive(Clone)]
pub struct TipTracker {
    receiver: watch::Receiver<ChainTip>,
}

impl TipTracker {
    /// Reads the initial tip, then spawns the refresh task.
    pub async fn spawn<C: ChainAdapter>(
        adapter: Arc<C>,
    ) -> Result<(TipTracker, JoinHandle<()>), AdapterError> {
        let initial = with_retry(|| adapter.get_chain_tip()).await?;
        let (sender, receiver) = watch::channel(initial);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH);
            interval.tick().await;
            loop {
                interval.tick().await;
                match with_retry(|| adapter.get_chain_tip()).await {
                    Ok(tip) => {
                        if sender.send(tip).is_err() {
                            break;
                        }
                    }
                    Err(error) => tracing::warn!(%error, "chain tip refresh failed"),
                }
            }
        });

        Ok((TipTracker { receiver }, handle))
    }

    /// A tracker pinned to a fixed height, for tests and replay runs.
    pub fn fixed(height: u32) -> TipTracker {
        let (_sender, receiver) = watch::channel(ChainTip {
            height,
            hash: String::new(),
        });
        TipTracker { receiver }
    }

    /// The latest observed chain height.
    pub fn height(&self) -> u32 {
        self.receiver.borrow().height
    }
}
