//! Per-token funding accounts.

use serde::{Deserialize, Serialize};

use ordex_chain::{Outpoint, PKHash};

use crate::{FUNGIBLE_OP_COST, INCLUDE_THRESHOLD};

/// Accounting for the satoshis a token's community has staked to pay for
/// its validation work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenFunds {
    #[serde(rename = "tick", skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Outpoint>,
    #[serde(rename = "fundPKHash")]
    pub pkhash: PKHash,
    /// Satoshis held at the fund address.
    #[serde(rename = "fundTotal", default)]
    pub total: i64,
    /// Satoshis consumed by validated operations.
    #[serde(rename = "fundUsed", default)]
    pub used: i64,
    /// Records still awaiting validation.
    #[serde(rename = "pendingOps", default)]
    pub pending_ops: u32,
    /// Whether the fund clears the listing-inclusion threshold.
    #[serde(default)]
    pub included: bool,
}

impl TokenFunds {
    pub fn tick_id(&self) -> String {
        if let Some(id) = &self.id {
            id.to_string()
        } else {
            self.ticker.clone().unwrap_or_default()
        }
    }

    /// Unspent validation credit.
    pub fn balance(&self) -> i64 {
        self.total - self.used
    }

    /// Whether the balance covers at least one operation.
    pub fn can_work(&self) -> bool {
        self.balance() >= FUNGIBLE_OP_COST
    }

    /// Recomputes the inclusion flag from the current total.
    pub fn refresh_included(&mut self) {
        self.included = self.total >= INCLUDE_THRESHOLD;
    }
}
