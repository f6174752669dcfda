//! Token-protocol payload recognition.
//!
//! An inscription whose content is a bsv-20 JSON document becomes either a
//! token issue (`deploy`, `deploy+mint`) or a token output (`mint`,
//! `transfer`). Everything else — bad JSON, missing amounts, oversized
//! tickers — is simply not a token output; no record is emitted.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::Inscription;
use crate::funding::{self, ExtendedPubKey};
use crate::{Outpoint, PKHash};

/// Height below which `text/plain` inscriptions are still admitted as
/// token payloads. Before this activation the protocol had no dedicated
/// content type.
pub const LEGACY_TEXT_PLAIN_CUTOFF: u32 = 793_000;

/// Maximum v1 ticker length, in unicode characters.
pub const MAX_TICKER_CHARS: usize = 4;

const PROTOCOL: &str = "bsv-20";

/// The issuing operation of a token.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueOp {
    #[serde(rename = "deploy")]
    Deploy,
    #[serde(rename = "deploy+mint")]
    DeployMint,
}

/// The operation carried by a fungible output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FungibleOp {
    /// The implied output synthesized from a `deploy+mint` issue.
    #[serde(rename = "deploy+mint")]
    DeployMint,
    #[serde(rename = "mint")]
    Mint,
    #[serde(rename = "transfer")]
    Transfer,
}

impl fmt::Display for FungibleOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FungibleOp::DeployMint => f.write_str("deploy+mint"),
            FungibleOp::Mint => f.write_str("mint"),
            FungibleOp::Transfer => f.write_str("transfer"),
        }
    }
}

/// A deployed token. Immutable once persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub idx: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outpoint: Option<Outpoint>,
    #[serde(rename = "tick", skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Outpoint>,
    pub op: IssueOp,
    pub max: u64,
    #[serde(rename = "lim", skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(rename = "dec", default)]
    pub decimals: u8,
    #[serde(rename = "sym", skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Outpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    #[serde(rename = "fundPath")]
    pub fund_path: String,
    #[serde(rename = "fundPKHash")]
    pub fund_pkhash: PKHash,
}

impl Token {
    /// The canonical identity: the deploy outpoint for v2 tokens, the
    /// uppercased ticker for v1.
    pub fn tick_id(&self) -> String {
        if let Some(id) = &self.id {
            id.to_string()
        } else {
            self.ticker.clone().unwrap_or_default()
        }
    }
}

/// A parsed `mint` or `transfer` payload, before it is joined with its
/// output's satoshis, script, and owner.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenTxo {
    pub ticker: Option<String>,
    pub id: Option<Outpoint>,
    pub op: FungibleOp,
    pub amt: u64,
}

/// The two shapes a token payload can take. A `deploy+mint` issue also
/// implies a fungible output carrying the entire supply; the indexer
/// synthesizes that record explicitly.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenOp {
    Issue(Token),
    Txo(TokenTxo),
}

/// Classifies the inscription at `outpoint` as a token payload.
pub fn parse(
    inscription: &Inscription,
    outpoint: &Outpoint,
    height: u32,
    master: &ExtendedPubKey,
) -> Option<TokenOp> {
    let mime = inscription.file.content_type.to_lowercase();
    let legacy = height > 0 && height < LEGACY_TEXT_PLAIN_CUTOFF && mime.starts_with("text/plain");
    if !mime.starts_with("application/bsv-20") && !legacy {
        return None;
    }

    let data: HashMap<String, String> =
        serde_json::from_slice(&inscription.file.content).ok()?;
    if data.get("p").map(String::as_str) != Some(PROTOCOL) {
        return None;
    }
    let op = data.get("op")?.as_str();

    let mut ticker = None;
    let mut id = None;
    if let Some(val) = data.get("id") {
        id = Some(val.parse::<Outpoint>().ok()?);
    } else if let Some(val) = data.get("tick") {
        let val = val.to_uppercase();
        if val.chars().count() > MAX_TICKER_CHARS {
            return None;
        }
        ticker = Some(val);
    } else if op == "deploy+mint" {
        id = Some(*outpoint);
    } else {
        return None;
    }

    match op {
        "deploy" | "deploy+mint" => {
            let issue_op = if op == "deploy" {
                IssueOp::Deploy
            } else {
                IssueOp::DeployMint
            };

            // v1 deploys cap supply with `max`; v2 single-issue tokens
            // carry the whole supply in `amt`.
            let max_field = match issue_op {
                IssueOp::Deploy => data.get("max"),
                IssueOp::DeployMint => data.get("amt"),
            };
            let max = parse_amount(max_field?)?;

            let limit = match data.get("lim") {
                Some(val) => Some(val.parse::<u64>().ok()?),
                None => None,
            };

            let decimals = match data.get("dec") {
                Some(val) => {
                    let dec = val.parse::<u8>().ok()?;
                    if dec > 18 {
                        return None;
                    }
                    dec
                }
                None => 0,
            };

            let symbol = match issue_op {
                IssueOp::DeployMint => data.get("sym").cloned(),
                IssueOp::Deploy => None,
            };

            let icon = data.get("icon").and_then(|val| {
                if val.starts_with('_') {
                    format!("{}{}", outpoint.txid, val).parse().ok()
                } else {
                    val.parse().ok()
                }
            });

            let tick_id = match &id {
                Some(id) => id.to_string(),
                None => ticker.clone()?,
            };
            let fund = funding::fund_derivation(master, &tick_id).ok()?;

            Some(TokenOp::Issue(Token {
                height: 0,
                idx: 0,
                outpoint: None,
                ticker,
                id,
                op: issue_op,
                max,
                limit,
                decimals,
                symbol,
                icon,
                contract: data.get("contract").cloned(),
                fund_path: fund.path,
                fund_pkhash: fund.pkhash,
            }))
        }
        "mint" => {
            // v2 tokens issue their entire supply at deploy; mint is a
            // v1-only operation.
            ticker.as_ref()?;
            Some(TokenOp::Txo(TokenTxo {
                ticker,
                id: None,
                op: FungibleOp::Mint,
                amt: parse_amount(data.get("amt")?)?,
            }))
        }
        "transfer" => Some(TokenOp::Txo(TokenTxo {
            ticker,
            id,
            op: FungibleOp::Transfer,
            amt: parse_amount(data.get("amt")?)?,
        })),
        _ => None,
    }
}

fn parse_amount(val: &str) -> Option<u64> {
    match val.parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(amt) => Some(amt),
    }
}
