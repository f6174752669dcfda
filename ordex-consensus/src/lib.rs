//! The indexing and validation pipeline for ordex fungible tokens.
//!
//! Components, leaves first: the [`adapter`] defines the chain interface
//! consumed everywhere; the [`tip`] tracker snapshots the chain height;
//! the [`indexer`] turns raw transactions into store records; the
//! [`validator`] settles pending records against supply and conservation
//! rules; and the [`scheduler`] meters validator work against each
//! token's funding balance.

pub mod adapter;
pub mod error;
pub mod indexer;
pub mod scheduler;
pub mod tip;
pub mod validator;

pub use adapter::{AddressUtxo, ChainAdapter, ChainEvent, ChainTip};
pub use error::{AdapterError, FatalError, WorkError};
pub use indexer::{BlockRef, Indexer};
pub use scheduler::FundingScheduler;
pub use tip::TipTracker;
pub use validator::Validator;

/// Records below `tip - CONFIRMATION_DEPTH` are final for validation;
/// anything shallower may still reorg away.
pub const CONFIRMATION_DEPTH: u32 = 5;
