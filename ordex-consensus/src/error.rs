//! Error kinds of the pipeline.
//!
//! Rule violations are not errors: they become terminal `Invalid`
//! statuses with a human-readable reason on the record. Pending upstream
//! inputs are transient aborts, signalled in-band by the validator's
//! outcome types. What's left is below.

use displaydoc::Display;
use thiserror::Error;

use ordex_state::StoreError;

/// A chain-adapter call that failed after its deadline and retries.
#[derive(Debug, Display, Error)]
pub enum AdapterError {
    /// chain request timed out after {0:?}
    Timeout(std::time::Duration),
    /// chain transport failure: {0}
    Transport(String),
    /// transaction {0} not found
    MissingTransaction(ordex_chain::transaction::Hash),
    /// undecodable transaction bytes: {0}
    BadTransaction(#[from] ordex_chain::SerializationError),
}

/// An error fatal to the current work unit; the scheduler carries on
/// with other tokens.
#[derive(Debug, Display, Error)]
pub enum WorkError {
    /// store failure: {0}
    Store(#[from] StoreError),
    /// chain adapter failure: {0}
    Adapter(#[from] AdapterError),
}

/// A condition only `main` can handle: tear the process down.
#[derive(Debug, Display, Error)]
pub enum FatalError {
    /// chain subscription failed: {0}
    Subscription(String),
    /// subscription requested rebuild/exit: {0}
    RebuildRequested(String),
    /// startup misconfiguration: {0}
    Config(String),
    /// indexing failed: {0}
    Index(#[from] WorkError),
    /// store failure: {0}
    Store(#[from] StoreError),
}
