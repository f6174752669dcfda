//! Shared test bootstrap for the ordex workspace.
//!
//! Every test calls [`init`] first, so failures come with a tracing
//! context and readable error reports regardless of which crate they run
//! in.

use std::sync::Once;

use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize tracing and error reporting for tests. Idempotent.
pub fn init() {
    INIT.call_once(|| {
        let filter_layer =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = fmt::layer().with_target(false);

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(ErrorLayer::default())
            .init();

        color_eyre::install().expect("failed to install color_eyre");
    });
}
