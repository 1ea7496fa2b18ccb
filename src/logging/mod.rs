//! Tracing subscriber setup for the `hal-cache` binary
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the embedding application. `RUST_LOG` takes precedence over the verbosity
//! flag.

use crate::error::{Error, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "hal_cache=debug,info"
    } else {
        "info"
    }
}

/// Install a global fmt subscriber. Fails if one is already installed.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| Error::InternalError(format!("failed to install tracing subscriber: {}", e)))
}
