//! Tracing setup for binaries built on Shinobi.

use tracing_subscriber::EnvFilter;

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`, defaulting
/// to `info`. Does nothing if a global subscriber is already set.
///
/// `RUST_LOG=shinobi_registry=debug,shinobi_client=trace` shows every
/// relayed frame and applied batch.
pub fn init_tracing() {
    init_tracing_with("info");
}

/// Like [`init_tracing`], with a different default directive.
pub fn init_tracing_with(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
