//! Purpose: Install the process-wide `tracing` subscriber for the bridge.
//! Exports: `init_tracing`.
//! Role: Called once by the C ABI bootstrap and by the CLI before any work.
//! Invariants: Never replaces a subscriber the host already installed.
//! Invariants: Output goes to stderr so stdout payloads stay machine-readable.
use tracing_subscriber::EnvFilter;

pub fn init_tracing(default_filter: &str) {
    let env_filter = EnvFilter::try_from_env(crate::config::ENV_LOG)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
