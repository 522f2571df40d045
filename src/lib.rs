//! MCP PTY server: exposes long-lived pseudo-terminal sessions to
//! remote clients over a JSON-RPC dialect, via either a single-stream
//! (stdio) transport or a streaming-HTTP transport with session
//! recovery.

pub mod command;
pub mod config;
pub mod error;
pub mod mcp;
pub mod pty;
pub mod session;
pub mod transport;

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. Call once, before any
/// transport starts.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
