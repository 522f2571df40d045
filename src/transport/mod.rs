//! The two transports that bind an incoming request to a session and
//! hand it to the shared MCP handler layer.

pub mod http;
pub mod stdio;

use tracing::info;

/// Waits for Ctrl+C or, on Unix, SIGTERM, whichever arrives first.
/// Shared by both transports: the HTTP transport races it once against
/// `axum::serve`'s graceful-shutdown future, the stdio transport races
/// it on every read so a signal during a live session still reaches
/// disposal instead of orphaning the PTY's child process.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C"); }
        _ = terminate => { info!("received SIGTERM"); }
    }
    info!("initiating graceful shutdown");
}
