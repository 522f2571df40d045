use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_pty::config::{self, Cli, TransportKind};
use mcp_pty::session::SessionManager;
use mcp_pty::transport::{http, stdio};

#[tokio::main]
async fn main() -> ExitCode {
    mcp_pty::init_tracing();

    let cli = Cli::parse();
    let file_config = config::load_file_config();
    let resolved = match config::resolve(cli, file_config) {
        Ok(resolved) => resolved,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let session_manager = SessionManager::new();
    session_manager.start_monitoring().await;

    info!(transport = ?resolved.transport, port = resolved.port, "starting mcp-pty");

    let result = match resolved.transport {
        TransportKind::Stdio => stdio::run(session_manager.clone(), resolved).await,
        TransportKind::Http => http::run(session_manager.clone(), resolved).await,
    };

    session_manager.stop_monitoring().await;

    match result {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "server exited with error");
            ExitCode::FAILURE
        }
    }
}
