//! Single-stream transport: one session for the process lifetime, framed
//! as newline-delimited JSON-RPC objects over stdin/stdout.

use std::sync::Arc;

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

use crate::config::ResolvedConfig;
use crate::mcp::handlers::HandlerContext;
use crate::mcp::protocol::{parse_request, JsonRpcResponse};
use crate::session::{SessionManager, SessionStatus};

/// Runs the stdio transport to completion: creates the single session,
/// reads newline-delimited requests until EOF, then disposes the
/// session.
pub async fn run(session_manager: Arc<SessionManager>, config: ResolvedConfig) -> io::Result<()> {
    let session_id = session_manager.create_session();
    session_manager.update_status(&session_id, SessionStatus::Active);
    info!(session_id = %session_id, "stdio transport active");

    let ctx = HandlerContext {
        session_id: session_id.clone(),
        session_manager: Arc::clone(&session_manager),
        deactivate_resources: config.deactivate_resources,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let line = tokio::select! {
            result = lines.next_line() => match result {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "stdio transport read error");
                    break;
                }
            },
            _ = super::shutdown_signal() => {
                info!(session_id = %session_id, "shutdown signal received");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match parse_request(line.as_bytes()) {
            Ok(request) => crate::mcp::dispatch(&ctx, request).await,
            Err(_) => JsonRpcResponse::parse_error(),
        };

        let encoded = serde_json::to_string(&response)
            .unwrap_or_else(|_| "{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{\"code\":-32603,\"message\":\"internal error\"}}".to_string());
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!(session_id = %session_id, "stdio stream closed, disposing session");
    session_manager.dispose_session(&session_id).await;
    Ok(())
}
