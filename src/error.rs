//! Shared error taxonomy surfaced to the handler and transport layers.

use thiserror::Error;

/// The error kinds a tool/resource handler can fail with.
///
/// Each variant maps to exactly one JSON-RPC error disposition; see the
/// transport layers for the translation into wire format.
#[derive(Debug, Error)]
pub enum AppError {
    /// Schema violation in tool arguments (mutually-exclusive fields both
    /// set, unknown control code, relative `pwd`, etc).
    #[error("validation error: {0}")]
    Validation(String),

    /// Command Normalizer refusal, or a sudo/root-privilege check tripped
    /// without the consent flag set.
    #[error("security error: {0}")]
    Security(String),

    /// An unknown `process_id` or `session_id` was referenced.
    #[error("not found: {0}")]
    NotFound(String),

    /// Spawn failed, the working directory is not a directory, or some
    /// other resource-level precondition failed.
    #[error("resource error: {0}")]
    Resource(String),

    /// JSON parse failure or a missing required header at the transport
    /// boundary.
    #[error("transport error: {0}")]
    Transport(String),

    /// Anything unexpected. Logged with context; never exposes internals
    /// to the caller beyond a generic message.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The JSON-RPC error code for this kind, per the wire protocol table.
    pub fn rpc_code(&self) -> i64 {
        match self {
            AppError::Validation(_) => -32602,
            AppError::Security(_) => -32000,
            AppError::NotFound(_) => -32001,
            AppError::Resource(_) => -32002,
            AppError::Transport(_) => -32700,
            AppError::Internal(_) => -32603,
        }
    }

    /// The HTTP status the streaming-HTTP transport should answer with.
    pub fn http_status(&self) -> axum::http::StatusCode {
        Self::http_status_for_rpc_code(self.rpc_code())
    }

    /// The HTTP status for a JSON-RPC error code, per the same mapping
    /// `http_status` uses. Lets the HTTP transport pick a status from an
    /// already-built `JsonRpcResponse` (whose error carries only the
    /// code, not the original `AppError`) without re-deriving the
    /// `AppError` that produced it.
    pub fn http_status_for_rpc_code(code: i64) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match code {
            -32602 => StatusCode::BAD_REQUEST,
            -32000 => StatusCode::FORBIDDEN,
            -32001 => StatusCode::NOT_FOUND,
            -32002 => StatusCode::UNPROCESSABLE_ENTITY,
            -32700 => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
