//! A minimal hand-rolled JSON-RPC 2.0 envelope for the MCP dialect this
//! server speaks. The wire framing is intentionally small: just enough
//! request/response/error shape to carry the tool and resource calls in
//! §4.E, without pulling in a generic MCP SDK.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn from_app_error(id: Value, err: &AppError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcErrorObject {
                code: err.rpc_code(),
                message: err.to_string(),
                data: None,
            }),
        }
    }

    pub fn parse_error() -> Self {
        Self {
            jsonrpc: "2.0",
            id: Value::Null,
            result: None,
            error: Some(JsonRpcErrorObject {
                code: -32700,
                message: "Parse error".to_string(),
                data: None,
            }),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Value::Null,
            result: None,
            error: Some(JsonRpcErrorObject {
                code: -32600,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn session_not_found() -> Self {
        Self {
            jsonrpc: "2.0",
            id: Value::Null,
            result: None,
            error: Some(JsonRpcErrorObject {
                code: -32001,
                message: "Session not found".to_string(),
                data: None,
            }),
        }
    }
}

/// Parses a raw request body into a `JsonRpcRequest`, mapping malformed
/// JSON to the transport-level parse-error disposition (§7).
pub fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::Transport(format!("parse error: {e}")))
}
