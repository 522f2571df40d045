//! The MCP tool/resource surface: JSON-RPC envelope, handlers, and the
//! control-code table they share.

pub mod control_codes;
pub mod handlers;
pub mod protocol;

use serde_json::{json, Value};

use crate::error::AppError;
use handlers::HandlerContext;
use protocol::{JsonRpcRequest, JsonRpcResponse};

/// Dispatches one already-parsed JSON-RPC request against a bound
/// session, returning the response envelope. Never panics on malformed
/// `params`; those surface as a `Validation`/`NotFound` error response
/// with the request's `id` preserved.
pub async fn dispatch(ctx: &HandlerContext, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.unwrap_or(Value::Null);
    match route(ctx, &request.method, request.params).await {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(err) => JsonRpcResponse::from_app_error(id, &err),
    }
}

async fn route(ctx: &HandlerContext, method: &str, params: Value) -> Result<Value, AppError> {
    match method {
        "initialize" => Ok(json!({
            "serverInfo": { "name": handlers::SERVER_NAME, "version": handlers::SERVER_VERSION },
            "capabilities": {
                "tools": {},
                "resources": if ctx.deactivate_resources { Value::Null } else { json!({}) },
            },
        })),
        "tools/list" => Ok(json!({
            "tools": ["start", "kill", "list", "read", "write_input"],
        })),
        "tools/call" => {
            let name = params
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::Validation("missing 'name'".to_string()))?
                .to_string();
            let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
            handlers::call_tool(ctx, &name, arguments).await
        }
        "resources/list" => {
            if ctx.deactivate_resources {
                return Ok(json!({ "resources": [] }));
            }
            Ok(json!({
                "resources": [
                    "pty://status",
                    "pty://processes",
                    "pty://processes/{process_id}",
                    "pty://control-codes",
                ],
            }))
        }
        "resources/read" => {
            let uri = params
                .get("uri")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::Validation("missing 'uri'".to_string()))?;
            handlers::read_resource(ctx, uri).await
        }
        other => Err(AppError::NotFound(format!("unknown method '{other}'"))),
    }
}
