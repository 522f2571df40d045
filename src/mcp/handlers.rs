//! Tool and resource handlers. Each receives a `HandlerContext` and pure
//! JSON arguments, and returns either a JSON result or an `AppError`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::mcp::control_codes::{CtrlCode, NamedCode};
use crate::pty::PtyOptions;
use crate::session::SessionManager;

pub const SERVER_NAME: &str = "mcp-pty";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a handler needs besides its arguments: which session it is
/// acting on, and the shared session table.
#[derive(Clone)]
pub struct HandlerContext {
    pub session_id: String,
    pub session_manager: Arc<SessionManager>,
    pub deactivate_resources: bool,
}

fn current_pty_manager(ctx: &HandlerContext) -> AppResult<Arc<crate::pty::PtyManager>> {
    ctx.session_manager
        .get_pty_manager(&ctx.session_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown session '{}'", ctx.session_id)))
}

fn touch_session(ctx: &HandlerContext) {
    ctx.session_manager.touch(&ctx.session_id);
}

// ---- start ----

#[derive(Debug, Deserialize)]
struct StartArgs {
    command: String,
    pwd: String,
}

fn expand_pwd(pwd: &str) -> AppResult<String> {
    let expanded = if pwd == "~" {
        std::env::var("HOME")
            .map_err(|_| AppError::Validation("~ requires $HOME to be set".to_string()))?
    } else if let Some(rest) = pwd.strip_prefix("~/") {
        let home = std::env::var("HOME")
            .map_err(|_| AppError::Validation("~ requires $HOME to be set".to_string()))?;
        format!("{home}/{rest}")
    } else if pwd.starts_with('/') {
        pwd.to_string()
    } else {
        return Err(AppError::Validation(format!(
            "pwd '{pwd}' must be absolute or begin with '~'"
        )));
    };

    match std::fs::metadata(&expanded) {
        Ok(meta) if meta.is_dir() => Ok(expanded),
        Ok(_) => Err(AppError::Resource(format!("'{expanded}' is not a directory"))),
        Err(e) => Err(AppError::Resource(format!(
            "cannot stat '{expanded}': {e}"
        ))),
    }
}

pub async fn start(ctx: &HandlerContext, args: Value) -> AppResult<Value> {
    let args: StartArgs = serde_json::from_value(args)
        .map_err(|e| AppError::Validation(format!("invalid start arguments: {e}")))?;
    let cwd = expand_pwd(&args.pwd)?;

    let manager = current_pty_manager(ctx)?;
    let options = PtyOptions {
        command: args.command,
        cwd: Some(cwd),
        ..Default::default()
    };
    let created = manager.create_pty(options).await?;
    ctx.session_manager.add_pty(&ctx.session_id, &created.pty_id);

    Ok(json!({
        "process_id": created.pty_id,
        "screen": created.initial_screen,
        "exit_code": created.exit_code,
    }))
}

// ---- kill ----

#[derive(Debug, Deserialize)]
struct KillArgs {
    process_id: String,
}

pub async fn kill(ctx: &HandlerContext, args: Value) -> AppResult<Value> {
    let args: KillArgs = serde_json::from_value(args)
        .map_err(|e| AppError::Validation(format!("invalid kill arguments: {e}")))?;
    let manager = current_pty_manager(ctx)?;
    let success = manager.remove_pty(&args.process_id).await;
    if success {
        ctx.session_manager
            .remove_pty(&ctx.session_id, &args.process_id);
    }
    Ok(json!({ "success": success }))
}

// ---- list ----

pub async fn list(ctx: &HandlerContext, _args: Value) -> AppResult<Value> {
    let manager = current_pty_manager(ctx)?;
    let ptys: Vec<Value> = manager
        .get_all_ptys()
        .into_iter()
        .map(|summary| {
            json!({
                "id": summary.id,
                "status": status_str(summary.status),
                "created_at": summary.created_at.to_rfc3339(),
                "last_activity": summary.last_activity.to_rfc3339(),
                "exit_code": summary.exit_code,
            })
        })
        .collect();
    Ok(json!({ "ptys": ptys }))
}

fn status_str(status: crate::pty::PtyStatus) -> &'static str {
    use crate::pty::PtyStatus::*;
    match status {
        Initializing => "initializing",
        Active => "active",
        Idle => "idle",
        Terminating => "terminating",
        Terminated => "terminated",
    }
}

// ---- read ----

#[derive(Debug, Deserialize)]
struct ReadArgs {
    process_id: String,
}

pub async fn read(ctx: &HandlerContext, args: Value) -> AppResult<Value> {
    let args: ReadArgs = serde_json::from_value(args)
        .map_err(|e| AppError::Validation(format!("invalid read arguments: {e}")))?;
    let manager = current_pty_manager(ctx)?;
    let pty = manager.get_pty_or_not_found(&args.process_id)?;
    let screen = pty.capture_buffer().join("\n").trim_end().to_string();
    Ok(json!({ "screen": screen }))
}

// ---- write_input ----

#[derive(Debug, Deserialize)]
struct WriteInputArgs {
    process_id: String,
    #[serde(default)]
    input: Option<String>,
    #[serde(default, rename = "ctrlCode")]
    ctrl_code: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default = "default_wait_ms", rename = "waitMs")]
    wait_ms: u64,
}

fn default_wait_ms() -> u64 {
    1000
}

pub async fn write_input(ctx: &HandlerContext, args: Value) -> AppResult<Value> {
    let args: WriteInputArgs = serde_json::from_value(args)
        .map_err(|e| AppError::Validation(format!("invalid write_input arguments: {e}")))?;

    let has_safe_mode = args.input.is_some() || args.ctrl_code.is_some();
    let has_raw_mode = args.data.is_some();

    if has_safe_mode && has_raw_mode {
        return Err(AppError::Validation(
            "'data' is mutually exclusive with 'input'/'ctrlCode'".to_string(),
        ));
    }
    if !has_safe_mode && !has_raw_mode {
        return Err(AppError::Validation(
            "write_input requires one of 'data', 'input', or 'ctrlCode'".to_string(),
        ));
    }
    if args.wait_ms == 0 {
        return Err(AppError::Validation(
            "'waitMs' must be a positive integer".to_string(),
        ));
    }

    let bytes = if let Some(data) = args.data {
        data.into_bytes()
    } else {
        let mut bytes = args.input.unwrap_or_default().into_bytes();
        if let Some(name) = args.ctrl_code {
            let resolved = CtrlCode::resolve(&name)?;
            bytes.extend_from_slice(resolved.as_bytes());
        }
        bytes
    };

    let manager = current_pty_manager(ctx)?;
    let pty = manager.get_pty_or_not_found(&args.process_id)?;
    let outcome = pty.write(&bytes, args.wait_ms).await?;

    let mut result = json!({
        "screen": outcome.screen,
        "cursor": { "x": outcome.cursor.x, "y": outcome.cursor.y },
        "exit_code": outcome.exit_code,
    });
    if outcome.exit_code.is_some() {
        result["warning"] = json!("process has exited");
    }
    Ok(result)
}

// ---- resources ----

pub async fn resource_status(ctx: &HandlerContext) -> AppResult<Value> {
    let sessions = ctx.session_manager.get_all_sessions();
    let mut processes = 0usize;
    for session in &sessions {
        if let Some(manager) = ctx.session_manager.get_pty_manager(&session.id) {
            processes += manager.get_all_ptys().len();
        }
    }
    Ok(json!({ "sessions": sessions.len(), "processes": processes }))
}

pub async fn resource_processes(ctx: &HandlerContext) -> AppResult<Value> {
    list(ctx, Value::Null).await.map(|v| {
        v.get("ptys")
            .cloned()
            .map(|ptys| json!({ "ptys": ptys }))
            .unwrap_or_else(|| json!({ "ptys": [] }))
    })
}

pub async fn resource_process_output(ctx: &HandlerContext, process_id: &str) -> AppResult<Value> {
    let manager = current_pty_manager(ctx)?;
    let pty = manager.get_pty_or_not_found(process_id)?;
    let output = String::from_utf8_lossy(&pty.get_output_buffer()).into_owned();
    Ok(json!({ "output": output }))
}

pub async fn resource_control_codes() -> Value {
    let codes: Vec<Value> = NamedCode::all()
        .iter()
        .map(|code| {
            json!({
                "name": format!("{code:?}"),
                "description": code.description(),
            })
        })
        .collect();
    json!({ "codes": codes })
}

/// Routes a `pty://...` resource URI to its handler.
pub async fn read_resource(ctx: &HandlerContext, uri: &str) -> AppResult<Value> {
    if ctx.deactivate_resources {
        return Err(AppError::NotFound(format!(
            "resources are deactivated; '{uri}' is not available"
        )));
    }
    touch_session(ctx);
    match uri {
        "pty://status" => resource_status(ctx).await,
        "pty://processes" => resource_processes(ctx).await,
        "pty://control-codes" => Ok(resource_control_codes().await),
        other => {
            if let Some(process_id) = other.strip_prefix("pty://processes/") {
                resource_process_output(ctx, process_id).await
            } else {
                Err(AppError::NotFound(format!("unknown resource '{uri}'")))
            }
        }
    }
}

/// Routes a `tools/call` invocation to its handler by name.
pub async fn call_tool(ctx: &HandlerContext, name: &str, args: Value) -> AppResult<Value> {
    touch_session(ctx);
    match name {
        "start" => start(ctx, args).await,
        "kill" => kill(ctx, args).await,
        "list" => list(ctx, args).await,
        "read" => read(ctx, args).await,
        "write_input" => write_input(ctx, args).await,
        other => Err(AppError::NotFound(format!("unknown tool '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> (HandlerContext, Arc<SessionManager>) {
        let manager = SessionManager::new();
        let session_id = manager.create_session();
        (
            HandlerContext {
                session_id,
                session_manager: Arc::clone(&manager),
                deactivate_resources: false,
            },
            manager,
        )
    }

    #[test]
    fn expand_pwd_rejects_relative_paths() {
        assert!(expand_pwd("relative/path").is_err());
    }

    #[test]
    fn expand_pwd_accepts_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        assert_eq!(expand_pwd(path).unwrap(), path);
    }

    #[test]
    fn expand_pwd_rejects_nonexistent_directory() {
        let err = expand_pwd("/nonexistent/definitely/missing/path").unwrap_err();
        assert!(matches!(err, AppError::Resource(_)));
    }

    #[tokio::test]
    async fn write_input_rejects_mixed_modes() {
        let (ctx, _mgr) = ctx();
        let args = json!({ "process_id": "nope", "input": "hi", "data": "bye" });
        let err = write_input(&ctx, args).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn write_input_rejects_empty_modes() {
        let (ctx, _mgr) = ctx();
        let args = json!({ "process_id": "nope" });
        let err = write_input(&ctx, args).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn read_resource_rejects_when_deactivated() {
        let (mut ctx, _mgr) = ctx();
        ctx.deactivate_resources = true;
        let err = read_resource(&ctx, "pty://status").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn resource_status_reports_zero_processes_initially() {
        let (ctx, _mgr) = ctx();
        let status = resource_status(&ctx).await.unwrap();
        assert_eq!(status["sessions"], json!(1));
        assert_eq!(status["processes"], json!(0));
    }
}
