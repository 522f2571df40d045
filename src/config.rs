//! CLI flags, config-file discovery, and the CLI > file > env > default
//! resolution order.

use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

impl TransportKind {
    fn parse(value: &str) -> Result<Self, String> {
        match value {
            "stdio" => Ok(TransportKind::Stdio),
            "http" => Ok(TransportKind::Http),
            other => Err(format!("invalid transport '{other}': expected 'stdio' or 'http'")),
        }
    }
}

/// CLI flags, parsed with `clap`'s derive macros.
#[derive(Debug, Parser)]
#[command(name = "mcp-pty", about = "MCP server exposing long-lived PTY sessions")]
pub struct Cli {
    /// Transport to serve: stdio or http.
    #[arg(short = 't', long = "transport")]
    pub transport: Option<String>,

    /// HTTP listen port (only meaningful with --transport http).
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
}

/// Recognized keys in `$XDG_CONFIG_HOME/mcp-pty/config.json` (falling
/// back to `$HOME/.config/mcp-pty/config.json`).
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, rename = "deactivateResources")]
    pub deactivate_resources: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub transport: TransportKind,
    pub port: u16,
    pub deactivate_resources: bool,
}

const DEFAULT_PORT: u16 = 6420;

fn config_file_path() -> Option<std::path::PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Some(std::path::PathBuf::from(xdg).join("mcp-pty").join("config.json"));
    }
    dirs::home_dir().map(|home| home.join(".config").join("mcp-pty").join("config.json"))
}

/// Loads the config file if present; a missing file is not an error, a
/// malformed one is logged and treated as absent.
pub fn load_file_config() -> FileConfig {
    let Some(path) = config_file_path() else {
        return FileConfig::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
            FileConfig::default()
        }),
        Err(_) => FileConfig::default(),
    }
}

fn env_flag_true(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Merges CLI, file, and environment sources in priority order, falling
/// back to built-in defaults.
pub fn resolve(cli: Cli, file: FileConfig) -> Result<ResolvedConfig, String> {
    let transport_str = cli
        .transport
        .or(file.transport)
        .unwrap_or_else(|| "stdio".to_string());
    let transport = TransportKind::parse(&transport_str)?;

    let port = cli
        .port
        .or(file.port)
        .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(DEFAULT_PORT);

    let deactivate_resources = file
        .deactivate_resources
        .unwrap_or_else(|| env_flag_true("MCP_PTY_DEACTIVATE_RESOURCES"));

    Ok(ResolvedConfig {
        transport,
        port,
        deactivate_resources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_transport_wins_over_file() {
        let cli = Cli {
            transport: Some("http".to_string()),
            port: None,
        };
        let file = FileConfig {
            transport: Some("stdio".to_string()),
            port: None,
            deactivate_resources: None,
        };
        let resolved = resolve(cli, file).unwrap();
        assert_eq!(resolved.transport, TransportKind::Http);
    }

    #[test]
    fn invalid_transport_is_rejected() {
        let cli = Cli {
            transport: Some("bogus".to_string()),
            port: None,
        };
        assert!(resolve(cli, FileConfig::default()).is_err());
    }

    #[test]
    fn default_port_is_6420_when_nothing_set() {
        std::env::remove_var("PORT");
        let resolved = resolve(Cli { transport: None, port: None }, FileConfig::default()).unwrap();
        assert_eq!(resolved.port, DEFAULT_PORT);
    }
}
