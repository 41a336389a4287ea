use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use dotenvy::dotenv;

use crate::constants::{
    DEFAULT_CLAUDE_BIN, DEFAULT_INACTIVITY_TIMEOUT_MS, DEFAULT_TOTAL_TIMEOUT_MS,
};
use crate::lifecycle::Timeouts;

/// Permission mode handed to the engine for tool execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionMode {
    /// Ask before every potentially destructive tool call
    #[default]
    Default,
    /// Auto-approve file edits
    AcceptEdits,
    /// Skip all permission checks
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(PermissionMode::Default),
            "acceptEdits" => Ok(PermissionMode::AcceptEdits),
            "bypassPermissions" => Ok(PermissionMode::BypassPermissions),
            other => Err(format!("unknown permission mode: {other}")),
        }
    }
}

/// CORS configuration mode
#[derive(Debug, Clone)]
pub enum CorsMode {
    /// Only allow localhost origins (default, for local development)
    LocalhostOnly,
    /// Allow all origins
    AllowAll,
    /// Allow specific origins (comma-separated list)
    AllowList(Vec<String>),
}

/// Process-wide settings, read once at startup and shared immutably.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub permission_mode: PermissionMode,
    /// Working directory for the engine; `None` inherits ours
    pub cwd: Option<PathBuf>,
    pub timeouts: Timeouts,
    pub claude_bin: PathBuf,
    pub cors_mode: CorsMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4096,
            debug: false,
            permission_mode: PermissionMode::Default,
            cwd: None,
            timeouts: Timeouts::default(),
            claude_bin: PathBuf::from(DEFAULT_CLAUDE_BIN),
            cors_mode: CorsMode::LocalhostOnly,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let defaults = Self::default();

        let host = env::var("CLAUDE_PROXY_HOST").unwrap_or(defaults.host);
        let port = env::var("CLAUDE_PROXY_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let debug = env::var("CLAUDE_PROXY_DEBUG")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        let permission_mode = match env::var("CLAUDE_PROXY_PERMISSION_MODE") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!("{e}; falling back to \"default\"");
                PermissionMode::Default
            }),
            Err(_) => PermissionMode::Default,
        };

        let cwd = env::var("CLAUDE_PROXY_CWD")
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let timeouts = Timeouts::from_millis(
            millis_var("CLAUDE_PROXY_TOTAL_TIMEOUT_MS", DEFAULT_TOTAL_TIMEOUT_MS),
            millis_var(
                "CLAUDE_PROXY_INACTIVITY_TIMEOUT_MS",
                DEFAULT_INACTIVITY_TIMEOUT_MS,
            ),
        );

        let claude_bin = env::var("CLAUDE_PROXY_CLAUDE_BIN")
            .ok()
            .filter(|bin| !bin.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.claude_bin);

        // CORS configuration: "localhost" (default), "*" (allow all), or comma-separated origins
        let cors_mode = match env::var("CLAUDE_PROXY_CORS_ORIGINS").as_deref() {
            Ok("*") => CorsMode::AllowAll,
            Ok(origins) if !origins.is_empty() => {
                CorsMode::AllowList(origins.split(',').map(|s| s.trim().to_string()).collect())
            }
            _ => CorsMode::LocalhostOnly,
        };

        Self {
            host,
            port,
            debug,
            permission_mode,
            cwd,
            timeouts,
            claude_bin,
            cors_mode,
        }
    }
}

pub fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn millis_var(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => ms,
            _ => {
                tracing::warn!("Ignoring invalid {name}={raw:?}, using {default}ms");
                default
            }
        },
        Err(_) => default,
    }
}
