use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4600;
const DEFAULT_REST_PORT: u16 = 4601;
const DEFAULT_TOKEN_TTL_SECS: u64 = 86_400;
const DEFAULT_AI_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_AI_MODEL: &str = "claude-sonnet-4-6";
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:4200";

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// WebSocket sync server port (default: 4600).
    port: Option<u16>,
    /// REST API port (default: 4601).
    rest_port: Option<u16>,
    /// Log level filter string, e.g. "debug", "info,taskhub=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json".
    log_format: Option<String>,
    /// Bind address for both servers (default: "127.0.0.1").
    bind_address: Option<String>,
    /// HS256 secret for bearer credentials. Empty string disables
    /// connection authentication (every command then fails with
    /// "authentication required"). Omit to use the generated secret file.
    jwt_secret: Option<String>,
    /// Lifetime of issued login tokens in seconds (default: 86400).
    token_ttl_secs: Option<u64>,
    /// Anthropic API key for the AI prioritization endpoints. Omit to run
    /// with the input-order fallback only.
    ai_api_key: Option<String>,
    /// Override the AI upstream base URL.
    ai_base_url: Option<String>,
    /// Model id sent to the AI upstream.
    ai_model: Option<String>,
    /// Allowed CORS origin for the REST API (default: http://localhost:4200).
    cors_origin: Option<String>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub rest_port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// "pretty" (default) | "json" (structured for log aggregators).
    pub log_format: String,
    pub bind_address: String,
    /// HS256 signing secret for connection credentials.
    /// `None` means "use the generated secret file"; resolved at startup.
    /// An explicit empty string disables authentication.
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: u64,
    /// Anthropic API key (TASKHUB_AI_KEY env var). None = fallback only.
    pub ai_api_key: Option<String>,
    pub ai_base_url: String,
    pub ai_model: String,
    pub cors_origin: String,
}

impl DaemonConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let rest_port = toml.rest_port.unwrap_or(DEFAULT_REST_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let log_format = std::env::var("TASKHUB_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let bind_address = bind_address
            .or(std::env::var("TASKHUB_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let jwt_secret = std::env::var("TASKHUB_JWT_SECRET").ok().or(toml.jwt_secret);

        let token_ttl_secs = toml.token_ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        let ai_api_key = std::env::var("TASKHUB_AI_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.ai_api_key);

        let ai_base_url = std::env::var("TASKHUB_AI_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.ai_base_url)
            .unwrap_or_else(|| DEFAULT_AI_BASE_URL.to_string());

        let ai_model = toml
            .ai_model
            .unwrap_or_else(|| DEFAULT_AI_MODEL.to_string());

        let cors_origin = toml
            .cors_origin
            .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string());

        Self {
            port,
            rest_port,
            data_dir,
            log,
            log_format,
            bind_address,
            jwt_secret,
            token_ttl_secs,
            ai_api_key,
            ai_base_url,
            ai_model,
            cors_origin,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("taskhub");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/taskhub or ~/.local/share/taskhub
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("taskhub");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("taskhub");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("taskhub");
        }
    }
    // Fallback
    PathBuf::from(".taskhub")
}
