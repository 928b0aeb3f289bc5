use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_DEBOUNCE_SECS: u64 = 10;
pub const DEFAULT_SEPARATOR: &str = ", ";
pub const DEFAULT_FUNNEL_TTL_SECS: u64 = 43_200; // 12 h
pub const DEFAULT_STATE_TTL_SECS: u64 = 14_400; // 4 h
pub const DEFAULT_HISTORY_TTL_SECS: u64 = 14_400;
pub const DEFAULT_HISTORY_MAX_MESSAGES: usize = 8;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CLOSING_PROMPT: &str =
    "Muito obrigado! Em breve um atendente irá falar com você por aqui.";

/// Top-level config (leadbot.toml + LEADBOT_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LeadbotConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub funnel: FunnelConfig,
    /// LLM extraction fallback. Stages that declare an LLM instruction are
    /// skipped for that strategy when this is absent.
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Shared-cache lifetimes. `None` means the entry never expires on its own
/// and is only replaced by a write or removed by an admin reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub tenant_ttl_secs: Option<u64>,
    #[serde(default = "default_funnel_ttl")]
    pub funnel_ttl_secs: Option<u64>,
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: Option<u64>,
    #[serde(default = "default_history_ttl")]
    pub history_ttl_secs: u64,
    #[serde(default = "default_history_max")]
    pub history_max_messages: usize,
    /// How often the gateway purges expired entries.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tenant_ttl_secs: None,
            funnel_ttl_secs: default_funnel_ttl(),
            state_ttl_secs: default_state_ttl(),
            history_ttl_secs: DEFAULT_HISTORY_TTL_SECS,
            history_max_messages: DEFAULT_HISTORY_MAX_MESSAGES,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

/// Where in-flight message fragments are buffered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BufferBackend {
    /// Process memory only.
    #[default]
    Memory,
    /// List operations on the shared key-value cache.
    Cache,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Window used when the tenant config sets `debounce_secs = 0`.
    #[serde(default = "default_debounce_secs")]
    pub default_window_secs: u64,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub buffer: BufferBackend,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            default_window_secs: DEFAULT_DEBOUNCE_SECS,
            separator: DEFAULT_SEPARATOR.to_string(),
            buffer: BufferBackend::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelConfig {
    /// Reply used when every slot is filled and the funnel defines no
    /// `awaiting_human` stage prompt.
    #[serde(default = "default_closing_prompt")]
    pub default_closing_prompt: String,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            default_closing_prompt: DEFAULT_CLOSING_PROMPT.to_string(),
        }
    }
}

/// OpenAI-compatible chat endpoint used for LLM slot extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Model used on the last attempt.
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdminConfig {
    /// Accept `/adminresetuser` and `/adminresetclient` chat commands.
    #[serde(default)]
    pub enabled: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_funnel_ttl() -> Option<u64> {
    Some(DEFAULT_FUNNEL_TTL_SECS)
}
fn default_state_ttl() -> Option<u64> {
    Some(DEFAULT_STATE_TTL_SECS)
}
fn default_history_ttl() -> u64 {
    DEFAULT_HISTORY_TTL_SECS
}
fn default_history_max() -> usize {
    DEFAULT_HISTORY_MAX_MESSAGES
}
fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_debounce_secs() -> u64 {
    DEFAULT_DEBOUNCE_SECS
}
fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}
fn default_closing_prompt() -> String {
    DEFAULT_CLOSING_PROMPT.to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_fallback_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_attempts() -> u32 {
    3
}
fn default_max_tokens() -> u32 {
    64
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.leadbot/leadbot.db", home)
}

impl LeadbotConfig {
    /// Load config from a TOML file with LEADBOT_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `LEADBOT_CACHE__STATE_TTL_SECS=600`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: LeadbotConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("LEADBOT_").split("__"))
            .extract()
            .map_err(|e| crate::error::ConfigError::Load(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.leadbot/leadbot.toml", home)
}
