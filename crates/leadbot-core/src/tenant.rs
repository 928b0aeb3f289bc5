use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Debounce window applied when a tenant record does not set one.
pub const DEFAULT_TENANT_DEBOUNCE_SECS: u64 = 8;

/// Per-business settings, stored as the `config_info` JSON column of
/// `account_data`.
///
/// The messaging credentials are required: a record without them cannot
/// drive a conversation and deserialization fails, which the store reports
/// as a missing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Messaging gateway instance the tenant's number is bound to.
    pub gateway_instance_id: String,
    /// Messaging gateway API token.
    pub gateway_token: String,
    /// Vector index holding the tenant's knowledge chunks.
    #[serde(default)]
    pub search_index: String,
    /// Namespace inside `search_index`.
    #[serde(default)]
    pub search_namespace: String,
    /// Idle seconds after which buffered fragments become one turn.
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    /// When an inbound message contains this word the bot hands the
    /// conversation to a human and goes silent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_keyword: Option<String>,
}

fn default_debounce_secs() -> u64 {
    DEFAULT_TENANT_DEBOUNCE_SECS
}

impl TenantConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    /// Case-insensitive substring match against the configured stop keyword.
    /// A blank keyword never matches.
    pub fn matches_stop_keyword(&self, message: &str) -> bool {
        match self.stop_keyword.as_deref().map(str::trim) {
            Some(kw) if !kw.is_empty() => message.to_lowercase().contains(&kw.to_lowercase()),
            _ => false,
        }
    }
}
