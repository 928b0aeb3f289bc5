use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ConfigError, Result};

/// Business account identifier: the phone number the messaging gateway is
/// connected to. Every config, funnel and conversation is scoped to one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of one conversation: a tenant talking to one end user.
///
/// Format: `{tenant}:{user}`. The user part may itself contain colons, the
/// tenant part may not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub tenant: TenantId,
    /// The end user's address on the messaging network (usually a phone number).
    pub user: String,
}

impl ConversationKey {
    pub fn new(tenant: impl Into<TenantId>, user: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            user: user.into(),
        }
    }

    /// Return the canonical string form used in cache keys and log fields.
    pub fn format(&self) -> String {
        format!("{}:{}", self.tenant, self.user)
    }

    /// Parse the canonical `{tenant}:{user}` form.
    pub fn parse(s: &str) -> Result<Self> {
        let (tenant, user) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidIdentifier(format!("missing ':' separator: {s}")))?;
        if tenant.is_empty() || user.is_empty() {
            return Err(ConfigError::InvalidIdentifier(format!(
                "key components must not be empty: {s}"
            )));
        }
        Ok(Self::new(tenant, user))
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Per-turn correlation id (UUIDv7, time-sortable for log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One message of recent conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
