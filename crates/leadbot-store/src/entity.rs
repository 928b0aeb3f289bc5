use std::fmt;
use std::time::Duration;

use leadbot_core::config::CacheConfig;
use leadbot_core::types::{ConversationKey, TenantId};
use leadbot_core::TenantConfig;
use serde::{de::DeserializeOwned, Serialize};

use crate::durable::RecordKey;

/// The three entity families the store knows how to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    TenantConfig,
    FunnelDefinition,
    ConversationState,
}

impl EntityKind {
    /// Prefix of the composite cache key, also the durable column name.
    pub fn field(&self) -> &'static str {
        match self {
            Self::TenantConfig => "config_info",
            Self::FunnelDefinition => "funnel_info",
            Self::ConversationState => "user_info",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::TenantConfig | Self::FunnelDefinition => "account_data",
            Self::ConversationState => "user_data",
        }
    }

    /// Composite cache key: `{field}:{key}`.
    pub fn cache_key(&self, key: &EntityKey) -> String {
        format!("{}:{}", self.field(), key)
    }

    /// Whether `key` has the shape this kind is addressed by.
    pub fn accepts(&self, key: &EntityKey) -> bool {
        matches!(
            (self, key),
            (Self::TenantConfig | Self::FunnelDefinition, EntityKey::Tenant(_))
                | (Self::ConversationState, EntityKey::Conversation(_))
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// Address of one entity: a tenant, or a conversation inside a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Tenant(TenantId),
    Conversation(ConversationKey),
}

impl EntityKey {
    /// Durable filter columns for this key.
    pub fn record_key(&self) -> RecordKey {
        match self {
            Self::Tenant(t) => RecordKey::new().with("tenant_id", t.as_str()),
            Self::Conversation(c) => RecordKey::new()
                .with("tenant_id", c.tenant.as_str())
                .with("user_id", &c.user),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tenant(t) => write!(f, "{t}"),
            Self::Conversation(c) => write!(f, "{c}"),
        }
    }
}

impl From<&TenantId> for EntityKey {
    fn from(t: &TenantId) -> Self {
        Self::Tenant(t.clone())
    }
}

impl From<&ConversationKey> for EntityKey {
    fn from(c: &ConversationKey) -> Self {
        Self::Conversation(c.clone())
    }
}

/// A value the tiered store can load and persist.
///
/// `Seed` is the context needed to synthesize or reconcile the value on
/// load; tenant-scoped entities need none.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    type Seed: Sync + ?Sized;

    /// Value to use when the durable store has no record (or cannot be
    /// reached). `None` makes absence fatal.
    fn synthesize(_seed: &Self::Seed) -> Option<Self> {
        None
    }

    /// Bring a loaded value in line with the current seed. Runs on every
    /// cache or durable load, never on request-local hits.
    fn reconcile(self, _seed: &Self::Seed) -> Self {
        self
    }
}

impl Entity for TenantConfig {
    const KIND: EntityKind = EntityKind::TenantConfig;
    type Seed = ();
}

/// Shared-cache lifetime per entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub tenant: Option<Duration>,
    pub funnel: Option<Duration>,
    pub state: Option<Duration>,
}

impl CachePolicy {
    pub fn ttl_for(&self, kind: EntityKind) -> Option<Duration> {
        match kind {
            EntityKind::TenantConfig => self.tenant,
            EntityKind::FunnelDefinition => self.funnel,
            EntityKind::ConversationState => self.state,
        }
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(cfg: &CacheConfig) -> Self {
        Self {
            tenant: cfg.tenant_ttl_secs.map(Duration::from_secs),
            funnel: cfg.funnel_ttl_secs.map(Duration::from_secs),
            state: cfg.state_ttl_secs.map(Duration::from_secs),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}
