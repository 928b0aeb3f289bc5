//! `leadbot-core`: configuration, identifiers and shared value types used by
//! every other leadbot crate.

pub mod config;
pub mod error;
pub mod tenant;
pub mod types;

pub use config::LeadbotConfig;
pub use error::{ConfigError, Result};
pub use tenant::TenantConfig;
pub use types::{ConversationKey, HistoryEntry, Role, TenantId};
