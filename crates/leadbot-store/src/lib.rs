//! Tiered config/state store: request scope → shared cache → durable store.

pub mod cache;
pub mod db;
pub mod durable;
pub mod entity;
pub mod error;
pub mod history;
pub mod scope;
pub mod tiered;

pub use cache::{KeyValueCache, MemoryCache};
pub use durable::{DurableStore, RecordKey, SqliteStore};
pub use entity::{CachePolicy, Entity, EntityKey, EntityKind};
pub use error::{Result, StoreError};
pub use history::HistoryLog;
pub use scope::RequestScope;
pub use tiered::{TieredStore, WriteMode};
