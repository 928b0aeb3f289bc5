use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use leadbot_core::config::CacheConfig;
use leadbot_core::types::{ConversationKey, HistoryEntry};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::cache::KeyValueCache;
use crate::error::Result;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Rolling window of recent messages per conversation, kept in the shared
/// cache only.
///
/// History is advisory context for extraction, so every failure degrades
/// to an empty history rather than failing the turn.
pub struct HistoryLog {
    cache: Arc<dyn KeyValueCache>,
    max_entries: usize,
    ttl: Duration,
}

impl HistoryLog {
    pub fn new(cache: Arc<dyn KeyValueCache>, max_entries: usize, ttl: Duration) -> Self {
        Self {
            cache,
            max_entries,
            ttl,
        }
    }

    pub fn from_config(cache: Arc<dyn KeyValueCache>, cfg: &CacheConfig) -> Self {
        Self::new(
            cache,
            cfg.history_max_messages,
            Duration::from_secs(cfg.history_ttl_secs),
        )
    }

    pub fn cache_key(key: &ConversationKey) -> String {
        format!("history:{key}")
    }

    /// Recent entries, oldest first.
    pub async fn load(&self, key: &ConversationKey) -> Vec<HistoryEntry> {
        let cache_key = Self::cache_key(key);
        let raw = retry("load", &cache_key, || self.cache.get(&cache_key)).await;
        let Some(Some(raw)) = raw else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(key = %cache_key, error = %e, "unreadable history, starting empty");
                Vec::new()
            }
        }
    }

    /// Replace the stored history, keeping only the newest entries.
    pub async fn save(&self, key: &ConversationKey, entries: &[HistoryEntry]) {
        let cache_key = Self::cache_key(key);
        let start = entries.len().saturating_sub(self.max_entries);
        let json = match serde_json::to_string(&entries[start..]) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %cache_key, error = %e, "failed to serialize history");
                return;
            }
        };
        let ttl = Some(self.ttl);
        retry("save", &cache_key, || self.cache.set(&cache_key, &json, ttl)).await;
    }

    /// Append entries to the stored history and return the updated window.
    pub async fn append(
        &self,
        key: &ConversationKey,
        new_entries: impl IntoIterator<Item = HistoryEntry>,
    ) -> Vec<HistoryEntry> {
        let mut entries = self.load(key).await;
        entries.extend(new_entries);
        let start = entries.len().saturating_sub(self.max_entries);
        entries.drain(..start);
        self.save(key, &entries).await;
        entries
    }

    pub async fn clear(&self, key: &ConversationKey) -> bool {
        let cache_key = Self::cache_key(key);
        retry("clear", &cache_key, || self.cache.delete(&cache_key))
            .await
            .unwrap_or(false)
    }
}

/// Run `op` up to [`MAX_ATTEMPTS`] times with a fixed pause. `None` once
/// every attempt failed.
async fn retry<T, F, Fut>(what: &str, key: &str, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Ok(v) => {
                if attempt > 1 {
                    debug!(op = what, key, attempt, "history operation succeeded after retry");
                }
                return Some(v);
            }
            Err(e) if attempt == MAX_ATTEMPTS => {
                warn!(op = what, key, error = %e, "history operation failed, giving up");
            }
            Err(e) => {
                warn!(
                    op = what,
                    key,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    "history operation failed, retrying"
                );
                sleep(RETRY_PAUSE).await;
            }
        }
    }
    None
}
