use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Shared key-value cache with string values, per-key TTL and list values.
///
/// List indices follow the usual convention of the shared caches this
/// models: negative indices count from the end, `-1` is the last element,
/// and ranges are inclusive.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value`. `ttl = None` keeps the entry until overwritten or
    /// deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Append to the list at `key`, creating it if needed. Returns the new
    /// length.
    async fn list_push(&self, key: &str, value: &str) -> Result<usize>;

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Keep only the elements in `[start, stop]`.
    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<()>;
}

#[derive(Debug, Clone)]
enum CacheValue {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process cache. Expired entries are dropped lazily on access and in
/// bulk by [`MemoryCache::purge_expired`].
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Slot>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        let dropped = before.saturating_sub(self.entries.len());
        if dropped > 0 {
            debug!(dropped, "purged expired cache entries");
        }
        dropped
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live(&self, key: &str) -> Option<Slot> {
        let now = Instant::now();
        let slot = self.entries.get(key)?.clone();
        if slot.is_expired(now) {
            self.entries.remove_if(key, |_, s| s.is_expired(now));
            return None;
        }
        Some(slot)
    }
}

/// Resolve an inclusive `[start, stop]` pair against a list of `len`
/// elements. Returns `None` for an empty range.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Cache(format!("wrong value type at {key}"))
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.live(key).map(|s| s.value) {
            None => Ok(None),
            Some(CacheValue::Text(v)) => Ok(Some(v)),
            Some(CacheValue::List(_)) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let slot = Slot {
            value: CacheValue::Text(value.to_string()),
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.entries.insert(key.to_string(), slot);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.live(key).is_some();
        self.entries.remove(key);
        Ok(existed)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize> {
        let now = Instant::now();
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Slot {
            value: CacheValue::List(VecDeque::new()),
            expires_at: None,
        });
        if slot.is_expired(now) {
            *slot = Slot {
                value: CacheValue::List(VecDeque::new()),
                expires_at: None,
            };
        }
        match &mut slot.value {
            CacheValue::List(items) => {
                items.push_back(value.to_string());
                Ok(items.len())
            }
            CacheValue::Text(_) => Err(wrong_type(key)),
        }
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let items = match self.live(key).map(|s| s.value) {
            None => return Ok(Vec::new()),
            Some(CacheValue::List(items)) => items,
            Some(CacheValue::Text(_)) => return Err(wrong_type(key)),
        };
        Ok(match resolve_range(items.len(), start, stop) {
            Some((a, b)) => items.range(a..=b).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let Some(mut slot) = self.entries.get_mut(key) else {
            return Ok(());
        };
        let CacheValue::List(items) = &mut slot.value else {
            return Err(wrong_type(key));
        };
        match resolve_range(items.len(), start, stop) {
            Some((a, b)) => {
                items.truncate(b + 1);
                items.drain(..a);
            }
            None => items.clear(),
        }
        let empty = items.is_empty();
        drop(slot);
        if empty {
            self.entries.remove(key);
        }
        Ok(())
    }
}
