use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use leadbot_store::{KeyValueCache, Result};

/// Storage for fragments accumulated during an open window.
///
/// The coordinator serializes `append` and `drain` for the same key, so
/// implementations need no per-key atomicity of their own.
#[async_trait]
pub trait FragmentBuffer: Send + Sync {
    async fn append(&self, key: &str, fragment: &str) -> Result<()>;

    /// Remove and return every fragment for `key` in arrival order.
    async fn drain(&self, key: &str) -> Result<Vec<String>>;
}

/// Process-local buffer.
#[derive(Default)]
pub struct MemoryBuffer {
    fragments: DashMap<String, Vec<String>>,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FragmentBuffer for MemoryBuffer {
    async fn append(&self, key: &str, fragment: &str) -> Result<()> {
        self.fragments
            .entry(key.to_string())
            .or_default()
            .push(fragment.to_string());
        Ok(())
    }

    async fn drain(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .fragments
            .remove(key)
            .map(|(_, v)| v)
            .unwrap_or_default())
    }
}

/// Buffer kept as a list on the shared cache under `debounce:{key}`, so
/// fragments survive while the window is open even if they were accepted
/// by a different worker.
pub struct CacheListBuffer {
    cache: Arc<dyn KeyValueCache>,
}

impl CacheListBuffer {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    fn list_key(key: &str) -> String {
        format!("debounce:{key}")
    }
}

#[async_trait]
impl FragmentBuffer for CacheListBuffer {
    async fn append(&self, key: &str, fragment: &str) -> Result<()> {
        self.cache.list_push(&Self::list_key(key), fragment).await?;
        Ok(())
    }

    async fn drain(&self, key: &str) -> Result<Vec<String>> {
        let list_key = Self::list_key(key);
        let fragments = self.cache.list_range(&list_key, 0, -1).await?;
        self.cache.delete(&list_key).await?;
        Ok(fragments)
    }
}
