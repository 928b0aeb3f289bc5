use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Request-local memo of loaded entities.
///
/// One scope lives for one turn. Repeated reads of the same entity within
/// the turn return the same `Arc` without touching the cache or the durable
/// store. Dropped at the end of the turn, never shared across turns.
#[derive(Default)]
pub struct RequestScope {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.entries.get(key)?.clone().downcast::<T>().ok()
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: Arc<T>) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
