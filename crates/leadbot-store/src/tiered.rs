use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::cache::KeyValueCache;
use crate::durable::DurableStore;
use crate::entity::{CachePolicy, Entity, EntityKey, EntityKind};
use crate::error::{Result, StoreError};
use crate::scope::RequestScope;

/// How `put` treats the durable write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Await the upsert and return its error.
    Blocking,
    /// Spawn the upsert; failures are logged only.
    Background,
}

/// Read-through / write-through accessor over three tiers: the request
/// scope, the shared cache and the durable store.
pub struct TieredStore {
    cache: Arc<dyn KeyValueCache>,
    durable: Arc<dyn DurableStore>,
    policy: CachePolicy,
}

impl TieredStore {
    pub fn new(
        cache: Arc<dyn KeyValueCache>,
        durable: Arc<dyn DurableStore>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            cache,
            durable,
            policy,
        }
    }

    pub fn cache(&self) -> &Arc<dyn KeyValueCache> {
        &self.cache
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Load an entity, consulting the request scope, then the shared cache,
    /// then the durable store.
    ///
    /// Values loaded from the cache or the durable store pass through
    /// [`Entity::reconcile`]. A value already attached to `scope` is returned
    /// as is.
    #[instrument(skip(self, scope, seed), fields(kind = %E::KIND, key = %key))]
    pub async fn get<E: Entity>(
        &self,
        scope: &mut RequestScope,
        key: &EntityKey,
        seed: &E::Seed,
    ) -> Result<Arc<E>> {
        let cache_key = checked_cache_key(E::KIND, key)?;

        if let Some(hit) = scope.get::<E>(&cache_key) {
            return Ok(hit);
        }

        if let Some(entity) = self.read_cache::<E>(&cache_key).await {
            debug!("cache hit");
            let entity = Arc::new(entity.reconcile(seed));
            scope.insert(cache_key, entity.clone());
            return Ok(entity);
        }

        let entity = self.read_durable::<E>(key, seed).await?;
        self.write_cache(&cache_key, &entity).await;
        let entity = Arc::new(entity);
        scope.insert(cache_key, entity.clone());
        Ok(entity)
    }

    /// Store an entity in the scope and the cache, then persist it.
    ///
    /// Cache failures are logged and never fail the call. With
    /// [`WriteMode::Background`] the returned handle can be awaited to
    /// observe completion of the durable write.
    #[instrument(skip(self, scope, entity), fields(kind = %E::KIND, key = %key))]
    pub async fn put<E: Entity>(
        &self,
        scope: &mut RequestScope,
        key: &EntityKey,
        entity: E,
        mode: WriteMode,
    ) -> Result<Option<JoinHandle<()>>> {
        let cache_key = checked_cache_key(E::KIND, key)?;
        let json = serde_json::to_string(&entity)?;

        self.write_cache_raw(E::KIND, &cache_key, &json).await;
        scope.insert(cache_key, Arc::new(entity));

        let kind = E::KIND;
        let record = key.record_key();
        match mode {
            WriteMode::Blocking => {
                self.durable
                    .upsert(kind.table(), kind.field(), &record, &json)
                    .await?;
                Ok(None)
            }
            WriteMode::Background => {
                let durable = self.durable.clone();
                let handle = tokio::spawn(async move {
                    if let Err(e) = durable
                        .upsert(kind.table(), kind.field(), &record, &json)
                        .await
                    {
                        warn!(
                            kind = %kind,
                            key = %record,
                            error = %e,
                            "background durable write failed"
                        );
                    }
                });
                Ok(Some(handle))
            }
        }
    }

    /// Drop the cached copy so the next read goes to the durable store.
    /// Returns whether an entry was removed.
    pub async fn invalidate(&self, kind: EntityKind, key: &EntityKey) -> Result<bool> {
        let cache_key = checked_cache_key(kind, key)?;
        let removed = self.cache.delete(&cache_key).await?;
        debug!(kind = %kind, key = %key, removed, "cache entry invalidated");
        Ok(removed)
    }

    /// Remove the cached copy and delete the durable record for `key`.
    ///
    /// The durable delete removes the whole row, so for tenant kinds it also
    /// drops the other column stored alongside.
    pub async fn purge(&self, kind: EntityKind, key: &EntityKey) -> Result<usize> {
        self.invalidate(kind, key).await?;
        let rows = self.durable.delete(kind.table(), &key.record_key()).await?;
        debug!(kind = %kind, key = %key, rows, "durable record purged");
        Ok(rows)
    }

    async fn read_cache<E: Entity>(&self, cache_key: &str) -> Option<E> {
        let raw = match self.cache.get(cache_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = cache_key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<E>(&raw) {
            Ok(entity) => Some(entity),
            Err(e) => {
                let err = StoreError::CacheCorrupt {
                    key: cache_key.to_string(),
                    reason: e.to_string(),
                };
                warn!(code = err.code(), error = %err, "dropping corrupt cache entry");
                if let Err(e) = self.cache.delete(cache_key).await {
                    warn!(key = cache_key, error = %e, "failed to delete corrupt cache entry");
                }
                None
            }
        }
    }

    async fn read_durable<E: Entity>(&self, key: &EntityKey, seed: &E::Seed) -> Result<E> {
        let kind = E::KIND;
        let missing = |reason: String| StoreError::ConfigMissing {
            kind,
            key: key.to_string(),
            reason,
        };

        let row = self
            .durable
            .select_latest(kind.table(), kind.field(), &key.record_key())
            .await;

        match row {
            Ok(Some(raw)) => match serde_json::from_str::<E>(&raw) {
                Ok(entity) => Ok(entity.reconcile(seed)),
                Err(e) => match E::synthesize(seed) {
                    Some(fresh) => {
                        warn!(error = %e, "unreadable durable record, starting fresh");
                        Ok(fresh)
                    }
                    None => Err(missing(e.to_string())),
                },
            },
            Ok(None) => match E::synthesize(seed) {
                Some(fresh) => {
                    debug!("no durable record, synthesized");
                    Ok(fresh)
                }
                None => Err(missing("no durable record".to_string())),
            },
            Err(e) => match E::synthesize(seed) {
                Some(fresh) => {
                    warn!(error = %e, "durable store unavailable, synthesized");
                    Ok(fresh)
                }
                None => Err(match e {
                    StoreError::DurableUnavailable(_) => e,
                    other => StoreError::DurableUnavailable(other.to_string()),
                }),
            },
        }
    }

    async fn write_cache<E: Entity>(&self, cache_key: &str, entity: &E) {
        match serde_json::to_string(entity) {
            Ok(json) => self.write_cache_raw(E::KIND, cache_key, &json).await,
            Err(e) => warn!(key = cache_key, error = %e, "failed to serialize for cache"),
        }
    }

    async fn write_cache_raw(&self, kind: EntityKind, cache_key: &str, json: &str) {
        let ttl = self.policy.ttl_for(kind);
        if let Err(e) = self.cache.set(cache_key, json, ttl).await {
            warn!(key = cache_key, error = %e, "cache write failed");
        }
    }
}

fn checked_cache_key(kind: EntityKind, key: &EntityKey) -> Result<String> {
    if !kind.accepts(key) {
        return Err(StoreError::InvalidKey {
            kind,
            key: key.to_string(),
        });
    }
    Ok(kind.cache_key(key))
}
