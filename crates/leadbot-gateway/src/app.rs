use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use leadbot_core::config::LeadbotConfig;
use leadbot_debounce::DebounceCoordinator;
use leadbot_funnel::{FunnelEngine, LlmFallback};
use leadbot_store::{CachePolicy, DurableStore, HistoryLog, MemoryCache, TieredStore};

use crate::locks::KeyedLocks;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: LeadbotConfig,
    pub store: TieredStore,
    pub history: HistoryLog,
    pub debounce: DebounceCoordinator,
    pub engine: FunnelEngine,
    /// One turn at a time per conversation key.
    pub locks: KeyedLocks,
    /// Concrete handle on the shared cache, kept for the expiry sweep.
    pub cache: Arc<MemoryCache>,
}

impl AppState {
    pub fn new(
        config: LeadbotConfig,
        durable: Arc<dyn DurableStore>,
        fallback: Option<Arc<dyn LlmFallback>>,
    ) -> Self {
        let cache = Arc::new(MemoryCache::new());
        let store = TieredStore::new(cache.clone(), durable, CachePolicy::from(&config.cache));
        let history = HistoryLog::from_config(cache.clone(), &config.cache);
        let debounce = DebounceCoordinator::from_config(&config.debounce, cache.clone());
        let engine = FunnelEngine::from_config(&config.funnel, fallback);
        Self {
            config,
            store,
            history,
            debounce,
            engine,
            locks: KeyedLocks::new(),
            cache,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(crate::http::health::ping_handler))
        .route("/webhook", post(crate::http::webhook::webhook_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
