use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use leadbot_agent::ChatFallback;
use leadbot_core::config::LeadbotConfig;
use leadbot_funnel::LlmFallback;
use leadbot_gateway::{build_router, AppState};
use leadbot_store::{MemoryCache, SqliteStore};
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "leadbot-gateway")]
#[command(about = "Lead qualification bot: webhook ingress and funnel runner")]
struct Args {
    /// Path to leadbot.toml (default: $LEADBOT_CONFIG or ~/.leadbot/leadbot.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "leadbot_gateway=info,leadbot_funnel=info,leadbot_store=info,\
                 leadbot_debounce=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // load config: --config > LEADBOT_CONFIG env > ~/.leadbot/leadbot.toml
    let args = Args::parse();
    let config_path = args.config.or_else(|| std::env::var("LEADBOT_CONFIG").ok());
    let config = LeadbotConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        LeadbotConfig::default()
    });

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let sweep_every = Duration::from_secs(config.cache.sweep_interval_secs.max(1));

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let durable = Arc::new(SqliteStore::new(db)?);
    info!("database migrations complete");

    let fallback: Option<Arc<dyn LlmFallback>> = match config.fallback {
        Some(ref fb) => {
            info!(
                model = %fb.model,
                fallback_model = %fb.fallback_model,
                base_url = %fb.base_url,
                "LLM extraction fallback enabled"
            );
            let fallback: Arc<dyn LlmFallback> = Arc::new(ChatFallback::openai(fb));
            Some(fallback)
        }
        None => {
            info!("no [fallback] section, LLM extraction disabled");
            None
        }
    };

    let state = Arc::new(AppState::new(config, durable, fallback));
    let router = build_router(state.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(sweep_loop(state.cache.clone(), sweep_every, shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Leadbot gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop the sweeper
    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    info!("gateway stopped");
    Ok(())
}

/// Purge expired cache entries every `every` until shutdown.
async fn sweep_loop(cache: Arc<MemoryCache>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = cache.len(), "cache sweep");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            tracing::warn!("Ctrl+C handler unavailable ({}), running until killed", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
