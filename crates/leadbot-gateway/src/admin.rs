//! Developer reset commands, accepted as chat messages when `[admin] enabled`.
//!
//! - `/adminresetuser` forgets the sender: history, cached state and the
//!   durable conversation row.
//! - `/adminresetclient` drops the tenant's cached config and funnel so the
//!   next turn reloads them from the durable store.

use leadbot_core::types::ConversationKey;
use leadbot_store::{EntityKey, EntityKind};
use tracing::info;

use crate::app::AppState;
use crate::error::TurnError;

pub const RESET_USER: &str = "/adminresetuser";
pub const RESET_CLIENT: &str = "/adminresetclient";

/// Run a developer command and return a human-readable report.
pub async fn execute(
    app: &AppState,
    key: &ConversationKey,
    command: &str,
) -> Result<String, TurnError> {
    match command.trim() {
        RESET_USER => reset_user(app, key).await,
        RESET_CLIENT => reset_client(app, key).await,
        other => {
            info!(command = other, "unknown admin command rejected");
            Err(TurnError::UnknownCommand(other.to_string()))
        }
    }
}

async fn reset_user(app: &AppState, key: &ConversationKey) -> Result<String, TurnError> {
    let mut lines: Vec<String> = Vec::new();

    if app.history.clear(key).await {
        lines.push("- History cleared".to_string());
    } else {
        lines.push("- No history".to_string());
    }

    let rows = app
        .store
        .purge(EntityKind::ConversationState, &EntityKey::from(key))
        .await?;
    if rows > 0 {
        lines.push(format!("- {} conversation record(s) removed", rows));
    } else {
        lines.push("- No stored conversation".to_string());
    }

    info!(key = %key, rows, "/adminresetuser executed");
    Ok(format!("**User reset:**\n{}", lines.join("\n")))
}

async fn reset_client(app: &AppState, key: &ConversationKey) -> Result<String, TurnError> {
    let tenant = EntityKey::from(&key.tenant);
    let mut removed = 0usize;
    for kind in [EntityKind::TenantConfig, EntityKind::FunnelDefinition] {
        if app.store.invalidate(kind, &tenant).await? {
            removed += 1;
        }
    }

    info!(tenant = %key.tenant, removed, "/adminresetclient executed");
    Ok(format!(
        "**Client reset:**\n- {} cached entr{} removed",
        removed,
        if removed == 1 { "y" } else { "ies" }
    ))
}
