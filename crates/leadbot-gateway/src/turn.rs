//! One inbound message from arrival to reply prompt.
//!
//! Fragments are coalesced per conversation first; only the caller that ends
//! up owning the consolidated text runs the rest of the turn, under the
//! conversation's lock.

use std::sync::Arc;
use std::time::Duration;

use leadbot_core::types::{ConversationKey, HistoryEntry, Role, TenantId, TurnId};
use leadbot_core::TenantConfig;
use leadbot_debounce::DebounceOutcome;
use leadbot_funnel::{ConversationState, FunnelDefinition};
use leadbot_store::{EntityKey, RequestScope, WriteMode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, Instrument};

use crate::admin;
use crate::app::AppState;
use crate::error::TurnError;

/// Messages starting with this prefix are developer commands.
pub const ADMIN_PREFIX: &str = "/admin";

/// Normalized inbound message handed over by the messaging gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inbound {
    /// The business number that received the message.
    pub tenant: String,
    /// The end user who sent it.
    pub sender: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Absent for media the gateway does not transcribe.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub is_group: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    /// The funnel ran and produced a prompt.
    Ok,
    /// Filtered at ingress; nothing was buffered.
    Ignored,
    /// Folded into a later fragment's turn.
    Coalesced,
    /// The conversation is with a human; the bot stays quiet.
    Silenced,
    /// A developer command ran.
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReply {
    pub status: TurnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl TurnReply {
    fn bare(status: TurnStatus) -> Self {
        Self {
            status,
            prompt: None,
        }
    }

    fn with_prompt(status: TurnStatus, prompt: String) -> Self {
        Self {
            status,
            prompt: Some(prompt),
        }
    }
}

/// Run a full turn for one inbound fragment.
pub async fn run_turn(app: &AppState, inbound: Inbound) -> Result<TurnReply, TurnError> {
    let span = tracing::info_span!(
        "turn",
        turn_id = %TurnId::new(),
        tenant = %inbound.tenant,
        sender = %inbound.sender,
    );
    process(app, inbound).instrument(span).await
}

async fn process(app: &AppState, inbound: Inbound) -> Result<TurnReply, TurnError> {
    if inbound.from_me || inbound.is_group {
        debug!(from_me = inbound.from_me, is_group = inbound.is_group, "message filtered");
        return Ok(TurnReply::bare(TurnStatus::Ignored));
    }
    let text = match inbound.text.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => {
            debug!("message without text ignored");
            return Ok(TurnReply::bare(TurnStatus::Ignored));
        }
    };

    let key = ConversationKey::new(TenantId::new(inbound.tenant), inbound.sender);
    let tenant_key = EntityKey::from(&key.tenant);
    let conversation_key = EntityKey::from(&key);
    let mut scope = RequestScope::new();

    let tenant: Arc<TenantConfig> = app.store.get(&mut scope, &tenant_key, &()).await?;
    let window = debounce_window(app, &tenant);

    let message = match app
        .debounce
        .accept_fragment(&key.format(), &text, window)
        .await?
    {
        DebounceOutcome::Consolidated(message) => message,
        DebounceOutcome::Superseded => return Ok(TurnReply::bare(TurnStatus::Coalesced)),
        DebounceOutcome::Empty => return Ok(TurnReply::bare(TurnStatus::Ignored)),
    };

    let _guard = app.locks.acquire(&key.format()).await;
    info!(chars = message.len(), "turn consolidated");

    if app.config.admin.enabled && message.starts_with(ADMIN_PREFIX) {
        let report = admin::execute(app, &key, &message).await?;
        return Ok(TurnReply::with_prompt(TurnStatus::Admin, report));
    }

    let funnel: Arc<FunnelDefinition> = app.store.get(&mut scope, &tenant_key, &()).await?;
    let state: Arc<ConversationState> = app
        .store
        .get(&mut scope, &conversation_key, funnel.as_ref())
        .await?;

    if tenant.matches_stop_keyword(&message) {
        if !state.is_handoff() {
            info!("stop keyword received, handing conversation to a human");
            let next = state.as_ref().clone().handed_off();
            app.store
                .put(&mut scope, &conversation_key, next, WriteMode::Blocking)
                .await?;
        }
        return Ok(TurnReply::bare(TurnStatus::Silenced));
    }

    let history = app.history.load(&key).await;
    let advance = app
        .engine
        .advance(&message, &state, &funnel, &history)
        .await;
    // the durable write finishes on its own; the handle is only for tests
    let _ = app.engine.commit(&app.store, &mut scope, &key, &advance).await?;

    match advance.prompt {
        Some(prompt) => {
            app.history
                .append(
                    &key,
                    [
                        HistoryEntry::new(Role::User, message),
                        HistoryEntry::new(Role::Assistant, prompt.clone()),
                    ],
                )
                .await;
            info!(
                stage = %advance.state.current_stage_id,
                changed = advance.changed,
                "turn complete"
            );
            Ok(TurnReply::with_prompt(TurnStatus::Ok, prompt))
        }
        None => Ok(TurnReply::bare(TurnStatus::Silenced)),
    }
}

/// The tenant's window, or the gateway default when the tenant sets zero.
fn debounce_window(app: &AppState, tenant: &TenantConfig) -> Duration {
    if tenant.debounce_secs == 0 {
        Duration::from_secs(app.config.debounce.default_window_secs)
    } else {
        tenant.debounce_window()
    }
}
