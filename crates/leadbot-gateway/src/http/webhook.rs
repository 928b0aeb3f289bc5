//! Message ingress endpoint: POST /webhook.
//!
//! The messaging gateway posts one request per inbound fragment. The request
//! stays open for the debounce window; the reply carries the prompt to send
//! back, if any. The turn itself runs on its own task, so a client that
//! hangs up mid-window does not cancel the turn its fragments belong to.

use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::{error, warn};

use crate::app::AppState;
use crate::error::TurnError;
use crate::turn::{run_turn, Inbound, TurnReply};

/// POST /webhook
///
/// Returns 200 with the turn outcome, 422 when the tenant has no usable
/// config or funnel, 503 when the durable store is down.
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(inbound): Json<Inbound>,
) -> Result<Json<TurnReply>, TurnError> {
    let turn = tokio::spawn(async move { run_turn(&state, inbound).await });
    match turn.await.map_err(TurnError::from).and_then(|r| r) {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            if e.status().is_server_error() {
                error!(code = e.code(), error = %e, "turn failed");
            } else {
                warn!(code = e.code(), error = %e, "turn rejected");
            }
            Err(e)
        }
    }
}
