use axum::Json;
use serde_json::{json, Value};

/// GET /ping: liveness check.
pub async fn ping_handler() -> Json<Value> {
    Json(json!({ "pong": true }))
}
