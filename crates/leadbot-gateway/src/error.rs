use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use leadbot_debounce::DebounceError;
use leadbot_funnel::FunnelError;
use leadbot_store::StoreError;
use serde_json::json;
use thiserror::Error;

/// Anything that aborts a turn.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Funnel(#[from] FunnelError),

    #[error(transparent)]
    Debounce(#[from] DebounceError),

    /// An `/admin...` command the gateway does not know.
    #[error("unknown admin command: {0}")]
    UnknownCommand(String),

    /// The detached turn task panicked or was cancelled.
    #[error("turn task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl TurnError {
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::Store(e) => e.code(),
            TurnError::Funnel(e) => e.code(),
            TurnError::Debounce(e) => e.code(),
            TurnError::UnknownCommand(_) => "UNKNOWN_COMMAND",
            TurnError::Task(_) => "TURN_ABORTED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.code() {
            "CONFIG_MISSING" | "INVALID_FUNNEL" => StatusCode::UNPROCESSABLE_ENTITY,
            "DURABLE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            "UNKNOWN_COMMAND" | "INVALID_KEY" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TurnError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use leadbot_store::EntityKind;

    use super::*;

    #[test]
    fn missing_config_is_unprocessable() {
        let err = TurnError::from(StoreError::ConfigMissing {
            kind: EntityKind::TenantConfig,
            key: "5511".into(),
            reason: "no record".into(),
        });
        assert_eq!(err.code(), "CONFIG_MISSING");
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn durable_outage_is_service_unavailable() {
        let err = TurnError::from(StoreError::DurableUnavailable("locked".into()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn funnel_store_errors_keep_their_code() {
        let err = TurnError::from(FunnelError::Store(StoreError::Cache("down".into())));
        assert_eq!(err.code(), "CACHE_ERROR");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn aborted_turn_task_is_internal_error() {
        let task = tokio::spawn(std::future::pending::<()>());
        task.abort();
        let err = TurnError::from(task.await.unwrap_err());
        assert_eq!(err.code(), "TURN_ABORTED");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
