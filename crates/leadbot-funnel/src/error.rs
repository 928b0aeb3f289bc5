use leadbot_store::StoreError;
use thiserror::Error;

/// Errors raised while loading or running a funnel.
#[derive(Debug, Error)]
pub enum FunnelError {
    /// The definition is structurally unusable (blank or duplicate stage
    /// id, reserved id).
    #[error("invalid funnel definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid regex in stage {stage}: {source}")]
    Regex {
        stage: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FunnelError {
    pub fn code(&self) -> &'static str {
        match self {
            FunnelError::InvalidDefinition(_) | FunnelError::Regex { .. } => "INVALID_FUNNEL",
            FunnelError::Store(e) => e.code(),
        }
    }
}

/// Failure of the LLM extraction collaborator. Never fatal to a turn: the
/// engine treats it as "nothing extracted".
#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("fallback unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, FunnelError>;
