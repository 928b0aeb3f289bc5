use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConfigError {
    /// Short error code string used in logs and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Load(_) => "CONFIG_ERROR",
            ConfigError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            ConfigError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
