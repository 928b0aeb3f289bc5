use leadbot_store::StoreError;
use thiserror::Error;

/// Errors that can occur while coalescing fragments.
#[derive(Debug, Error)]
pub enum DebounceError {
    /// The fragment buffer could not be read back when the window closed.
    #[error("fragment buffer error: {0}")]
    Buffer(#[from] StoreError),

    /// The window's timer task went away without resolving (runtime
    /// shutdown).
    #[error("debounce window abandoned for {key}")]
    Abandoned { key: String },
}

impl DebounceError {
    pub fn code(&self) -> &'static str {
        match self {
            DebounceError::Buffer(_) => "BUFFER_UNAVAILABLE",
            DebounceError::Abandoned { .. } => "DEBOUNCE_ABANDONED",
        }
    }
}

pub type Result<T> = std::result::Result<T, DebounceError>;
