use async_trait::async_trait;
use leadbot_core::types::HistoryEntry;

use crate::error::FallbackError;

/// LLM collaborator used when a stage's regex and alias rules find nothing.
///
/// Implementations own their retry and model-fallback policy; the engine
/// calls each once per stage and treats any error as "no value".
#[async_trait]
pub trait LlmFallback: Send + Sync {
    /// Ask the model to extract a value for one slot. Returns the raw
    /// answer; the engine trims and lower-cases it.
    async fn invoke(
        &self,
        instruction: &str,
        message: &str,
        history: &[HistoryEntry],
    ) -> Result<String, FallbackError>;
}
