use std::time::Duration;

use async_trait::async_trait;
use leadbot_core::config::FallbackConfig;
use leadbot_core::types::{HistoryEntry, Role};
use leadbot_funnel::{FallbackError, LlmFallback};
use tracing::{info, warn};

use crate::openai::OpenAiProvider;
use crate::provider::{ChatRequest, LlmProvider, Message, ProviderError};

const EXTRACTION_RULES: &str = "Responda somente com o valor extraído, sem explicações. \
Se a mensagem não contiver a informação, responda com uma linha vazia.";

/// LLM slot extractor with bounded retries.
///
/// Every attempt but the last uses the primary model; the last one switches
/// to the fallback model. A single attempt always goes to the primary model.
/// Sampling is deterministic (temperature 0).
pub struct ChatFallback {
    provider: Box<dyn LlmProvider>,
    model: String,
    fallback_model: String,
    attempts: u32,
    max_tokens: u32,
}

impl ChatFallback {
    pub fn new(
        provider: Box<dyn LlmProvider>,
        model: impl Into<String>,
        fallback_model: impl Into<String>,
        attempts: u32,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            fallback_model: fallback_model.into(),
            attempts: attempts.max(1),
            max_tokens,
        }
    }

    /// OpenAI-compatible backend built from the `[fallback]` section.
    pub fn openai(cfg: &FallbackConfig) -> Self {
        let provider = OpenAiProvider::new(cfg.api_key.clone(), Some(cfg.base_url.clone()));
        Self::new(
            Box::new(provider),
            cfg.model.clone(),
            cfg.fallback_model.clone(),
            cfg.attempts,
            cfg.max_tokens,
        )
    }

    fn model_for(&self, attempt: u32) -> &str {
        if self.attempts == 1 || attempt + 1 < self.attempts {
            &self.model
        } else {
            &self.fallback_model
        }
    }

    fn build_request(
        &self,
        model: &str,
        instruction: &str,
        message: &str,
        history: &[HistoryEntry],
    ) -> ChatRequest {
        let mut messages: Vec<Message> = history
            .iter()
            .filter(|h| h.role != Role::System)
            .map(|h| Message {
                role: h.role,
                content: h.content.clone(),
            })
            .collect();
        messages.push(Message {
            role: Role::User,
            content: message.to_string(),
        });
        ChatRequest {
            model: model.to_string(),
            system: format!("{instruction}\n\n{EXTRACTION_RULES}"),
            messages,
            max_tokens: self.max_tokens,
            temperature: 0.0,
        }
    }
}

#[async_trait]
impl LlmFallback for ChatFallback {
    async fn invoke(
        &self,
        instruction: &str,
        message: &str,
        history: &[HistoryEntry],
    ) -> Result<String, FallbackError> {
        let provider_name = self.provider.name();
        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..self.attempts {
            let model = self.model_for(attempt);
            let req = self.build_request(model, instruction, message, history);
            match self.provider.send(&req).await {
                Ok(resp) => {
                    if attempt > 0 {
                        info!(
                            provider = %provider_name,
                            model,
                            attempt,
                            "extraction succeeded after retry"
                        );
                    }
                    return Ok(resp.content);
                }
                Err(e) => {
                    warn!(
                        provider = %provider_name,
                        model,
                        attempt,
                        err = %e,
                        "extraction request failed"
                    );

                    // RateLimited is not retriable
                    if matches!(e, ProviderError::RateLimited { .. }) {
                        return Err(e.into());
                    }
                    last_err = Some(e);

                    if attempt + 1 < self.attempts {
                        // small back-off between retries
                        tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
                    }
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ProviderError::Unavailable("no attempts made".to_string()))
            .into())
    }
}
