//! LLM collaborator for slot extraction over an OpenAI-compatible API.

pub mod fallback;
pub mod openai;
pub mod provider;

pub use fallback::ChatFallback;
pub use openai::OpenAiProvider;
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError};
