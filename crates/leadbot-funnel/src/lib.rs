//! Funnel engine: per-conversation slot filling over a tenant-defined list
//! of stages.

pub mod definition;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod state;

pub use definition::{
    AliasRule, Extractor, FunnelDefinition, FunnelSpec, Stage, AWAITING_HUMAN, HUMAN_HANDOFF,
    NOT_INFORMED,
};
pub use engine::{Advance, FunnelEngine};
pub use error::{FallbackError, FunnelError, Result};
pub use fallback::LlmFallback;
pub use state::ConversationState;
