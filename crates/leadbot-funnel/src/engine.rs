use std::sync::Arc;

use leadbot_core::config::FunnelConfig;
use leadbot_core::types::{ConversationKey, HistoryEntry};
use leadbot_store::{EntityKey, RequestScope, TieredStore, WriteMode};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::definition::{
    Extractor, FunnelDefinition, Stage, AWAITING_HUMAN, HUMAN_HANDOFF, NOT_INFORMED,
};
use crate::error::Result;
use crate::extract::{match_alias, match_regex, normalize_llm_output};
use crate::fallback::LlmFallback;
use crate::state::ConversationState;

/// Result of one pass over the funnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub state: ConversationState,
    /// Reply to send. `None` only when the conversation is with a human.
    pub prompt: Option<String>,
    /// Whether `state` differs from the state passed in.
    pub changed: bool,
}

/// Deterministic slot-filling over a [`FunnelDefinition`].
pub struct FunnelEngine {
    fallback: Option<Arc<dyn LlmFallback>>,
    default_closing_prompt: String,
}

impl FunnelEngine {
    pub fn new(
        fallback: Option<Arc<dyn LlmFallback>>,
        default_closing_prompt: impl Into<String>,
    ) -> Self {
        Self {
            fallback,
            default_closing_prompt: default_closing_prompt.into(),
        }
    }

    pub fn from_config(cfg: &FunnelConfig, fallback: Option<Arc<dyn LlmFallback>>) -> Self {
        Self::new(fallback, cfg.default_closing_prompt.clone())
    }

    /// Run one extraction pass of `message` over every stage.
    ///
    /// Stages are visited in declared order and every stage gets a chance
    /// to extract, so one message can fill several slots. The first stage
    /// still missing a value becomes current and supplies the prompt. An
    /// optional stage that was already current and is still unanswered is
    /// closed as `not_informed`.
    ///
    /// "Current" is read from `state` alone. A freshly synthesized state
    /// points at the first stage before its prompt was ever sent, so when
    /// that stage is optional, the first message that does not answer it
    /// closes it as `not_informed`.
    #[instrument(skip_all, fields(current = %state.current_stage_id))]
    pub async fn advance(
        &self,
        message: &str,
        state: &ConversationState,
        funnel: &FunnelDefinition,
        history: &[HistoryEntry],
    ) -> Advance {
        if state.is_handoff() {
            debug!("conversation with a human, funnel skipped");
            return Advance {
                state: state.clone(),
                prompt: None,
                changed: false,
            };
        }

        let lowered = message.to_lowercase();
        let mut next = state.clone();
        let mut pending: Option<&Stage> = None;

        for stage in funnel.stages() {
            let filled = next.is_filled(&stage.id);
            if filled && !stage.allow_revisit {
                continue;
            }

            if let Some(value) = self.extract(stage, &lowered, message, history).await {
                debug!(stage = %stage.id, value = %value, "slot filled");
                next.slot_values.insert(stage.id.clone(), Some(value));
                continue;
            }

            if filled {
                continue;
            }
            if !stage.required && state.current_stage_id == stage.id {
                debug!(stage = %stage.id, "optional slot skipped by user");
                next.slot_values
                    .insert(stage.id.clone(), Some(NOT_INFORMED.to_string()));
            } else if pending.is_none() {
                pending = Some(stage);
            }
        }

        let handoff = next
            .slot_values
            .values()
            .flatten()
            .any(|v| funnel.is_handoff_value(v));

        let prompt = if handoff {
            info!("handoff value collected, moving to human");
            next.current_stage_id = HUMAN_HANDOFF.to_string();
            funnel
                .handoff_prompt()
                .or(funnel.closing_prompt())
                .unwrap_or(self.default_closing_prompt.as_str())
                .to_string()
        } else if let Some(stage) = pending {
            next.current_stage_id = stage.id.clone();
            stage.prompt.clone()
        } else {
            next.current_stage_id = AWAITING_HUMAN.to_string();
            funnel
                .closing_prompt()
                .unwrap_or(self.default_closing_prompt.as_str())
                .to_string()
        };

        let changed = next != *state;
        Advance {
            state: next,
            prompt: Some(prompt),
            changed,
        }
    }

    /// Persist a changed state: cache and scope immediately, durable store
    /// in the background. Unchanged states are not written.
    pub async fn commit(
        &self,
        store: &TieredStore,
        scope: &mut RequestScope,
        key: &ConversationKey,
        advance: &Advance,
    ) -> Result<Option<JoinHandle<()>>> {
        if !advance.changed {
            return Ok(None);
        }
        let handle = store
            .put(
                scope,
                &EntityKey::from(key),
                advance.state.clone(),
                WriteMode::Background,
            )
            .await?;
        Ok(handle)
    }

    /// Rules match against `lowered`; the LLM sees the message as written.
    async fn extract(
        &self,
        stage: &Stage,
        lowered: &str,
        message: &str,
        history: &[HistoryEntry],
    ) -> Option<String> {
        for extractor in &stage.extractors {
            let value = match extractor {
                Extractor::Regex(patterns) => match_regex(patterns, lowered),
                Extractor::Alias(rules) => match_alias(rules, lowered),
                Extractor::LlmFallback(instruction) => {
                    self.ask_fallback(stage, instruction, message, history).await
                }
            };
            if value.is_some() {
                return value;
            }
        }
        None
    }

    async fn ask_fallback(
        &self,
        stage: &Stage,
        instruction: &str,
        message: &str,
        history: &[HistoryEntry],
    ) -> Option<String> {
        let fallback = self.fallback.as_ref()?;
        if message.trim().is_empty() {
            return None;
        }
        match fallback.invoke(instruction, message, history).await {
            Ok(raw) => normalize_llm_output(&raw),
            Err(e) => {
                warn!(
                    stage = %stage.id,
                    error = %e,
                    "LLM extraction failed, treating as no value"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use leadbot_store::Entity;

    use super::*;
    use crate::error::FallbackError;

    fn engine() -> FunnelEngine {
        FunnelEngine::new(None, "fim")
    }

    fn funnel(json: &str) -> FunnelDefinition {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn handoff_state_short_circuits() {
        let f = funnel(r#"{"stages":[{"id":"a","prompt":"A?","regex":["(\\d+)"]}]}"#);
        let state = ConversationState::initial(&f).handed_off();
        let out = engine().advance("42", &state, &f, &[]).await;
        assert_eq!(out.state, state);
        assert_eq!(out.prompt, None);
        assert!(!out.changed);
    }

    #[tokio::test]
    async fn filled_slot_without_revisit_is_kept() {
        let f = funnel(r#"{"stages":[{"id":"a","prompt":"A?","regex":["(\\d+)"]}]}"#);
        let mut state = ConversationState::initial(&f);
        state.slot_values.insert("a".into(), Some("1".into()));
        let out = engine().advance("99", &state, &f, &[]).await;
        assert_eq!(out.state.slot("a"), Some("1"));
    }

    #[tokio::test]
    async fn revisitable_slot_is_overwritten() {
        let f = funnel(
            r#"{"stages":[{"id":"a","prompt":"A?","allow_revisit":true,"regex":["(\\d+)"]}]}"#,
        );
        let mut state = ConversationState::initial(&f);
        state.slot_values.insert("a".into(), Some("1".into()));
        let out = engine().advance("99", &state, &f, &[]).await;
        assert_eq!(out.state.slot("a"), Some("99"));
        assert!(out.changed);
    }

    #[tokio::test]
    async fn optional_current_stage_becomes_not_informed() {
        let f = funnel(
            r#"{"stages":[
                {"id":"a","prompt":"A?","regex":["(\\d+)"]},
                {"id":"b","prompt":"B?","required":false,"aliases":{"sim":["sim"]}}
            ]}"#,
        );
        let mut state = ConversationState::initial(&f);
        state.slot_values.insert("a".into(), Some("1".into()));
        state.current_stage_id = "b".into();

        let out = engine().advance("talvez", &state, &f, &[]).await;
        assert_eq!(out.state.slot("b"), Some(NOT_INFORMED));
        assert_eq!(out.state.current_stage_id, AWAITING_HUMAN);
        assert_eq!(out.prompt.as_deref(), Some("fim"));
    }

    #[tokio::test]
    async fn optional_stage_is_prompted_once_before_skipping() {
        let f = funnel(
            r#"{"stages":[
                {"id":"a","prompt":"A?","regex":["(\\d+)"]},
                {"id":"b","prompt":"B?","required":false,"aliases":{"sim":["sim"]}}
            ]}"#,
        );
        let state = ConversationState::initial(&f);
        let out = engine().advance("tenho 20", &state, &f, &[]).await;
        assert_eq!(out.state.slot("a"), Some("20"));
        assert_eq!(out.state.slot("b"), None);
        assert_eq!(out.state.current_stage_id, "b");
        assert_eq!(out.prompt.as_deref(), Some("B?"));
    }

    #[tokio::test]
    async fn synthesized_optional_first_stage_closes_on_first_message() {
        let f = funnel(
            r#"{"stages":[
                {"id":"news","prompt":"Novidades?","required":false,"aliases":{"sim":["sim"]}},
                {"id":"nome","prompt":"Nome?","regex":["sou (\\w+)"]}
            ]}"#,
        );
        let state = <ConversationState as Entity>::synthesize(&f).unwrap();
        assert_eq!(state.current_stage_id, "news");

        let out = engine().advance("oi", &state, &f, &[]).await;
        assert_eq!(out.state.slot("news"), Some(NOT_INFORMED));
        assert_eq!(out.state.current_stage_id, "nome");
        assert_eq!(out.prompt.as_deref(), Some("Nome?"));
    }

    #[tokio::test]
    async fn handoff_value_forces_human_handoff() {
        let f = funnel(
            r#"{"handoff_prompt":"Um atendente vai falar com você.","handoff_values":["urgente"],
                "stages":[
                    {"id":"tipo","prompt":"Tipo?","aliases":{"urgente":{"phrases":["é urgente"]}}},
                    {"id":"nome","prompt":"Nome?","regex":["sou (\\w+)"]}
                ]}"#,
        );
        let state = ConversationState::initial(&f);
        let out = engine().advance("é urgente!", &state, &f, &[]).await;
        assert_eq!(out.state.current_stage_id, HUMAN_HANDOFF);
        assert_eq!(out.prompt.as_deref(), Some("Um atendente vai falar com você."));
    }

    struct Canned(std::result::Result<&'static str, ()>);

    #[async_trait]
    impl LlmFallback for Canned {
        async fn invoke(
            &self,
            _instruction: &str,
            _message: &str,
            _history: &[HistoryEntry],
        ) -> std::result::Result<String, FallbackError> {
            self.0
                .map(str::to_string)
                .map_err(|_| FallbackError::Unavailable("down".into()))
        }
    }

    const LLM_FUNNEL: &str = r#"{"stages":[
        {"id":"motivo","prompt":"Motivo?","aliases":{"consulta":["consulta"]},
         "llm_fallback":"Extraia o motivo"}
    ]}"#;

    #[tokio::test]
    async fn llm_fallback_runs_after_rules() {
        let f = funnel(LLM_FUNNEL);
        let engine = FunnelEngine::new(Some(Arc::new(Canned(Ok("  Dor nas Costas ")))), "fim");
        let state = ConversationState::initial(&f);

        let by_alias = engine.advance("quero uma consulta", &state, &f, &[]).await;
        assert_eq!(by_alias.state.slot("motivo"), Some("consulta"));

        let by_llm = engine.advance("minhas costas doem", &state, &f, &[]).await;
        assert_eq!(by_llm.state.slot("motivo"), Some("dor nas costas"));
    }

    /// Records the message each LLM call received.
    struct Recording(std::sync::Mutex<Vec<String>>);

    #[async_trait]
    impl LlmFallback for Recording {
        async fn invoke(
            &self,
            _instruction: &str,
            message: &str,
            _history: &[HistoryEntry],
        ) -> std::result::Result<String, FallbackError> {
            self.0.lock().unwrap().push(message.to_string());
            Ok("dor".into())
        }
    }

    #[tokio::test]
    async fn llm_fallback_sees_original_casing() {
        let f = funnel(LLM_FUNNEL);
        let recording = Arc::new(Recording(std::sync::Mutex::new(Vec::new())));
        let engine = FunnelEngine::new(Some(recording.clone()), "fim");
        let state = ConversationState::initial(&f);

        let out = engine.advance("Dor no Joelho DIREITO", &state, &f, &[]).await;
        assert_eq!(out.state.slot("motivo"), Some("dor"));
        assert_eq!(*recording.0.lock().unwrap(), ["Dor no Joelho DIREITO"]);
    }

    #[tokio::test]
    async fn llm_failure_leaves_stage_pending() {
        let f = funnel(LLM_FUNNEL);
        let engine = FunnelEngine::new(Some(Arc::new(Canned(Err(())))), "fim");
        let state = ConversationState::initial(&f);
        let out = engine.advance("minhas costas doem", &state, &f, &[]).await;
        assert_eq!(out.state.slot("motivo"), None);
        assert_eq!(out.state.current_stage_id, "motivo");
        assert_eq!(out.prompt.as_deref(), Some("Motivo?"));
        assert!(!out.changed);
    }
}
