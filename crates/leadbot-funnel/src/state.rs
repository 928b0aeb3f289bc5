use std::collections::BTreeMap;

use leadbot_store::{Entity, EntityKind};
use serde::{Deserialize, Serialize};

use crate::definition::{FunnelDefinition, AWAITING_HUMAN, HUMAN_HANDOFF};

/// Funnel progress for one conversation, stored as `user_data.user_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    /// A stage id of the current funnel, or one of the terminal sentinels.
    pub current_stage_id: String,
    /// Exactly one entry per stage of the current funnel. `None` means not
    /// yet answered.
    #[serde(default)]
    pub slot_values: BTreeMap<String, Option<String>>,
}

impl ConversationState {
    /// Fresh state positioned on the first stage with every slot empty.
    pub fn initial(funnel: &FunnelDefinition) -> Self {
        Self {
            current_stage_id: funnel.first_stage_id().unwrap_or(AWAITING_HUMAN).to_string(),
            slot_values: funnel.stage_ids().map(|id| (id.to_string(), None)).collect(),
        }
    }

    /// Align with `funnel`: drop slots for removed stages, add empty slots
    /// for new ones and move off a stage that no longer exists.
    pub fn resync(mut self, funnel: &FunnelDefinition) -> Self {
        let mut slots: BTreeMap<String, Option<String>> = funnel
            .stage_ids()
            .map(|id| (id.to_string(), None))
            .collect();
        for (id, value) in slots.iter_mut() {
            if let Some(existing) = self.slot_values.remove(id) {
                *value = existing;
            }
        }
        self.slot_values = slots;

        let known = self.is_terminal() || funnel.stage(&self.current_stage_id).is_some();
        if !known {
            self.current_stage_id = funnel.first_stage_id().unwrap_or(AWAITING_HUMAN).to_string();
        }
        self
    }

    pub fn is_handoff(&self) -> bool {
        self.current_stage_id == HUMAN_HANDOFF
    }

    pub fn is_terminal(&self) -> bool {
        self.current_stage_id == AWAITING_HUMAN || self.is_handoff()
    }

    pub fn slot(&self, stage_id: &str) -> Option<&str> {
        self.slot_values.get(stage_id)?.as_deref()
    }

    pub fn is_filled(&self, stage_id: &str) -> bool {
        self.slot(stage_id).is_some()
    }

    /// The same state moved to `human_handoff`.
    pub fn handed_off(mut self) -> Self {
        self.current_stage_id = HUMAN_HANDOFF.to_string();
        self
    }
}

impl Entity for ConversationState {
    const KIND: EntityKind = EntityKind::ConversationState;
    type Seed = FunnelDefinition;

    fn synthesize(funnel: &FunnelDefinition) -> Option<Self> {
        Some(Self::initial(funnel))
    }

    fn reconcile(self, funnel: &FunnelDefinition) -> Self {
        self.resync(funnel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funnel(ids: &[&str]) -> FunnelDefinition {
        let stages: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"id":"{id}","prompt":"{id}?"}}"#))
            .collect();
        serde_json::from_str(&format!(r#"{{"stages":[{}]}}"#, stages.join(","))).unwrap()
    }

    #[test]
    fn initial_state_points_at_first_stage() {
        let state = ConversationState::initial(&funnel(&["a", "b"]));
        assert_eq!(state.current_stage_id, "a");
        assert_eq!(state.slot_values.len(), 2);
        assert!(state.slot_values.values().all(Option::is_none));
    }

    #[test]
    fn empty_funnel_starts_awaiting_human() {
        let state = ConversationState::initial(&funnel(&[]));
        assert_eq!(state.current_stage_id, AWAITING_HUMAN);
        assert!(state.slot_values.is_empty());
    }

    #[test]
    fn resync_drops_stale_and_adds_new_slots() {
        let mut state = ConversationState::initial(&funnel(&["a", "b"]));
        state.slot_values.insert("a".into(), Some("1".into()));
        state.slot_values.insert("b".into(), Some("2".into()));
        state.current_stage_id = "a".into();

        let state = state.resync(&funnel(&["b", "c"]));
        assert!(!state.slot_values.contains_key("a"));
        assert_eq!(state.slot("b"), Some("2"));
        assert_eq!(state.slot_values.get("c"), Some(&None));
        assert_eq!(state.current_stage_id, "b");
    }

    #[test]
    fn resync_keeps_terminal_sentinels() {
        let f = funnel(&["a"]);
        let waiting = ConversationState {
            current_stage_id: AWAITING_HUMAN.into(),
            slot_values: BTreeMap::new(),
        };
        assert_eq!(waiting.resync(&f).current_stage_id, AWAITING_HUMAN);

        let handed = ConversationState::initial(&f).handed_off();
        assert!(handed.resync(&f).is_handoff());
    }

    #[test]
    fn serialized_form_keeps_null_slots() {
        let state = ConversationState::initial(&funnel(&["a"]));
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"current_stage_id":"a","slot_values":{"a":null}}"#);
    }
}
