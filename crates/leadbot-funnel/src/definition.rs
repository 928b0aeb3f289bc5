use std::collections::{BTreeMap, HashSet};

use leadbot_store::{Entity, EntityKind};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FunnelError;

/// Every slot is filled; the conversation waits for a human.
pub const AWAITING_HUMAN: &str = "awaiting_human";
/// A human took over. Sticky: the engine no longer advances the funnel.
pub const HUMAN_HANDOFF: &str = "human_handoff";
/// Value stored for an optional slot the user was asked about and skipped.
pub const NOT_INFORMED: &str = "not_informed";

// ---------------------------------------------------------------------------
// Wire form
// ---------------------------------------------------------------------------

/// Funnel JSON as stored in `account_data.funnel_info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunnelSpec {
    #[serde(default)]
    pub base_prompt: String,
    #[serde(default)]
    pub opening_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closing_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_prompt: Option<String>,
    /// Slot values that send the conversation straight to a human.
    #[serde(default)]
    pub handoff_values: Vec<String>,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub id: String,
    pub prompt: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub allow_revisit: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regex: Vec<String>,
    /// Canonical value → matching rules.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, AliasSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_fallback: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Either a bare keyword list or explicit phrase and keyword lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AliasSpec {
    Keywords(Vec<String>),
    Rules {
        #[serde(default)]
        phrases: Vec<String>,
        #[serde(default)]
        keywords: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Compiled form
// ---------------------------------------------------------------------------

/// One extraction strategy, resolved at load time.
#[derive(Debug, Clone)]
pub enum Extractor {
    /// Patterns tried in order against the lower-cased message.
    Regex(Vec<Regex>),
    /// Aliases tried in canonical-value order.
    Alias(Vec<AliasRule>),
    /// Instruction passed to the LLM collaborator.
    LlmFallback(String),
}

/// Lower-cased phrases and keywords mapping to one canonical value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRule {
    pub canonical: String,
    pub phrases: Vec<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub id: String,
    pub prompt: String,
    pub required: bool,
    pub allow_revisit: bool,
    /// Non-empty strategies in priority order: regex, alias, LLM.
    pub extractors: Vec<Extractor>,
}

/// A validated funnel. Only constructible from a [`FunnelSpec`] that
/// passes validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "FunnelSpec", into = "FunnelSpec")]
pub struct FunnelDefinition {
    base_prompt: String,
    opening_prompt: String,
    closing_prompt: Option<String>,
    handoff_prompt: Option<String>,
    handoff_values: Vec<String>,
    stages: Vec<Stage>,
}

impl FunnelDefinition {
    pub fn compile(spec: FunnelSpec) -> Result<Self, FunnelError> {
        let mut seen = HashSet::new();
        let mut closing_prompt = spec.closing_prompt;
        let mut stages = Vec::with_capacity(spec.stages.len());

        for raw in spec.stages {
            let id = raw.id.trim().to_string();
            if id.is_empty() {
                return Err(FunnelError::InvalidDefinition("blank stage id".into()));
            }
            if id == HUMAN_HANDOFF {
                return Err(FunnelError::InvalidDefinition(format!(
                    "stage id {HUMAN_HANDOFF} is reserved"
                )));
            }
            if !seen.insert(id.clone()) {
                return Err(FunnelError::InvalidDefinition(format!(
                    "duplicate stage id {id}"
                )));
            }
            if id == AWAITING_HUMAN {
                // Not a slot: only supplies the closing prompt.
                closing_prompt.get_or_insert(raw.prompt);
                continue;
            }
            stages.push(compile_stage(id, raw)?);
        }

        Ok(Self {
            base_prompt: spec.base_prompt,
            opening_prompt: spec.opening_prompt,
            closing_prompt,
            handoff_prompt: spec.handoff_prompt,
            handoff_values: spec
                .handoff_values
                .into_iter()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect(),
            stages,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn first_stage_id(&self) -> Option<&str> {
        self.stages.first().map(|s| s.id.as_str())
    }

    pub fn stage_ids(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.id.as_str())
    }

    pub fn base_prompt(&self) -> &str {
        &self.base_prompt
    }

    pub fn opening_prompt(&self) -> &str {
        &self.opening_prompt
    }

    pub fn closing_prompt(&self) -> Option<&str> {
        self.closing_prompt.as_deref()
    }

    pub fn handoff_prompt(&self) -> Option<&str> {
        self.handoff_prompt.as_deref()
    }

    /// Case-insensitive match against the configured handoff values.
    pub fn is_handoff_value(&self, value: &str) -> bool {
        let value = value.trim().to_lowercase();
        self.handoff_values.iter().any(|v| *v == value)
    }
}

fn compile_stage(id: String, raw: StageSpec) -> Result<Stage, FunnelError> {
    let mut extractors = Vec::new();

    if !raw.regex.is_empty() {
        let patterns = raw
            .regex
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| FunnelError::Regex {
                stage: id.clone(),
                source,
            })?;
        extractors.push(Extractor::Regex(patterns));
    }

    if !raw.aliases.is_empty() {
        let rules = raw
            .aliases
            .into_iter()
            .map(|(canonical, spec)| {
                let (phrases, keywords) = match spec {
                    AliasSpec::Keywords(k) => (Vec::new(), k),
                    AliasSpec::Rules { phrases, keywords } => (phrases, keywords),
                };
                AliasRule {
                    canonical,
                    phrases: lowered(phrases),
                    keywords: lowered(keywords),
                }
            })
            .collect();
        extractors.push(Extractor::Alias(rules));
    }

    if let Some(instruction) = raw.llm_fallback.filter(|i| !i.trim().is_empty()) {
        extractors.push(Extractor::LlmFallback(instruction));
    }

    Ok(Stage {
        id,
        prompt: raw.prompt,
        required: raw.required,
        allow_revisit: raw.allow_revisit,
        extractors,
    })
}

fn lowered(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl TryFrom<FunnelSpec> for FunnelDefinition {
    type Error = FunnelError;

    fn try_from(spec: FunnelSpec) -> Result<Self, Self::Error> {
        Self::compile(spec)
    }
}

impl From<FunnelDefinition> for FunnelSpec {
    fn from(def: FunnelDefinition) -> Self {
        let stages = def
            .stages
            .into_iter()
            .map(|stage| {
                let mut spec = StageSpec {
                    id: stage.id,
                    prompt: stage.prompt,
                    required: stage.required,
                    allow_revisit: stage.allow_revisit,
                    regex: Vec::new(),
                    aliases: BTreeMap::new(),
                    llm_fallback: None,
                };
                for extractor in stage.extractors {
                    match extractor {
                        Extractor::Regex(patterns) => {
                            spec.regex = patterns.iter().map(|r| r.as_str().to_string()).collect();
                        }
                        Extractor::Alias(rules) => {
                            spec.aliases = rules
                                .into_iter()
                                .map(|r| {
                                    let alias = AliasSpec::Rules {
                                        phrases: r.phrases,
                                        keywords: r.keywords,
                                    };
                                    (r.canonical, alias)
                                })
                                .collect();
                        }
                        Extractor::LlmFallback(instruction) => {
                            spec.llm_fallback = Some(instruction)
                        }
                    }
                }
                spec
            })
            .collect();

        FunnelSpec {
            base_prompt: def.base_prompt,
            opening_prompt: def.opening_prompt,
            closing_prompt: def.closing_prompt,
            handoff_prompt: def.handoff_prompt,
            handoff_values: def.handoff_values,
            stages,
        }
    }
}

impl Entity for FunnelDefinition {
    const KIND: EntityKind = EntityKind::FunnelDefinition;
    type Seed = ();
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUNNEL: &str = r#"{
        "base_prompt": "Você é a assistente da clínica.",
        "opening_prompt": "Olá! Como posso ajudar?",
        "handoff_values": ["Urgente"],
        "stages": [
            {"id": "nome", "prompt": "Qual o seu nome?", "regex": ["meu nome é (\\w+)"]},
            {"id": "plano", "prompt": "Tem plano?", "required": false,
             "aliases": {"sim": ["sim", "ok"],
                         "nao": {"phrases": ["não tenho"], "keywords": ["nao"]}}},
            {"id": "motivo", "prompt": "Qual o motivo?", "llm_fallback": "Extraia o motivo"},
            {"id": "awaiting_human", "prompt": "Obrigado, já vamos te atender."}
        ]
    }"#;

    #[test]
    fn compiles_stages_and_extractors() {
        let def: FunnelDefinition = serde_json::from_str(FUNNEL).unwrap();
        let ids: Vec<&str> = def.stage_ids().collect();
        assert_eq!(ids, ["nome", "plano", "motivo"]);
        assert_eq!(def.first_stage_id(), Some("nome"));
        assert_eq!(def.closing_prompt(), Some("Obrigado, já vamos te atender."));

        let nome = def.stage("nome").unwrap();
        assert!(nome.required);
        assert!(matches!(nome.extractors.as_slice(), [Extractor::Regex(p)] if p.len() == 1));

        let plano = def.stage("plano").unwrap();
        assert!(!plano.required);
        let [Extractor::Alias(rules)] = plano.extractors.as_slice() else {
            panic!("expected alias extractor");
        };
        assert_eq!(rules[0].canonical, "nao");
        assert_eq!(rules[0].phrases, ["não tenho"]);
        assert_eq!(rules[1].canonical, "sim");
        assert_eq!(rules[1].keywords, ["sim", "ok"]);

        assert!(matches!(
            def.stage("motivo").unwrap().extractors.as_slice(),
            [Extractor::LlmFallback(_)]
        ));
    }

    #[test]
    fn handoff_values_are_case_insensitive() {
        let def: FunnelDefinition = serde_json::from_str(FUNNEL).unwrap();
        assert!(def.is_handoff_value("URGENTE"));
        assert!(!def.is_handoff_value("depois"));
    }

    #[test]
    fn explicit_closing_prompt_wins_over_stage() {
        let json = r#"{"closing_prompt": "Tchau", "stages": [
            {"id": "awaiting_human", "prompt": "Aguarde"}
        ]}"#;
        let def: FunnelDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.closing_prompt(), Some("Tchau"));
        assert!(def.stages().is_empty());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let json = r#"{"stages": [{"id": "a", "prompt": "p", "regex": ["(unclosed"]}]}"#;
        assert!(serde_json::from_str::<FunnelDefinition>(json).is_err());
        let spec: FunnelSpec = serde_json::from_str(json).unwrap();
        let err = FunnelDefinition::compile(spec).unwrap_err();
        assert_eq!(err.code(), "INVALID_FUNNEL");
    }

    #[test]
    fn duplicate_and_blank_ids_are_rejected() {
        let dup = r#"{"stages": [{"id": "a", "prompt": "p"}, {"id": "a", "prompt": "q"}]}"#;
        assert!(serde_json::from_str::<FunnelDefinition>(dup).is_err());
        let blank = r#"{"stages": [{"id": " ", "prompt": "p"}]}"#;
        assert!(serde_json::from_str::<FunnelDefinition>(blank).is_err());
        let reserved = r#"{"stages": [{"id": "human_handoff", "prompt": "p"}]}"#;
        assert!(serde_json::from_str::<FunnelDefinition>(reserved).is_err());
    }

    #[test]
    fn serializes_back_to_loadable_json() {
        let def: FunnelDefinition = serde_json::from_str(FUNNEL).unwrap();
        let json = serde_json::to_string(&def).unwrap();
        let again: FunnelDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(again.stage_ids().collect::<Vec<_>>(), ["nome", "plano", "motivo"]);
        assert_eq!(again.closing_prompt(), def.closing_prompt());
    }
}
