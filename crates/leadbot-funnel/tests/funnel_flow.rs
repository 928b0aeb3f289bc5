use std::sync::Arc;

use leadbot_core::types::ConversationKey;
use leadbot_funnel::{ConversationState, FunnelDefinition, FunnelEngine, AWAITING_HUMAN};
use leadbot_store::{
    CachePolicy, DurableStore, EntityKey, KeyValueCache, MemoryCache, RecordKey, RequestScope,
    SqliteStore, TieredStore,
};

const CLOSING: &str = "Obrigado! Um atendente vai continuar por aqui.";

fn age_and_consent() -> FunnelDefinition {
    let json = format!(
        r#"{{
            "base_prompt": "Você é uma assistente de agendamento.",
            "stages": [
                {{"id": "A", "prompt": "Qual a sua idade?", "required": true,
                  "regex": ["idade (\\d+)", "(\\d+) anos"]}},
                {{"id": "B", "prompt": "Posso te enviar novidades?", "required": false,
                  "aliases": {{"sim": ["sim", "ok"]}}}},
                {{"id": "awaiting_human", "prompt": "{CLOSING}"}}
            ]
        }}"#
    );
    serde_json::from_str(&json).expect("funnel should compile")
}

fn engine() -> FunnelEngine {
    FunnelEngine::new(None, "default closing")
}

#[tokio::test]
async fn one_message_fills_every_slot_it_can() {
    let funnel = age_and_consent();
    let state = ConversationState::initial(&funnel);

    let out = engine().advance("sim, tenho 30 anos", &state, &funnel, &[]).await;

    assert_eq!(out.state.slot("A"), Some("30"));
    assert_eq!(out.state.slot("B"), Some("sim"));
    assert_eq!(out.state.current_stage_id, AWAITING_HUMAN);
    assert_eq!(out.prompt.as_deref(), Some(CLOSING));
    assert!(out.changed);
}

#[tokio::test]
async fn unmatched_message_prompts_first_pending_stage() {
    let funnel = age_and_consent();
    let state = ConversationState::initial(&funnel);

    let out = engine().advance("oi", &state, &funnel, &[]).await;

    assert!(out.state.slot_values.values().all(Option::is_none));
    assert_eq!(out.state.current_stage_id, "A");
    assert_eq!(out.prompt.as_deref(), Some("Qual a sua idade?"));
}

#[tokio::test]
async fn terminal_state_is_stable_under_empty_messages() {
    let funnel = age_and_consent();
    let state = ConversationState::initial(&funnel);
    let done = engine()
        .advance("sim, tenho 30 anos", &state, &funnel, &[])
        .await
        .state;

    let once = engine().advance("", &done, &funnel, &[]).await;
    let twice = engine().advance("", &once.state, &funnel, &[]).await;

    assert_eq!(once.state, done);
    assert_eq!(twice.state, done);
    assert!(!once.changed);
    assert!(!twice.changed);
}

#[tokio::test]
async fn same_input_gives_same_result() {
    let funnel = age_and_consent();
    let state = ConversationState::initial(&funnel);
    let a = engine().advance("idade 52", &state, &funnel, &[]).await;
    let b = engine().advance("idade 52", &state, &funnel, &[]).await;
    assert_eq!(a, b);
}

fn tiered() -> (TieredStore, Arc<MemoryCache>, Arc<SqliteStore>) {
    let cache = Arc::new(MemoryCache::new());
    let durable = Arc::new(SqliteStore::open_in_memory().unwrap());
    let store = TieredStore::new(cache.clone(), durable.clone(), CachePolicy::default());
    (store, cache, durable)
}

fn conversation() -> (ConversationKey, EntityKey) {
    let key = ConversationKey::new("5511999990000", "5521988887777");
    let entity = EntityKey::from(&key);
    (key, entity)
}

#[tokio::test]
async fn malformed_cached_state_falls_back_to_durable() {
    let (store, cache, durable) = tiered();
    let funnel = age_and_consent();
    let (_, key) = conversation();

    let saved = r#"{"current_stage_id":"B","slot_values":{"A":"30","B":null}}"#;
    durable
        .upsert("user_data", "user_info", &key.record_key(), saved)
        .await
        .unwrap();
    let cache_key = "user_info:5511999990000:5521988887777";
    cache.set(cache_key, "{\"current_stage_id\":", None).await.unwrap();

    let state: Arc<ConversationState> = store
        .get(&mut RequestScope::new(), &key, &funnel)
        .await
        .expect("durable fallback");

    assert_eq!(state.current_stage_id, "B");
    assert_eq!(state.slot("A"), Some("30"));
    let recached = cache.get(cache_key).await.unwrap().expect("re-cached");
    assert!(serde_json::from_str::<ConversationState>(&recached).is_ok());
}

#[tokio::test]
async fn funnel_change_resyncs_state_on_next_read() {
    let (store, _, _) = tiered();
    let (conv, key) = conversation();
    let before = age_and_consent();

    let mut scope = RequestScope::new();
    let state: Arc<ConversationState> = store.get(&mut scope, &key, &before).await.unwrap();
    let out = engine().advance("idade 30", &state, &before, &[]).await;
    engine()
        .commit(&store, &mut scope, &conv, &out)
        .await
        .unwrap()
        .expect("changed state is written")
        .await
        .unwrap();

    let after: FunnelDefinition = serde_json::from_str(
        r#"{"stages":[
            {"id":"B","prompt":"Posso te enviar novidades?","required":false},
            {"id":"C","prompt":"Qual a sua cidade?"}
        ]}"#,
    )
    .unwrap();

    let state: Arc<ConversationState> = store
        .get(&mut RequestScope::new(), &key, &after)
        .await
        .unwrap();
    assert!(!state.slot_values.contains_key("A"));
    assert_eq!(state.slot_values.get("C"), Some(&None));
    assert_eq!(state.slot_values.len(), 2);
}

#[tokio::test]
async fn unchanged_state_is_not_written() {
    let (store, _, durable) = tiered();
    let (conv, key) = conversation();
    let funnel = age_and_consent();

    let mut scope = RequestScope::new();
    let state: Arc<ConversationState> = store.get(&mut scope, &key, &funnel).await.unwrap();
    let out = engine().advance("oi", &state, &funnel, &[]).await;
    assert!(!out.changed);
    assert!(engine()
        .commit(&store, &mut scope, &conv, &out)
        .await
        .unwrap()
        .is_none());

    let row = durable
        .select_latest("user_data", "user_info", &RecordKey::new()
            .with("tenant_id", "5511999990000")
            .with("user_id", "5521988887777"))
        .await
        .unwrap();
    assert!(row.is_none());
}
