//! End-to-end tests of the tool surface over the in-process backends

use pretty_assertions::assert_eq;
use rexis_memory::{
    InMemorySearchIndex, InMemoryStorage, MemoryConfig, MemoryError, ToolDispatcher,
    TransportContext,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn dispatcher(config: MemoryConfig) -> ToolDispatcher {
    ToolDispatcher::new(
        config,
        Arc::new(InMemoryStorage::new()),
        Arc::new(InMemorySearchIndex::new()),
    )
}

fn pipe() -> TransportContext {
    TransportContext::pipe()
}

async fn create(dispatcher: &ToolDispatcher, context: &TransportContext, memories: Value) {
    dispatcher
        .call(context, "create_long_term_memories", json!({ "memories": memories }))
        .await
        .unwrap();
    dispatcher.wait_idle().await;
}

fn texts(result: &Value) -> Vec<String> {
    result["memories"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["text"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_set_then_get_round_trip() {
    let dispatcher = dispatcher(MemoryConfig::new());

    dispatcher
        .call(
            &pipe(),
            "set_working_memory",
            json!({"session_id": "s1", "messages": [{"role": "user", "content": "hi"}]}),
        )
        .await
        .unwrap();

    let memory = dispatcher
        .call(&pipe(), "get_working_memory", json!({"session_id": "s1"}))
        .await
        .unwrap();

    let messages = memory["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "hi");
    assert!(!messages[0]["id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_get_missing_session_is_empty() {
    let dispatcher = dispatcher(MemoryConfig::new());
    let memory = dispatcher
        .call(&pipe(), "get_working_memory", json!({"session_id": "never"}))
        .await
        .unwrap();

    assert_eq!(memory["session_id"], "never");
    assert_eq!(memory["messages"], json!([]));
    assert_eq!(memory["memories"], json!([]));
}

#[tokio::test]
async fn test_blank_message_is_rejected_with_its_id() {
    let dispatcher = dispatcher(MemoryConfig::new());
    let err = dispatcher
        .call(
            &pipe(),
            "set_working_memory",
            json!({"session_id": "s1", "messages": [{"id": "m-42", "role": "user", "content": "   "}]}),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MemoryError::Validation { .. }));
    assert!(err.to_string().contains("m-42"));
}

#[tokio::test]
async fn test_blank_memory_is_rejected_and_messages_still_promote() {
    let dispatcher = dispatcher(MemoryConfig::new());
    let err = dispatcher
        .call(
            &pipe(),
            "set_working_memory",
            json!({
                "session_id": "s1",
                "memories": [{"id": "bad", "text": ""}],
                "messages": [{"id": "m1", "role": "user", "content": "hello"}]
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Validation { .. }));
    assert!(err.to_string().contains("bad"));

    dispatcher
        .call(
            &pipe(),
            "set_working_memory",
            json!({
                "session_id": "s1",
                "messages": [
                    {"id": "m1", "role": "user", "content": "hello"},
                    {"id": "m2", "role": "assistant", "content": "hi there"}
                ]
            }),
        )
        .await
        .unwrap();
    dispatcher.wait_idle().await;

    for id in ["m1", "m2"] {
        let record = dispatcher
            .call(&pipe(), "get_long_term_memory", json!({"memory_id": id}))
            .await
            .unwrap();
        assert!(!record["persisted_at"].is_null());
    }
}

#[tokio::test]
async fn test_idempotent_create() {
    let dispatcher = dispatcher(MemoryConfig::new());
    let record = json!([{"id": "fact-1", "text": "User prefers dark mode", "memory_type": "semantic"}]);

    create(&dispatcher, &pipe(), record.clone()).await;
    create(&dispatcher, &pipe(), record).await;

    let results = dispatcher
        .call(&pipe(), "search_long_term_memory", json!({"text": ""}))
        .await
        .unwrap();
    assert_eq!(results["total"], 1);
}

#[tokio::test]
async fn test_filter_only_search_by_user() {
    let dispatcher = dispatcher(MemoryConfig::new());
    create(
        &dispatcher,
        &pipe(),
        json!([
            {"text": "Likes tea", "user_id": "u1", "memory_type": "semantic"},
            {"text": "Likes coffee", "user_id": "u2", "memory_type": "semantic"},
            {"text": "Owns a cat", "user_id": "u1", "memory_type": "semantic"}
        ]),
    )
    .await;

    let results = dispatcher
        .call(
            &pipe(),
            "search_long_term_memory",
            json!({"text": "", "user_id": {"eq": "u1"}}),
        )
        .await
        .unwrap();

    assert_eq!(results["total"], 2);
    for memory in results["memories"].as_array().unwrap() {
        assert_eq!(memory["user_id"], "u1");
    }
}

#[tokio::test]
async fn test_path_namespace_is_injected_into_search() {
    let dispatcher = dispatcher(MemoryConfig::new());
    let acct = TransportContext::stream(Some("acct42"));
    create(
        &dispatcher,
        &pipe(),
        json!([
            {"text": "Tenant fact", "namespace": "acct42", "memory_type": "semantic"},
            {"text": "Other tenant fact", "namespace": "acct7", "memory_type": "semantic"}
        ]),
    )
    .await;

    let injected = dispatcher
        .call(&acct, "search_long_term_memory", json!({"text": ""}))
        .await
        .unwrap();
    let explicit = dispatcher
        .call(
            &pipe(),
            "search_long_term_memory",
            json!({"text": "", "namespace": {"eq": "acct42"}}),
        )
        .await
        .unwrap();

    assert_eq!(texts(&injected), vec!["Tenant fact"]);
    assert_eq!(injected, explicit);
}

#[tokio::test]
async fn test_namespaced_session_is_isolated() {
    let dispatcher = dispatcher(MemoryConfig::new());
    let acct = TransportContext::stream(Some("acct42"));

    let stored = dispatcher
        .call(
            &acct,
            "set_working_memory",
            json!({"session_id": "s1", "messages": [{"role": "user", "content": "scoped"}]}),
        )
        .await
        .unwrap();
    assert_eq!(stored["namespace"], "acct42");

    let unscoped = dispatcher
        .call(&pipe(), "get_working_memory", json!({"session_id": "s1"}))
        .await
        .unwrap();
    assert_eq!(unscoped["messages"], json!([]));

    let scoped = dispatcher
        .call(
            &pipe(),
            "get_working_memory",
            json!({"session_id": "s1", "namespace": "acct42"}),
        )
        .await
        .unwrap();
    assert_eq!(scoped["messages"][0]["content"], "scoped");

    let sessions = dispatcher
        .call(&pipe(), "list_sessions", json!({"namespace": "acct42"}))
        .await
        .unwrap();
    assert_eq!(sessions, json!({"sessions": ["s1"], "total": 1}));
}

#[tokio::test]
async fn test_promotion_after_set_is_monotonic() {
    let dispatcher = dispatcher(MemoryConfig::new());
    let set = json!({
        "session_id": "s1",
        "memories": [{"id": "pref-1", "text": "User prefers window seats", "memory_type": "semantic"}]
    });

    dispatcher.call(&pipe(), "set_working_memory", set.clone()).await.unwrap();
    dispatcher.wait_idle().await;
    let first = dispatcher
        .call(&pipe(), "get_long_term_memory", json!({"memory_id": "pref-1"}))
        .await
        .unwrap();
    assert!(first["persisted_at"].is_string());

    // a later write re-triggers promotion of the same content
    dispatcher.call(&pipe(), "set_working_memory", set).await.unwrap();
    dispatcher.wait_idle().await;
    let second = dispatcher
        .call(&pipe(), "get_long_term_memory", json!({"memory_id": "pref-1"}))
        .await
        .unwrap();

    assert_eq!(first["persisted_at"], second["persisted_at"]);
    let all = dispatcher
        .call(
            &pipe(),
            "search_long_term_memory",
            json!({"text": "", "memory_type": {"eq": "semantic"}}),
        )
        .await
        .unwrap();
    assert_eq!(all["total"], 1);
}

#[tokio::test]
async fn test_edit_event_date_parsing() {
    let dispatcher = dispatcher(MemoryConfig::new());
    create(
        &dispatcher,
        &pipe(),
        json!([{"id": "trip", "text": "Flew to Tokyo", "memory_type": "episodic"}]),
    )
    .await;

    let edited = dispatcher
        .call(
            &pipe(),
            "edit_long_term_memory",
            json!({"memory_id": "trip", "event_date": "2024-01-15T14:30:00Z"}),
        )
        .await
        .unwrap();
    assert_eq!(edited["event_date"], "2024-01-15T14:30:00Z");

    let offset = dispatcher
        .call(
            &pipe(),
            "edit_long_term_memory",
            json!({"memory_id": "trip", "event_date": "2024-01-15T16:30:00+02:00"}),
        )
        .await
        .unwrap();
    assert_eq!(offset["event_date"], "2024-01-15T14:30:00Z");

    let err = dispatcher
        .call(
            &pipe(),
            "edit_long_term_memory",
            json!({"memory_id": "trip", "event_date": "not-a-date"}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Validation { .. }));
    assert!(err.to_string().contains("not-a-date"));
}

#[tokio::test]
async fn test_get_edit_delete_unknown_ids() {
    let dispatcher = dispatcher(MemoryConfig::new());

    let err = dispatcher
        .call(&pipe(), "get_long_term_memory", json!({"memory_id": "nope"}))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::NotFound { .. }));

    let err = dispatcher
        .call(
            &pipe(),
            "edit_long_term_memory",
            json!({"memory_id": "nope", "text": "x"}),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::NotFound { .. }));

    create(&dispatcher, &pipe(), json!([{"id": "a", "text": "alpha"}])).await;
    let ack = dispatcher
        .call(
            &pipe(),
            "delete_long_term_memories",
            json!({"memory_ids": ["a", "nope"]}),
        )
        .await
        .unwrap();
    assert_eq!(ack, json!({"status": "ok", "deleted": 1}));
}

#[tokio::test]
async fn test_long_term_disabled() {
    let dispatcher = dispatcher(MemoryConfig::new().with_long_term_memory(false));

    for (tool, args) in [
        ("create_long_term_memories", json!({"memories": []})),
        ("search_long_term_memory", json!({"text": "x"})),
        ("get_long_term_memory", json!({"memory_id": "a"})),
        ("edit_long_term_memory", json!({"memory_id": "a", "text": "b"})),
        ("delete_long_term_memories", json!({"memory_ids": ["a"]})),
    ] {
        let err = dispatcher.call(&pipe(), tool, args).await.unwrap_err();
        assert!(matches!(err, MemoryError::FeatureDisabled { .. }), "{}", tool);
    }

    // working memory still works and the prompt skips its long-term block
    dispatcher
        .call(
            &pipe(),
            "set_working_memory",
            json!({"session_id": "s1", "messages": [{"role": "user", "content": "hi"}]}),
        )
        .await
        .unwrap();
    let prompt = dispatcher
        .call(
            &pipe(),
            "memory_prompt",
            json!({"query": "hello", "session_id": {"eq": "s1"}}),
        )
        .await
        .unwrap();
    assert_eq!(
        prompt,
        json!({"messages": [
            {"role": "user", "content": "hi"},
            {"role": "user", "content": "hello"}
        ]})
    );
}

#[tokio::test]
async fn test_memory_prompt_hydrates_and_touches() {
    let dispatcher = dispatcher(MemoryConfig::new());
    create(
        &dispatcher,
        &pipe(),
        json!([{"id": "color", "text": "Favorite color is green", "memory_type": "semantic"}]),
    )
    .await;
    let before = dispatcher
        .call(&pipe(), "get_long_term_memory", json!({"memory_id": "color"}))
        .await
        .unwrap();

    dispatcher
        .call(
            &pipe(),
            "set_working_memory",
            json!({
                "session_id": "s1",
                "context": "Chatting about art",
                "messages": [
                    {"role": "user", "content": "Let's paint"},
                    {"role": "assistant", "content": "Sure"}
                ]
            }),
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let prompt = dispatcher
        .call(
            &pipe(),
            "memory_prompt",
            json!({"query": "What is my favorite color?", "session_id": {"eq": "s1"}}),
        )
        .await
        .unwrap();
    dispatcher.wait_idle().await;

    let messages = prompt["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(
        messages[0]["content"],
        "## A summary of the conversation so far:\nChatting about art"
    );
    assert_eq!(messages[1], json!({"role": "user", "content": "Let's paint"}));
    assert_eq!(messages[2], json!({"role": "assistant", "content": "Sure"}));
    assert_eq!(messages[3]["role"], "system");
    assert!(messages[3]["content"]
        .as_str()
        .unwrap()
        .contains("- Favorite color is green\n"));
    assert_eq!(
        messages[4],
        json!({"role": "user", "content": "What is my favorite color?"})
    );

    let after = dispatcher
        .call(&pipe(), "get_long_term_memory", json!({"memory_id": "color"}))
        .await
        .unwrap();
    assert_ne!(before["last_accessed"], after["last_accessed"]);
}

#[tokio::test]
async fn test_defaults_apply_to_created_records() {
    let dispatcher = dispatcher(
        MemoryConfig::new()
            .with_default_namespace("team")
            .with_default_user_id("u9"),
    );
    create(
        &dispatcher,
        &pipe(),
        json!([{"id": "d1", "text": "Default scoped", "memory_type": "semantic"}]),
    )
    .await;

    let record = dispatcher
        .call(&pipe(), "get_long_term_memory", json!({"memory_id": "d1"}))
        .await
        .unwrap();
    assert_eq!(record["namespace"], "team");
    assert_eq!(record["user_id"], "u9");

    // pipe searches pick up the same defaults
    let results = dispatcher
        .call(&pipe(), "search_long_term_memory", json!({"text": ""}))
        .await
        .unwrap();
    assert_eq!(texts(&results), vec!["Default scoped"]);
}

#[tokio::test]
async fn test_unknown_tool_and_current_datetime() {
    let dispatcher = dispatcher(MemoryConfig::new());

    let err = dispatcher.call(&pipe(), "nope", json!({})).await.unwrap_err();
    assert!(matches!(err, MemoryError::UnknownTool(_)));

    let now = dispatcher
        .call(&pipe(), "get_current_datetime", Value::Null)
        .await
        .unwrap();
    let iso = now["iso_utc"].as_str().unwrap();
    assert!(iso.ends_with('Z'));
    assert!(now["unix_ts"].as_i64().unwrap() > 1_700_000_000);
}

#[tokio::test]
async fn test_delete_working_memory() {
    let dispatcher = dispatcher(MemoryConfig::new());
    dispatcher
        .call(
            &pipe(),
            "set_working_memory",
            json!({"session_id": "s1", "messages": [{"role": "user", "content": "bye"}]}),
        )
        .await
        .unwrap();

    let ack = dispatcher
        .call(&pipe(), "delete_working_memory", json!({"session_id": "s1"}))
        .await
        .unwrap();
    assert_eq!(ack, json!({"status": "ok"}));

    let memory = dispatcher
        .call(&pipe(), "get_working_memory", json!({"session_id": "s1"}))
        .await
        .unwrap();
    assert_eq!(memory["messages"], json!([]));
}
