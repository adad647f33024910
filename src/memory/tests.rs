use super::*;
use crate::error::AIError;
use crate::llm::types::Message;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

fn manager(config: MemoryConfig) -> MemoryManager {
    MemoryManager::new(config, Arc::new(InMemoryMemoryStore::new()))
}

fn padded(text: &str) -> String {
    format!("{:<40}", text)
}

fn token_total(messages: &[Message]) -> u64 {
    messages.iter().map(Message::estimated_tokens).sum()
}

#[test]
fn test_short_term_never_exceeds_capacity() {
    let memory = manager(MemoryConfig {
        short_term_capacity: 3,
        ..Default::default()
    });

    for i in 0..10 {
        memory.add_to_short_term("agent", "s1", &Message::user(format!("turn {}", i)));
        assert!(memory.short_term("agent", "s1").len() <= 3);
    }

    let kept: Vec<String> = memory
        .short_term("agent", "s1")
        .into_iter()
        .map(|e| e.content)
        .collect();
    assert_eq!(kept, vec!["turn 7", "turn 8", "turn 9"]);

    let stats = memory.session_stats("agent", "s1").unwrap();
    assert_eq!(stats.turns, 3);
    assert_eq!(stats.capacity, 3);
    assert_eq!(stats.evicted, 7);
}

#[test]
fn test_sessions_are_isolated_and_system_messages_skipped() {
    let memory = manager(MemoryConfig::default());
    memory.add_to_short_term("agent", "s1", &Message::user("hello"));
    memory.add_to_short_term("agent", "s1", &Message::system("be terse"));
    memory.add_to_short_term("agent", "s1", &Message::tool_result("call-1", "42"));
    memory.add_to_short_term("agent", "s2", &Message::assistant("hi"));

    assert_eq!(memory.short_term("agent", "s1").len(), 1);
    assert_eq!(memory.short_term("agent", "s2").len(), 1);
    assert!(memory.short_term("other", "s1").is_empty());

    assert_eq!(memory.clear_session("agent", "s1"), 1);
    assert!(memory.session_stats("agent", "s1").is_none());
    assert!(memory.session_stats("agent", "s2").is_some());
}

#[tokio::test]
async fn test_build_context_drops_oldest_turns_first() {
    let memory = manager(MemoryConfig::default());
    for i in 0..6 {
        memory.add_to_short_term("agent", "s1", &Message::user(padded(&format!("turn {}", i))));
    }

    let context = memory.build_context("agent", "s1", "hello there", 50).await.unwrap();

    assert!(token_total(&context) <= 50);
    assert_eq!(context.len(), 4);
    assert_eq!(context[0].content.trim_end(), "turn 3");
    let input = context.last().unwrap();
    assert_eq!(input.role, crate::llm::types::MessageRole::User);
    assert_eq!(input.content, "hello there");
}

#[tokio::test]
async fn test_build_context_truncates_input_last() {
    let memory = manager(MemoryConfig::default());
    memory.add_to_short_term("agent", "s1", &Message::assistant("earlier answer"));

    let long_input = "a".repeat(100);
    let context = memory.build_context("agent", "s1", &long_input, 10).await.unwrap();

    assert_eq!(context.len(), 1);
    assert!(token_total(&context) <= 10);
    assert_eq!(context[0].content, "a".repeat(24));
}

#[tokio::test]
async fn test_build_context_with_tiny_budget_is_empty() {
    let memory = manager(MemoryConfig::default());
    let context = memory.build_context("agent", "s1", "hello", 3).await.unwrap();
    assert!(context.is_empty());
}

#[tokio::test]
async fn test_build_context_orders_facts_turns_input() {
    let memory = manager(MemoryConfig::default());
    memory
        .store_long_term("agent", "User prefers metric units", MemoryType::Preference, MemoryMetadata::default(), 0.9)
        .await
        .unwrap();
    memory
        .store_long_term("agent", "Paris is the capital of France", MemoryType::Semantic, MemoryMetadata::default(), 0.3)
        .await
        .unwrap();
    memory
        .store_long_term("agent", "Met the user at a conference", MemoryType::Episodic, MemoryMetadata::default(), 1.0)
        .await
        .unwrap();
    memory.add_to_short_term("agent", "s1", &Message::user("hi"));

    let context = memory
        .build_context("agent", "s1", "What is the capital of France?", 1_000)
        .await
        .unwrap();

    assert_eq!(context.len(), 4);
    assert!(context[0].content.contains("Paris"));
    assert!(context[1].content.contains("metric"));
    assert_eq!(context[2].content, "hi");
    assert_eq!(context[3].content, "What is the capital of France?");
    // episodic memories are not injected as facts
    assert!(context.iter().all(|m| !m.content.contains("conference")));
}

#[tokio::test]
async fn test_build_context_keeps_top_fact_longest() {
    let memory = manager(MemoryConfig::default());
    memory
        .store_long_term("agent", "User prefers metric units", MemoryType::Preference, MemoryMetadata::default(), 0.9)
        .await
        .unwrap();
    memory
        .store_long_term("agent", "Paris is the capital of France", MemoryType::Semantic, MemoryMetadata::default(), 0.3)
        .await
        .unwrap();
    memory.add_to_short_term("agent", "s1", &Message::user("x".repeat(40)));

    let context = memory
        .build_context("agent", "s1", "What is the capital of France?", 30)
        .await
        .unwrap();

    assert!(token_total(&context) <= 30);
    assert_eq!(context.len(), 2);
    assert!(context[0].content.contains("Paris"));
    assert_eq!(context[1].content, "What is the capital of France?");
}

#[tokio::test]
async fn test_retrieve_applies_filters_and_ttl() {
    let memory = manager(MemoryConfig::default());
    let now = Utc::now();

    memory
        .store_entry(
            MemoryEntry::new_at("agent", MemoryType::Semantic, "expired fact", 1.0, now - Duration::hours(2))
                .with_ttl(60),
        )
        .await
        .unwrap();
    memory
        .store_entry(
            MemoryEntry::new_at("agent", MemoryType::Semantic, "tagged fact", 0.7, now)
                .with_metadata(MemoryMetadata::default().with_tags(["billing"])),
        )
        .await
        .unwrap();
    memory
        .store_entry(MemoryEntry::new_at("agent", MemoryType::Semantic, "minor fact", 0.1, now))
        .await
        .unwrap();
    memory
        .store_entry(MemoryEntry::new_at("agent", MemoryType::Episodic, "an episode", 0.9, now))
        .await
        .unwrap();
    memory
        .store_entry(MemoryEntry::new_at("someone-else", MemoryType::Semantic, "foreign", 1.0, now))
        .await
        .unwrap();

    let all = memory.retrieve_at(&MemoryQuery::for_agent("agent"), now).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|e| e.content != "expired fact"));
    assert_eq!(all[0].content, "an episode");

    let semantic = memory
        .retrieve_at(
            &MemoryQuery::for_agent("agent")
                .with_types([MemoryType::Semantic])
                .with_min_importance(0.5),
            now,
        )
        .await
        .unwrap();
    assert_eq!(semantic.len(), 1);
    assert_eq!(semantic[0].content, "tagged fact");

    let tagged = memory
        .retrieve_at(
            &MemoryQuery {
                tags: vec!["billing".into(), "shipping".into()],
                ..MemoryQuery::for_agent("agent")
            },
            now,
        )
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);

    let limited = memory
        .retrieve_at(&MemoryQuery::for_agent("agent").with_limit(1), now)
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_retrieve_updates_access_statistics() {
    let memory = manager(MemoryConfig::default());
    let entry = memory
        .store_long_term("agent", "likes jazz", MemoryType::Preference, MemoryMetadata::default(), 0.5)
        .await
        .unwrap();

    memory.retrieve(&MemoryQuery::for_agent("agent")).await.unwrap();
    let second = memory.retrieve(&MemoryQuery::for_agent("agent")).await.unwrap();

    assert_eq!(second[0].access_count, 2);
    let stored = memory.store().get(entry.id).await.unwrap().unwrap();
    assert_eq!(stored.access_count, 2);
}

#[tokio::test]
async fn test_vector_search_ranks_by_similarity() {
    let memory = manager(MemoryConfig {
        vector_search: true,
        ..Default::default()
    });
    let now = Utc::now();
    memory
        .store_entry(MemoryEntry::new_at("agent", MemoryType::Semantic, "orthogonal", 0.5, now).with_embedding(vec![0.0, 1.0]))
        .await
        .unwrap();
    memory
        .store_entry(MemoryEntry::new_at("agent", MemoryType::Semantic, "aligned", 0.5, now).with_embedding(vec![1.0, 0.1]))
        .await
        .unwrap();

    let query = MemoryQuery {
        embedding: Some(vec![1.0, 0.0]),
        ..MemoryQuery::for_agent("agent")
    };
    let results = memory.retrieve_at(&query, now).await.unwrap();
    assert_eq!(results[0].content, "aligned");
}

#[tokio::test]
async fn test_store_long_term_rejects_short_term_and_disabled() {
    let memory = manager(MemoryConfig::default());
    let result = memory
        .store_long_term("agent", "turn", MemoryType::ShortTerm, MemoryMetadata::default(), 0.5)
        .await;
    assert!(matches!(result, Err(AIError::InvalidRequest(_))));

    let disabled = manager(MemoryConfig {
        long_term_enabled: false,
        ..Default::default()
    });
    let result = disabled
        .store_long_term("agent", "fact", MemoryType::Semantic, MemoryMetadata::default(), 0.5)
        .await;
    assert!(matches!(result, Err(AIError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_forget_and_forget_agent() {
    let memory = manager(MemoryConfig::default());
    let kept = memory
        .store_long_term("agent", "one", MemoryType::Semantic, MemoryMetadata::default(), 0.5)
        .await
        .unwrap();
    let gone = memory
        .store_long_term("agent", "two", MemoryType::Semantic, MemoryMetadata::default(), 0.5)
        .await
        .unwrap();
    memory.add_to_short_term("agent", "s1", &Message::user("hello"));

    assert!(memory.forget(gone.id).await.unwrap());
    assert!(!memory.forget(gone.id).await.unwrap());
    assert!(memory.store().get(kept.id).await.unwrap().is_some());

    assert_eq!(memory.forget_agent("agent").await.unwrap(), 1);
    assert!(memory.short_term("agent", "s1").is_empty());
}

#[tokio::test]
async fn test_file_backed_manager_reloads_facts() {
    let dir = TempDir::new().unwrap();
    let config = MemoryStoreConfig::File {
        path: dir.path().join("memory.json"),
    };

    let memory = MemoryManager::new(MemoryConfig::default(), open_store(&config).await.unwrap());
    memory
        .store_long_term("agent", "prefers dark mode", MemoryType::Preference, MemoryMetadata::default(), 0.8)
        .await
        .unwrap();
    drop(memory);

    let reopened = MemoryManager::new(MemoryConfig::default(), open_store(&config).await.unwrap());
    let facts = reopened.retrieve(&MemoryQuery::for_agent("agent")).await.unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].content, "prefers dark mode");
}
