use crate::error::AIError;
use crate::llm::types::{MESSAGE_OVERHEAD_TOKENS, Message, MessageRole, estimate_tokens};
use crate::memory::ring::RingBuffer;
use crate::memory::store::MemoryStore;
use crate::memory::types::{
    MemoryConfig, MemoryEntry, MemoryId, MemoryMetadata, MemoryQuery, MemoryType, SessionStats,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Results returned by [`MemoryManager::retrieve`] when the query sets no limit.
pub const DEFAULT_RETRIEVE_LIMIT: usize = 10;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "with", "this", "that", "was",
    "have", "has", "from", "what", "when", "how", "can", "about", "into", "its", "our",
];

type SessionKey = (String, String);

/// Short-term turn buffers plus access to the long-term store.
pub struct MemoryManager {
    config: MemoryConfig,
    store: Arc<dyn MemoryStore>,
    short_term: DashMap<SessionKey, RingBuffer<MemoryEntry>>,
}

/// A long-term entry with its ranking score.
#[derive(Debug, Clone)]
struct Ranked {
    entry: MemoryEntry,
    score: f64,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig, store: Arc<dyn MemoryStore>) -> Self {
        Self {
            config,
            store,
            short_term: DashMap::new(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn add_to_short_term(&self, agent_id: &str, session_id: &str, message: &Message) -> Option<MemoryEntry> {
        self.add_to_short_term_at(agent_id, session_id, message, Utc::now())
    }

    /// Record a conversation turn. System and tool messages are not turns and are
    /// ignored. Returns the turn evicted to make room, if any.
    pub fn add_to_short_term_at(
        &self,
        agent_id: &str,
        session_id: &str,
        message: &Message,
        now: DateTime<Utc>,
    ) -> Option<MemoryEntry> {
        if !matches!(message.role, MessageRole::User | MessageRole::Assistant) {
            return None;
        }

        let metadata = MemoryMetadata {
            session_id: Some(session_id.to_string()),
            role: Some(message.role.as_str().to_string()),
            ..Default::default()
        };
        let entry = MemoryEntry::new_at(agent_id, MemoryType::ShortTerm, message.content.clone(), 0.5, now)
            .with_metadata(metadata);

        let capacity = self.config.short_term_capacity;
        let mut buffer = self
            .short_term
            .entry((agent_id.to_string(), session_id.to_string()))
            .or_insert_with(|| RingBuffer::new(capacity));
        let evicted = buffer.push(entry);
        if evicted.is_some() {
            debug!(agent_id, session_id, capacity = buffer.capacity(), "evicted oldest short-term turn");
        }
        evicted
    }

    /// Turns of a session, oldest first.
    pub fn short_term(&self, agent_id: &str, session_id: &str) -> Vec<MemoryEntry> {
        self.short_term
            .get(&(agent_id.to_string(), session_id.to_string()))
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn store_long_term(
        &self,
        agent_id: &str,
        content: impl Into<String>,
        memory_type: MemoryType,
        metadata: MemoryMetadata,
        importance: f64,
    ) -> Result<MemoryEntry, AIError> {
        let entry = MemoryEntry::new(agent_id, memory_type, content, importance).with_metadata(metadata);
        self.store_entry(entry).await
    }

    /// Persist a fully built entry (embedding, TTL and so on already set).
    pub async fn store_entry(&self, entry: MemoryEntry) -> Result<MemoryEntry, AIError> {
        if !self.config.long_term_enabled {
            return Err(AIError::InvalidRequest("long-term memory is disabled".to_string()));
        }
        if entry.memory_type == MemoryType::ShortTerm {
            return Err(AIError::InvalidRequest(
                "short-term entries are recorded per session, not stored".to_string(),
            ));
        }
        if entry.agent_id.is_empty() {
            return Err(AIError::InvalidRequest("memory entry needs an agent id".to_string()));
        }

        debug!(
            agent_id = %entry.agent_id,
            memory_type = %entry.memory_type,
            importance = entry.importance,
            "storing long-term memory"
        );
        self.store.put(entry.clone()).await?;
        Ok(entry)
    }

    pub async fn retrieve(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>, AIError> {
        self.retrieve_at(query, Utc::now()).await
    }

    /// Filter, rank and limit long-term entries, then mark the returned ones as accessed.
    pub async fn retrieve_at(&self, query: &MemoryQuery, now: DateTime<Utc>) -> Result<Vec<MemoryEntry>, AIError> {
        let ranked = self.rank_at(query, now).await?;
        let mut entries: Vec<MemoryEntry> = ranked.into_iter().map(|r| r.entry).collect();

        if !entries.is_empty() {
            let ids: Vec<MemoryId> = entries.iter().map(|e| e.id).collect();
            self.store.update_access(&ids, now).await?;
            for entry in &mut entries {
                entry.accessed_at = now;
                entry.access_count += 1;
            }
        }
        Ok(entries)
    }

    async fn rank_at(&self, query: &MemoryQuery, now: DateTime<Utc>) -> Result<Vec<Ranked>, AIError> {
        let query_terms = query.text.as_deref().map(keywords).unwrap_or_default();
        let weights = &self.config.ranking;

        let mut ranked: Vec<Ranked> = self
            .store
            .list(&query.agent_id)
            .await?
            .into_iter()
            .filter(|e| matches_query(e, query, now))
            .map(|entry| {
                let relevance = self.relevance(&entry, query, &query_terms);
                let score = weights.importance * entry.importance
                    + weights.recency * self.recency(&entry, now)
                    + weights.relevance * relevance;
                Ranked { entry, score }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        ranked.truncate(query.limit.unwrap_or(DEFAULT_RETRIEVE_LIMIT));
        Ok(ranked)
    }

    /// Half-life decay on the time since last access.
    fn recency(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
        let half_life = self.config.recency_half_life_hours;
        if half_life <= 0.0 {
            return 0.0;
        }
        let age_hours = (now - entry.accessed_at).num_seconds().max(0) as f64 / 3600.0;
        0.5_f64.powf(age_hours / half_life)
    }

    fn relevance(&self, entry: &MemoryEntry, query: &MemoryQuery, query_terms: &HashSet<String>) -> f64 {
        if self.config.vector_search
            && let (Some(a), Some(b)) = (query.embedding.as_deref(), entry.embedding.as_deref())
            && let Some(similarity) = cosine_similarity(a, b)
        {
            return similarity.clamp(0.0, 1.0);
        }
        if query_terms.is_empty() {
            return 0.0;
        }
        let entry_terms = keywords(&entry.content);
        let overlap = query_terms.intersection(&entry_terms).count();
        overlap as f64 / query_terms.len() as f64
    }

    pub async fn build_context(
        &self,
        agent_id: &str,
        session_id: &str,
        current_input: &str,
        token_budget: u64,
    ) -> Result<Vec<Message>, AIError> {
        self.build_context_at(agent_id, session_id, current_input, token_budget, Utc::now())
            .await
    }

    /// Facts, then session turns oldest to newest, then the current input, trimmed
    /// to `token_budget`.
    ///
    /// Trimming drops the oldest turns, then the lowest-ranked facts while more than
    /// one remains, then the last fact, and only then truncates the current input.
    /// Returns nothing when even an empty input message would not fit.
    pub async fn build_context_at(
        &self,
        agent_id: &str,
        session_id: &str,
        current_input: &str,
        token_budget: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Message>, AIError> {
        if token_budget < MESSAGE_OVERHEAD_TOKENS {
            debug!(agent_id, token_budget, "budget below a single message");
            return Ok(Vec::new());
        }

        let mut facts: Vec<Message> = if self.config.long_term_enabled && self.config.max_context_facts > 0 {
            let query = MemoryQuery::for_agent(agent_id)
                .with_types(MemoryType::CONTEXT_FACTS)
                .with_text(current_input)
                .with_limit(self.config.max_context_facts);
            self.retrieve_at(&query, now)
                .await?
                .into_iter()
                .map(|e| Message::system(format!("Memory ({}): {}", e.memory_type, e.content)))
                .collect()
        } else {
            Vec::new()
        };

        let mut turns: Vec<Message> = self
            .short_term(agent_id, session_id)
            .into_iter()
            .map(|entry| {
                let role = match entry.metadata.role.as_deref() {
                    Some("assistant") => MessageRole::Assistant,
                    _ => MessageRole::User,
                };
                Message::new(role, entry.content)
            })
            .collect();

        let mut input = Message::user(current_input);
        let tokens = |messages: &[Message]| messages.iter().map(Message::estimated_tokens).sum::<u64>();
        let mut total = tokens(facts.as_slice()) + tokens(turns.as_slice()) + input.estimated_tokens();
        let (mut dropped_turns, mut dropped_facts) = (0usize, 0usize);

        while total > token_budget {
            if !turns.is_empty() {
                total -= turns.remove(0).estimated_tokens();
                dropped_turns += 1;
            } else if let Some(fact) = facts.pop() {
                total -= fact.estimated_tokens();
                dropped_facts += 1;
            } else {
                let room = token_budget - MESSAGE_OVERHEAD_TOKENS;
                let max_chars = (room as f64 * crate::llm::types::CHARS_PER_TOKEN) as usize;
                input.content = input.content.chars().take(max_chars).collect();
                while estimate_tokens(&input.content) > room {
                    input.content.pop();
                }
                info!(agent_id, session_id, token_budget, "truncated current input to fit context budget");
                total = input.estimated_tokens();
            }
        }

        if dropped_turns > 0 || dropped_facts > 0 {
            debug!(agent_id, session_id, dropped_turns, dropped_facts, total, "trimmed context");
        }

        let mut context = facts;
        context.append(&mut turns);
        context.push(input);
        Ok(context)
    }

    /// Drop a session's turns; returns how many were held.
    pub fn clear_session(&self, agent_id: &str, session_id: &str) -> usize {
        self.short_term
            .remove(&(agent_id.to_string(), session_id.to_string()))
            .map(|(_, buffer)| buffer.len())
            .unwrap_or(0)
    }

    /// Remove one long-term entry.
    pub async fn forget(&self, id: MemoryId) -> Result<bool, AIError> {
        self.store.delete(id).await
    }

    /// Remove every session buffer and long-term entry of an agent.
    pub async fn forget_agent(&self, agent_id: &str) -> Result<usize, AIError> {
        self.short_term.retain(|(agent, _), _| agent != agent_id);
        let removed = self.store.delete_agent(agent_id).await?;
        info!(agent_id, removed, "forgot agent memory");
        Ok(removed)
    }

    pub async fn purge_expired(&self) -> Result<usize, AIError> {
        self.store.purge_expired(Utc::now()).await
    }

    pub fn session_stats(&self, agent_id: &str, session_id: &str) -> Option<SessionStats> {
        self.short_term
            .get(&(agent_id.to_string(), session_id.to_string()))
            .map(|buffer| SessionStats {
                agent_id: agent_id.to_string(),
                session_id: session_id.to_string(),
                turns: buffer.len(),
                capacity: buffer.capacity(),
                evicted: buffer.evicted(),
                estimated_tokens: buffer
                    .iter()
                    .map(|e| estimate_tokens(&e.content) + MESSAGE_OVERHEAD_TOKENS)
                    .sum(),
                last_activity: buffer.newest().map(|e| e.created_at),
            })
    }
}

fn matches_query(entry: &MemoryEntry, query: &MemoryQuery, now: DateTime<Utc>) -> bool {
    if entry.is_expired_at(now) {
        return false;
    }
    if !query.types.is_empty() && !query.types.contains(&entry.memory_type) {
        return false;
    }
    if !query.tags.is_empty() && !query.tags.iter().any(|t| entry.metadata.tags.contains(t)) {
        return false;
    }
    if let Some(ref session) = query.session_id
        && entry.metadata.session_id.as_ref() != Some(session)
    {
        return false;
    }
    if query.since.is_some_and(|since| entry.created_at < since)
        || query.until.is_some_and(|until| entry.created_at > until)
    {
        return false;
    }
    query.min_importance.is_none_or(|min| entry.importance >= min)
}

/// Lowercased content words of three or more characters, minus stopwords.
fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0, 0.0, 0.0), |(dot, na, nb), (x, y)| {
        let (x, y) = (*x as f64, *y as f64);
        (dot + x * y, na + x * x, nb + y * y)
    });
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
