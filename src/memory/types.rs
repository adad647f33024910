use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub type MemoryId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    ShortTerm,
    LongTerm,
    Episodic,
    Semantic,
    Preference,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::ShortTerm => "short_term",
            MemoryType::LongTerm => "long_term",
            MemoryType::Episodic => "episodic",
            MemoryType::Semantic => "semantic",
            MemoryType::Preference => "preference",
        }
    }

    /// Types injected as facts when building context.
    pub const CONTEXT_FACTS: [MemoryType; 3] = [
        MemoryType::Preference,
        MemoryType::Semantic,
        MemoryType::LongTerm,
    ];
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryMetadata {
    pub tags: Vec<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// Conversation role of a short-term turn.
    pub role: Option<String>,
    pub extra: HashMap<String, String>,
}

impl MemoryMetadata {
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryId,
    pub agent_id: String,
    pub memory_type: MemoryType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: MemoryMetadata,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    /// In [0, 1].
    pub importance: f64,
    /// Lifetime in seconds from creation.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl MemoryEntry {
    pub fn new(
        agent_id: impl Into<String>,
        memory_type: MemoryType,
        content: impl Into<String>,
        importance: f64,
    ) -> Self {
        Self::new_at(agent_id, memory_type, content, importance, Utc::now())
    }

    pub fn new_at(
        agent_id: impl Into<String>,
        memory_type: MemoryType,
        content: impl Into<String>,
        importance: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            memory_type,
            content: content.into(),
            embedding: None,
            metadata: MemoryMetadata::default(),
            created_at: now,
            accessed_at: now,
            access_count: 0,
            importance: if importance.is_finite() {
                importance.clamp(0.0, 1.0)
            } else {
                0.0
            },
            ttl_seconds: None,
        }
    }

    pub fn with_metadata(mut self, metadata: MemoryMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.ttl_seconds
            .map(|ttl| self.created_at + Duration::seconds(ttl.min(i64::MAX as u64) as i64))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }
}

/// Long-term retrieval filter. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryQuery {
    pub agent_id: String,
    pub types: Vec<MemoryType>,
    /// Matches entries carrying any of these tags.
    pub tags: Vec<String>,
    pub session_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_importance: Option<f64>,
    pub text: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub limit: Option<usize>,
}

impl MemoryQuery {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = MemoryType>) -> Self {
        self.types = types.into_iter().collect();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_min_importance(mut self, min_importance: f64) -> Self {
        self.min_importance = Some(min_importance);
        self
    }
}

/// Weights of the long-term ranking score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub importance: f64,
    pub recency: f64,
    pub relevance: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            importance: 0.4,
            recency: 0.2,
            relevance: 0.4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum MemoryStoreConfig {
    #[default]
    InMemory,
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    /// Turns kept per (agent, session).
    pub short_term_capacity: usize,
    pub long_term_enabled: bool,
    pub vector_search: bool,
    /// Share of the chosen model's context window given to assembled context.
    pub context_window_ratio: f64,
    /// Facts considered when building context.
    pub max_context_facts: usize,
    pub recency_half_life_hours: f64,
    pub ranking: RankingWeights,
    pub store: MemoryStoreConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            short_term_capacity: 20,
            long_term_enabled: true,
            vector_search: false,
            context_window_ratio: 0.5,
            max_context_facts: 8,
            recency_half_life_hours: 72.0,
            ranking: RankingWeights::default(),
            store: MemoryStoreConfig::InMemory,
        }
    }
}

/// Counters for one (agent, session) buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub agent_id: String,
    pub session_id: String,
    pub turns: usize,
    pub capacity: usize,
    /// Turns pushed out of the buffer since it was created.
    pub evicted: u64,
    pub estimated_tokens: u64,
    pub last_activity: Option<DateTime<Utc>>,
}
