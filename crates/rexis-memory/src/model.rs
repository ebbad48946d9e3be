//! Memory data model
//!
//! - [`MemoryRecord`]: a unit of durable knowledge (semantic fact, episodic event,
//!   or an indexed conversation message)
//! - [`MemoryMessage`]: one conversation turn held in working memory
//! - [`WorkingMemory`]: the per-session container that is replaced wholesale on
//!   every write
//!
//! `persisted_at` is the promotion flag on both records and messages: `None` means
//! the item only lives in working memory and is waiting for promotion, `Some`
//! means it was durably written to long-term storage.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Default working-memory TTL in seconds
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Generate a lexicographically sortable unique id (UUID v7)
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Kind of long-term memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Timeless facts and preferences
    Semantic,
    /// Time-bound events; should carry an `event_date`
    Episodic,
    /// A conversation message indexed verbatim
    #[default]
    Message,
}

impl MemoryType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Semantic => "semantic",
            MemoryType::Episodic => "episodic",
            MemoryType::Message => "message",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable memory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MemoryRecord {
    /// Record id; empty until assigned at ingestion
    #[serde(default)]
    pub id: String,

    /// Memory content
    pub text: String,

    /// Memory kind
    #[serde(default)]
    pub memory_type: MemoryType,

    /// Tenant namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Owning user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Session the memory came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Topics (matched as a set)
    #[serde(default)]
    pub topics: Vec<String>,

    /// Entities (matched as a set)
    #[serde(default)]
    pub entities: Vec<String>,

    /// When the described event happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<DateTime<Utc>>,

    /// Server-assigned creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Last time the record was returned by a search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,

    /// Last partial update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Promotion flag; `None` while pending
    #[serde(default)]
    pub persisted_at: Option<DateTime<Utc>>,

    /// Server-computed content fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_hash: Option<String>,
}

impl MemoryRecord {
    /// Create a pending record with a fresh id
    pub fn new(text: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            memory_type,
            namespace: None,
            user_id: None,
            session_id: None,
            topics: Vec::new(),
            entities: Vec::new(),
            event_date: None,
            created_at: None,
            last_accessed: None,
            updated_at: None,
            persisted_at: None,
            memory_hash: None,
        }
    }

    /// Set the id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the user
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the session
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set topics
    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    /// Set entities
    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = entities;
        self
    }

    /// Set the event date
    pub fn with_event_date(mut self, event_date: DateTime<Utc>) -> Self {
        self.event_date = Some(event_date);
        self
    }

    /// Whether the record is still waiting for promotion
    pub fn is_pending(&self) -> bool {
        self.persisted_at.is_none()
    }

    /// Fingerprint of the logical content: normalized text plus scope
    ///
    /// Two records with the same fingerprint are duplicates for create-time dedup.
    pub fn content_hash(&self) -> String {
        let normalized = self.text.split_whitespace().collect::<Vec<_>>().join(" ");

        let mut hasher = Sha256::new();
        hasher.update(normalized.to_lowercase().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.user_id.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.session_id.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.memory_type.as_str().as_bytes());

        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End user
    User,
    /// Model output
    Assistant,
    /// System instructions
    System,
}

impl MessageRole {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MemoryMessage {
    /// Message id; empty until assigned at ingestion
    #[serde(default)]
    pub id: String,

    /// Speaker
    pub role: MessageRole,

    /// Message text
    pub content: String,

    /// Promotion flag; `None` while pending
    #[serde(default)]
    pub persisted_at: Option<DateTime<Utc>>,
}

impl MemoryMessage {
    /// Create a pending message with a fresh id
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            persisted_at: None,
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Whether the message is still waiting for promotion
    pub fn is_pending(&self) -> bool {
        self.persisted_at.is_none()
    }
}

/// Which extraction strategy promotes this session's messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MemoryStrategyConfig {
    /// Registered strategy name
    #[serde(default = "default_strategy_name")]
    pub strategy: String,

    /// Strategy-specific options
    #[serde(default)]
    pub config: Map<String, Value>,
}

fn default_strategy_name() -> String {
    crate::extraction::DEFAULT_STRATEGY.to_string()
}

impl Default for MemoryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy_name(),
            config: Map::new(),
        }
    }
}

fn default_ttl_seconds() -> u64 {
    DEFAULT_TTL_SECONDS
}

/// Session-scoped scratch memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkingMemory {
    /// Session id
    pub session_id: String,

    /// Conversation in chronological order
    #[serde(default)]
    pub messages: Vec<MemoryMessage>,

    /// Structured memories waiting for promotion
    #[serde(default)]
    pub memories: Vec<MemoryRecord>,

    /// Conversation summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Caller-defined structured data
    #[serde(default)]
    pub data: Map<String, Value>,

    /// Tenant namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Owning user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Inactivity TTL
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Strategy used when promoting messages
    #[serde(default)]
    pub long_term_memory_strategy: MemoryStrategyConfig,

    /// Server-stamped time of the last write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl WorkingMemory {
    /// Create an empty working memory for a session
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            memories: Vec::new(),
            context: None,
            data: Map::new(),
            namespace: None,
            user_id: None,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            long_term_memory_strategy: MemoryStrategyConfig::default(),
            last_accessed: None,
        }
    }

    /// The value returned for a missing or expired session
    pub fn empty(session_id: &str, namespace: Option<&str>, user_id: Option<&str>) -> Self {
        let mut memory = Self::new(session_id);
        memory.namespace = namespace.map(String::from);
        memory.user_id = user_id.map(String::from);
        memory
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the user
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set messages
    pub fn with_messages(mut self, messages: Vec<MemoryMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Set memories
    pub fn with_memories(mut self, memories: Vec<MemoryRecord>) -> Self {
        self.memories = memories;
        self
    }

    /// Set the TTL
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Whether anything in this working memory still needs promotion
    pub fn has_pending(&self) -> bool {
        self.memories.iter().any(MemoryRecord::is_pending)
            || self.messages.iter().any(MemoryMessage::is_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_sort_by_creation() {
        let first = new_id();
        let second = new_id();
        assert!(!first.is_empty());
        assert!(first < second);
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let record: MemoryRecord =
            serde_json::from_value(serde_json::json!({"text": "User prefers dark mode"})).unwrap();

        assert!(record.id.is_empty());
        assert_eq!(record.memory_type, MemoryType::Message);
        assert!(record.topics.is_empty());
        assert!(record.is_pending());
    }

    #[test]
    fn test_content_hash_ignores_whitespace_and_case() {
        let a = MemoryRecord::new("User  prefers dark mode", MemoryType::Semantic).with_user_id("u1");
        let b = MemoryRecord::new("user prefers DARK mode ", MemoryType::Semantic).with_user_id("u1");
        let c = MemoryRecord::new("User prefers dark mode", MemoryType::Semantic).with_user_id("u2");

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_working_memory_empty_shape() {
        let empty = WorkingMemory::empty("s1", None, None);
        let json = serde_json::to_value(&empty).unwrap();

        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["messages"], serde_json::json!([]));
        assert_eq!(json["memories"], serde_json::json!([]));
        assert_eq!(json["ttl_seconds"], 3600);
        assert!(!empty.has_pending());
    }

    #[test]
    fn test_has_pending_tracks_persisted_at() {
        let mut message = MemoryMessage::user("hi");
        let memory = WorkingMemory::new("s1").with_messages(vec![message.clone()]);
        assert!(memory.has_pending());

        message.persisted_at = Some(Utc::now());
        let memory = WorkingMemory::new("s1").with_messages(vec![message]);
        assert!(!memory.has_pending());
    }
}
