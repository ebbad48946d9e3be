//! Working memory - session-scoped scratch store
//!
//! Working memory holds the live conversation of a session: its messages, any
//! structured memories the agent wants promoted, a running summary and free-form
//! data. It is addressed by `(namespace, user_id, session_id)` and lives under
//! `working_memory::{namespace}::{user_id}::{session_id}` with a TTL.
//!
//! Every write replaces the whole value and restarts the TTL. Nothing is merged:
//! if two writers race, the last one to reach the store wins.

use crate::clock::{Clock, SystemClock};
use crate::error::{MemoryError, MemoryResult};
use crate::model::WorkingMemory;
use crate::storage::{
    escape_segment, get_json, scope_segment, set_json, unescape_segment, Storage, UNSCOPED,
};
use std::sync::Arc;
use std::time::Duration;

const KEY_PREFIX: &str = "working_memory";

/// Session working memory backed by a TTL-capable key-value store
#[derive(Clone)]
pub struct WorkingMemoryStore {
    /// Storage backend
    storage: Arc<dyn Storage>,

    /// Timestamp source for `last_accessed`
    clock: Arc<dyn Clock>,
}

impl WorkingMemoryStore {
    /// Create a working memory store
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a specific clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Read a session's working memory
    ///
    /// Missing or expired sessions yield [`WorkingMemory::empty`], never an error.
    /// With `recent_messages_limit`, only the newest N messages are returned, still
    /// oldest first.
    pub async fn get(
        &self,
        session_id: &str,
        namespace: Option<&str>,
        user_id: Option<&str>,
        recent_messages_limit: Option<usize>,
    ) -> MemoryResult<WorkingMemory> {
        let key = Self::make_key(session_id, namespace, user_id);

        let Some(mut memory) = get_json::<WorkingMemory>(self.storage.as_ref(), &key).await? else {
            tracing::debug!(session_id, key = %key, "no working memory, returning empty");
            return Ok(WorkingMemory::empty(session_id, namespace, user_id));
        };

        if let Some(limit) = recent_messages_limit {
            let excess = memory.messages.len().saturating_sub(limit);
            memory.messages.drain(..excess);
        }

        Ok(memory)
    }

    /// Replace a session's working memory and restart its TTL
    ///
    /// Ids must already be assigned; this layer validates, it never fills in.
    pub async fn set(&self, mut memory: WorkingMemory) -> MemoryResult<WorkingMemory> {
        Self::validate(&memory)?;

        for record in &mut memory.memories {
            record.persisted_at = None;
        }
        for message in &mut memory.messages {
            message.persisted_at = None;
        }
        memory.last_accessed = Some(self.clock.now());

        let key = Self::make_key(
            &memory.session_id,
            memory.namespace.as_deref(),
            memory.user_id.as_deref(),
        );
        let ttl = Duration::from_secs(memory.ttl_seconds);
        set_json(self.storage.as_ref(), &key, &memory, Some(ttl)).await?;

        tracing::debug!(
            session_id = %memory.session_id,
            messages = memory.messages.len(),
            memories = memory.memories.len(),
            ttl_seconds = memory.ttl_seconds,
            "working memory replaced"
        );

        Ok(memory)
    }

    /// Delete a session's working memory; returns whether it existed
    pub async fn delete(
        &self,
        session_id: &str,
        namespace: Option<&str>,
        user_id: Option<&str>,
    ) -> MemoryResult<bool> {
        let key = Self::make_key(session_id, namespace, user_id);
        self.storage.delete(&key).await
    }

    /// List live session ids, sorted, optionally within one namespace
    ///
    /// Returns the total count and the requested page.
    pub async fn list_sessions(
        &self,
        namespace: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> MemoryResult<(usize, Vec<String>)> {
        let prefix = match namespace {
            Some(ns) => format!("{}::{}::", KEY_PREFIX, escape_segment(ns)),
            None => format!("{}::", KEY_PREFIX),
        };

        let mut sessions: Vec<String> = self
            .storage
            .keys(&prefix)
            .await?
            .iter()
            .filter_map(|key| Self::parse_key(key))
            .map(|(_, _, session)| session)
            .collect();
        sessions.sort();
        sessions.dedup();

        let total = sessions.len();
        let page = sessions.into_iter().skip(offset).take(limit).collect();
        Ok((total, page))
    }

    fn validate(memory: &WorkingMemory) -> MemoryResult<()> {
        if memory.session_id.trim().is_empty() {
            return Err(MemoryError::validation("session_id", "session_id must not be empty"));
        }

        if memory.ttl_seconds == 0 {
            return Err(MemoryError::validation("ttl_seconds", "ttl_seconds must be positive"));
        }

        if memory.memories.iter().any(|m| m.id.trim().is_empty()) {
            return Err(MemoryError::validation(
                "memories",
                "All memory records in working memory must have an ID",
            ));
        }

        if let Some(record) = memory.memories.iter().find(|m| m.text.trim().is_empty()) {
            return Err(MemoryError::validation(
                "memories",
                format!("Memory text cannot be empty (memory ID: {})", record.id),
            ));
        }

        if let Some(message) = memory.messages.iter().find(|m| m.content.trim().is_empty()) {
            return Err(MemoryError::validation(
                "messages",
                format!("Message content cannot be empty (message ID: {})", message.id),
            ));
        }

        Ok(())
    }

    /// Build the storage key for a session
    pub fn make_key(session_id: &str, namespace: Option<&str>, user_id: Option<&str>) -> String {
        format!(
            "{}::{}::{}::{}",
            KEY_PREFIX,
            scope_segment(namespace),
            scope_segment(user_id),
            escape_segment(session_id)
        )
    }

    /// Split a storage key back into `(namespace, user_id, session_id)`
    fn parse_key(key: &str) -> Option<(Option<String>, Option<String>, String)> {
        let rest = key.strip_prefix(KEY_PREFIX)?.strip_prefix("::")?;
        let mut parts = rest.splitn(3, "::");
        let namespace = parts.next()?;
        let user_id = parts.next()?;
        let session_id = parts.next()?;

        let scoped = |segment: &str| (segment != UNSCOPED).then(|| unescape_segment(segment));
        Some((scoped(namespace), scoped(user_id), unescape_segment(session_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemoryMessage, MemoryRecord, MemoryType};
    use crate::storage::InMemoryStorage;

    fn store() -> WorkingMemoryStore {
        WorkingMemoryStore::new(Arc::new(InMemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_get_missing_session_returns_empty() {
        let store = store();
        let memory = store.get("nope", Some("acme"), None, None).await.unwrap();

        assert_eq!(memory.session_id, "nope");
        assert_eq!(memory.namespace.as_deref(), Some("acme"));
        assert!(memory.messages.is_empty());
        assert!(memory.memories.is_empty());
    }

    #[tokio::test]
    async fn test_set_replaces_instead_of_merging() {
        let store = store();
        let a = MemoryMessage::user("message A");
        let b = MemoryMessage::user("message B");

        store
            .set(WorkingMemory::new("s1").with_messages(vec![a]))
            .await
            .unwrap();
        store
            .set(WorkingMemory::new("s1").with_messages(vec![b.clone()]))
            .await
            .unwrap();

        let memory = store.get("s1", None, None, None).await.unwrap();
        assert_eq!(memory.messages.len(), 1);
        assert_eq!(memory.messages[0].content, "message B");
        assert_eq!(memory.messages[0].id, b.id);
    }

    #[tokio::test]
    async fn test_set_clears_persisted_at_and_stamps_access() {
        let store = store();
        let mut message = MemoryMessage::user("hi");
        message.persisted_at = Some(chrono::Utc::now());
        let mut record = MemoryRecord::new("fact", MemoryType::Semantic);
        record.persisted_at = Some(chrono::Utc::now());

        let stored = store
            .set(
                WorkingMemory::new("s1")
                    .with_messages(vec![message])
                    .with_memories(vec![record]),
            )
            .await
            .unwrap();

        assert!(stored.messages[0].persisted_at.is_none());
        assert!(stored.memories[0].persisted_at.is_none());
        assert!(stored.last_accessed.is_some());
        assert!(stored.has_pending());
    }

    #[tokio::test]
    async fn test_set_rejects_memory_without_id() {
        let store = store();
        let record = MemoryRecord::new("fact", MemoryType::Semantic).with_id("");

        let err = store
            .set(WorkingMemory::new("s1").with_memories(vec![record]))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_set_rejects_blank_memory_text_naming_its_id() {
        let store = store();
        let record = MemoryRecord::new("", MemoryType::Semantic).with_id("bad");

        let err = store
            .set(
                WorkingMemory::new("s1")
                    .with_memories(vec![record])
                    .with_messages(vec![MemoryMessage::user("hello")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation { .. }));
        assert!(err.to_string().contains("bad"));
        assert!(store.get("s1", None, None, None).await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_set_rejects_blank_message_naming_its_id() {
        let store = store();
        let mut message = MemoryMessage::user("   ");
        message.id = "msg-7".to_string();

        let err = store
            .set(WorkingMemory::new("s1").with_messages(vec![message]))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation { .. }));
        assert!(err.to_string().contains("msg-7"));
        assert!(store.get("s1", None, None, None).await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_recent_messages_limit_keeps_tail_in_order() {
        let store = store();
        let messages = (1..=5)
            .map(|i| MemoryMessage::user(format!("turn {}", i)))
            .collect();
        store
            .set(WorkingMemory::new("s1").with_messages(messages))
            .await
            .unwrap();

        let memory = store.get("s1", None, None, Some(2)).await.unwrap();
        let contents: Vec<_> = memory.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 4", "turn 5"]);

        let all = store.get("s1", None, None, Some(50)).await.unwrap();
        assert_eq!(all.messages.len(), 5);
    }

    #[tokio::test]
    async fn test_ttl_expiry_returns_empty() {
        let store = store();
        store
            .set(
                WorkingMemory::new("s1")
                    .with_messages(vec![MemoryMessage::user("short lived")])
                    .with_ttl_seconds(1),
            )
            .await
            .unwrap();
        assert_eq!(store.get("s1", None, None, None).await.unwrap().messages.len(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let memory = store.get("s1", None, None, None).await.unwrap();
        assert!(memory.messages.is_empty());
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let store = store();
        store
            .set(
                WorkingMemory::new("s1")
                    .with_namespace("acme")
                    .with_user_id("u1")
                    .with_messages(vec![MemoryMessage::user("acme data")]),
            )
            .await
            .unwrap();

        assert!(store.get("s1", None, None, None).await.unwrap().messages.is_empty());
        assert!(store.get("s1", Some("other"), Some("u1"), None).await.unwrap().messages.is_empty());
        assert_eq!(
            store.get("s1", Some("acme"), Some("u1"), None).await.unwrap().messages.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_and_list_sessions() {
        let store = store();
        for (session, namespace) in [("b", Some("acme")), ("a", Some("acme")), ("c", None)] {
            let mut memory = WorkingMemory::new(session);
            memory.namespace = namespace.map(String::from);
            store.set(memory).await.unwrap();
        }

        let (total, sessions) = store.list_sessions(Some("acme"), 10, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(sessions, vec!["a", "b"]);

        let (total, page) = store.list_sessions(None, 1, 1).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page, vec!["b"]);

        assert!(store.delete("a", Some("acme"), None).await.unwrap());
        assert!(!store.delete("a", Some("acme"), None).await.unwrap());
        assert_eq!(store.list_sessions(Some("acme"), 10, 0).await.unwrap().0, 1);
    }

    #[test]
    fn test_key_round_trip_with_separators() {
        let key = WorkingMemoryStore::make_key("s::1", Some("team:a"), None);
        assert_eq!(key, "working_memory::team%3Aa::_::s%3A%3A1");

        let (namespace, user, session) = WorkingMemoryStore::parse_key(&key).unwrap();
        assert_eq!(namespace.as_deref(), Some("team:a"));
        assert_eq!(user, None);
        assert_eq!(session, "s::1");
    }
}
