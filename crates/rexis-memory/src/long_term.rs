//! Long-term memory gateway
//!
//! Durable records live in the key-value store under `memory::{id}` and are
//! mirrored into a [`SearchIndex`] for retrieval. A secondary key
//! `memory_hash::{namespace}::{user_id}::{hash}` points at the record holding a
//! given content fingerprint within a scope, which is what hash dedup checks.
//! Key segments are escaped so that a namespace literally named `_` never
//! shares keys with unscoped records.
//!
//! # Deduplication
//!
//! With `deduplicate` set, a record is skipped when any of these hold:
//! - a record with the same id already exists
//! - a record with the same content hash exists in the same namespace and user
//! - semantic dedup is configured and the index returns a record of the same
//!   namespace, user and memory type within the threshold distance
//!
//! The checks run immediately before each insert. They are best effort: two
//! concurrent creates of the same content can both pass.

use crate::clock::{Clock, SystemClock};
use crate::error::{MemoryError, MemoryResult};
use crate::model::{new_id, MemoryRecord, MemoryType};
use crate::search::{SearchFilters, SearchIndex, SearchQuery, SearchResults, TagFilter};
use crate::storage::{escape_segment, get_json, scope_segment, set_json, Storage};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const RECORD_PREFIX: &str = "memory";
const HASH_PREFIX: &str = "memory_hash";

/// Page size when scanning semantic dedup candidates
const SEMANTIC_DEDUP_PAGE: usize = 20;

/// Fields of a record that can be changed after creation
///
/// `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryRecordUpdate {
    /// New content
    pub text: Option<String>,

    /// New topics
    pub topics: Option<Vec<String>>,

    /// New entities
    pub entities: Option<Vec<String>>,

    /// New memory type
    pub memory_type: Option<MemoryType>,

    /// New namespace
    pub namespace: Option<String>,

    /// New user
    pub user_id: Option<String>,

    /// New session
    pub session_id: Option<String>,

    /// New event date
    pub event_date: Option<DateTime<Utc>>,
}

impl MemoryRecordUpdate {
    /// Whether the update changes nothing
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(self, record: &mut MemoryRecord) {
        if let Some(text) = self.text {
            record.text = text;
        }
        if let Some(topics) = self.topics {
            record.topics = topics;
        }
        if let Some(entities) = self.entities {
            record.entities = entities;
        }
        if let Some(memory_type) = self.memory_type {
            record.memory_type = memory_type;
        }
        if let Some(namespace) = self.namespace {
            record.namespace = Some(namespace);
        }
        if let Some(user_id) = self.user_id {
            record.user_id = Some(user_id);
        }
        if let Some(session_id) = self.session_id {
            record.session_id = Some(session_id);
        }
        if let Some(event_date) = self.event_date {
            record.event_date = Some(event_date);
        }
    }
}

/// Durable, searchable memory store
#[derive(Clone)]
pub struct LongTermMemory {
    /// Record storage
    storage: Arc<dyn Storage>,

    /// Search index mirroring the stored records
    index: Arc<dyn SearchIndex>,

    /// Timestamp source
    clock: Arc<dyn Clock>,

    /// Semantic dedup distance, if enabled
    semantic_dedup_threshold: Option<f32>,
}

impl LongTermMemory {
    /// Create a gateway over a store and an index
    pub fn new(storage: Arc<dyn Storage>, index: Arc<dyn SearchIndex>) -> Self {
        Self {
            storage,
            index,
            clock: Arc::new(SystemClock),
            semantic_dedup_threshold: None,
        }
    }

    /// Use a specific clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enable semantic dedup
    pub fn with_semantic_dedup_threshold(mut self, threshold: Option<f32>) -> Self {
        self.semantic_dedup_threshold = threshold;
        self
    }

    /// Persist records; returns how many were actually inserted
    ///
    /// Every inserted record gets `created_at`, `last_accessed`, `updated_at`
    /// and `persisted_at` set to now and a fresh `memory_hash`. Records whose id
    /// already exists are overwritten when `deduplicate` is off. A record with
    /// empty text is logged and skipped without affecting the rest of the batch;
    /// storage failures abort the call.
    pub async fn create(&self, records: Vec<MemoryRecord>, deduplicate: bool) -> MemoryResult<usize> {
        let mut inserted = 0;

        for mut record in records {
            if record.id.trim().is_empty() {
                record.id = new_id();
            }
            if record.text.trim().is_empty() {
                tracing::warn!(id = %record.id, "skipping record with empty text");
                continue;
            }

            let hash = record.content_hash();

            if deduplicate && self.is_duplicate(&record, &hash).await? {
                continue;
            }

            if !deduplicate {
                if let Some(previous) = self.get_by_id(&record.id).await? {
                    self.drop_hash_key(&previous).await?;
                }
            }

            let now = self.clock.now();
            record.created_at = Some(now);
            record.last_accessed = Some(now);
            record.updated_at = Some(now);
            record.persisted_at = Some(now);
            record.memory_hash = Some(hash);

            self.write(&record).await?;
            inserted += 1;

            tracing::debug!(
                id = %record.id,
                memory_type = %record.memory_type,
                namespace = ?record.namespace,
                "long-term memory created"
            );
        }

        Ok(inserted)
    }

    async fn is_duplicate(&self, record: &MemoryRecord, hash: &str) -> MemoryResult<bool> {
        if self.storage.exists(&Self::record_key(&record.id)).await? {
            tracing::debug!(id = %record.id, "skipping record, id already exists");
            return Ok(true);
        }

        let hash_key = Self::hash_key(record.namespace.as_deref(), record.user_id.as_deref(), hash);
        if let Some(existing) = self.storage.get(&hash_key).await? {
            if self.storage.exists(&Self::record_key(&existing)).await? {
                tracing::debug!(id = %record.id, existing = %existing, "skipping record, same content hash");
                return Ok(true);
            }
        }

        let Some(threshold) = self.semantic_dedup_threshold else {
            return Ok(false);
        };

        // An unscoped record has no filter for that field, so matches from
        // other scopes are dropped here
        let filters = SearchFilters {
            namespace: record.namespace.clone().map(TagFilter::eq),
            user_id: record.user_id.clone().map(TagFilter::eq),
            memory_type: Some(TagFilter::eq(record.memory_type.as_str())),
            ..SearchFilters::default()
        };
        let mut query = SearchQuery::new(record.text.clone())
            .with_filters(filters)
            .with_distance_threshold(threshold)
            .with_page(SEMANTIC_DEDUP_PAGE, 0);

        loop {
            let results = match self.index.search(&query).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(id = %record.id, error = %e, "semantic dedup check failed, inserting");
                    return Ok(false);
                }
            };

            let same_scope = results.memories.iter().any(|scored| {
                scored.record.namespace == record.namespace && scored.record.user_id == record.user_id
            });
            if same_scope {
                tracing::debug!(id = %record.id, "skipping record, semantic duplicate");
                return Ok(true);
            }

            match results.next_offset {
                Some(next) if !results.memories.is_empty() => query.offset = next,
                _ => return Ok(false),
            }
        }
    }

    /// Run a search against the index
    pub async fn search(&self, query: &SearchQuery) -> MemoryResult<SearchResults> {
        let results = self.index.search(query).await?;
        tracing::debug!(
            total = results.total,
            returned = results.memories.len(),
            "long-term search"
        );
        Ok(results)
    }

    /// Fetch a record by id
    pub async fn get_by_id(&self, id: &str) -> MemoryResult<Option<MemoryRecord>> {
        get_json(self.storage.as_ref(), &Self::record_key(id)).await
    }

    /// Apply a partial update
    ///
    /// Bumps `updated_at` and recomputes `memory_hash`; `persisted_at` and
    /// `created_at` are kept.
    pub async fn update(&self, id: &str, update: MemoryRecordUpdate) -> MemoryResult<MemoryRecord> {
        if matches!(&update.text, Some(text) if text.trim().is_empty()) {
            return Err(MemoryError::validation("text", "Memory text cannot be empty"));
        }

        let mut record = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| MemoryError::not_found(id))?;

        self.drop_hash_key(&record).await?;

        update.apply(&mut record);
        record.updated_at = Some(self.clock.now());
        record.memory_hash = Some(record.content_hash());

        self.write(&record).await?;
        tracing::debug!(id = %record.id, "long-term memory updated");

        Ok(record)
    }

    /// Delete records; unknown ids are ignored and not counted
    pub async fn delete(&self, ids: &[String]) -> MemoryResult<usize> {
        let mut deleted = 0;
        for id in ids {
            let Some(record) = self.get_by_id(id).await? else {
                continue;
            };
            self.drop_hash_key(&record).await?;
            if self.storage.delete(&Self::record_key(id)).await? {
                deleted += 1;
            }
        }

        self.index.remove(ids).await?;
        tracing::debug!(requested = ids.len(), deleted, "long-term memories deleted");

        Ok(deleted)
    }

    /// Bump `last_accessed` on the given records
    ///
    /// Failures are logged and swallowed.
    pub async fn touch_last_accessed(&self, ids: &[String]) {
        let now = self.clock.now();
        for id in ids {
            let result = async {
                if let Some(mut record) = self.get_by_id(id).await? {
                    record.last_accessed = Some(now);
                    self.write(&record).await?;
                }
                Ok::<_, MemoryError>(())
            }
            .await;

            if let Err(e) = result {
                tracing::warn!(id = %id, error = %e, "failed to update last_accessed");
            }
        }
    }

    /// Re-index every stored record; returns how many were indexed
    ///
    /// Used at startup when the store outlives an in-process index.
    pub async fn rebuild_index(&self) -> MemoryResult<usize> {
        let prefix = format!("{}::", RECORD_PREFIX);
        let keys = self.storage.keys(&prefix).await?;

        let mut indexed = 0;
        for key in keys {
            if let Some(record) = get_json::<MemoryRecord>(self.storage.as_ref(), &key).await? {
                self.index.upsert(&record).await?;
                indexed += 1;
            }
        }

        tracing::info!(indexed, storage = self.storage.name(), "search index rebuilt");
        Ok(indexed)
    }

    async fn write(&self, record: &MemoryRecord) -> MemoryResult<()> {
        set_json(self.storage.as_ref(), &Self::record_key(&record.id), record, None).await?;

        if let Some(hash) = &record.memory_hash {
            let hash_key =
                Self::hash_key(record.namespace.as_deref(), record.user_id.as_deref(), hash);
            self.storage.set(&hash_key, record.id.clone(), None).await?;
        }

        self.index.upsert(record).await
    }

    /// Remove the hash pointer for `record` if it still points at it
    async fn drop_hash_key(&self, record: &MemoryRecord) -> MemoryResult<()> {
        let Some(hash) = &record.memory_hash else {
            return Ok(());
        };
        let hash_key = Self::hash_key(record.namespace.as_deref(), record.user_id.as_deref(), hash);
        if self.storage.get(&hash_key).await?.as_deref() == Some(record.id.as_str()) {
            self.storage.delete(&hash_key).await?;
        }
        Ok(())
    }

    fn record_key(id: &str) -> String {
        format!("{}::{}", RECORD_PREFIX, escape_segment(id))
    }

    fn hash_key(namespace: Option<&str>, user_id: Option<&str>, hash: &str) -> String {
        format!(
            "{}::{}::{}::{}",
            HASH_PREFIX,
            scope_segment(namespace),
            scope_segment(user_id),
            hash
        )
    }
}
