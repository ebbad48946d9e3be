//! In-process search index
//!
//! Scores records by lexical overlap: the cosine similarity of the query's and
//! the record's word sets. This is a stand-in for a vector index; it keeps the
//! ranking contract (lower distance is closer, filters are exact) without
//! embedding anything.

use super::{QueryOptimizer, ScoredRecord, SearchIndex, SearchQuery, SearchResults};
use crate::error::MemoryResult;
use crate::model::MemoryRecord;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Lexical in-memory index
#[derive(Default)]
pub struct InMemorySearchIndex {
    records: RwLock<HashMap<String, MemoryRecord>>,
    optimizer: Option<Arc<dyn QueryOptimizer>>,
}

impl InMemorySearchIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a query rewriter used when `optimize_query` is set
    pub fn with_query_optimizer(mut self, optimizer: Arc<dyn QueryOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Number of indexed records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    async fn effective_text(&self, query: &SearchQuery) -> String {
        if !query.optimize_query || query.text.trim().is_empty() {
            return query.text.clone();
        }

        match &self.optimizer {
            Some(optimizer) => match optimizer.optimize(&query.text).await {
                Ok(optimized) => {
                    tracing::debug!(original = %query.text, optimized = %optimized, "query optimized");
                    optimized
                }
                Err(e) => {
                    tracing::warn!(error = %e, "query optimization failed, using original text");
                    query.text.clone()
                }
            },
            None => query.text.clone(),
        }
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `1 - cosine` over binary word vectors
fn lexical_distance(query: &HashSet<String>, text: &str) -> f32 {
    let doc = tokenize(text);
    if query.is_empty() || doc.is_empty() {
        return 1.0;
    }

    let shared = query.intersection(&doc).count() as f32;
    let norm = ((query.len() * doc.len()) as f32).sqrt();
    1.0 - shared / norm
}

#[async_trait::async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn upsert(&self, record: &MemoryRecord) -> MemoryResult<()> {
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> MemoryResult<()> {
        let mut records = self.records.write();
        for id in ids {
            records.remove(id);
        }
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> MemoryResult<SearchResults> {
        let text = self.effective_text(query).await;
        let text_query = !text.trim().is_empty();
        let query_tokens = tokenize(&text);

        let mut ranked: Vec<ScoredRecord> = {
            let records = self.records.read();
            records
                .values()
                .filter(|record| query.filters.matches(record))
                .map(|record| ScoredRecord {
                    dist: if text_query {
                        lexical_distance(&query_tokens, &record.text)
                    } else {
                        0.0
                    },
                    record: record.clone(),
                })
                .filter(|scored| {
                    query
                        .distance_threshold
                        .map_or(true, |threshold| scored.dist <= threshold)
                })
                .collect()
        };

        // Native order for filter-only queries is newest first
        ranked.sort_by(|a, b| {
            a.dist
                .total_cmp(&b.dist)
                .then_with(|| b.record.created_at.cmp(&a.record.created_at))
                .then_with(|| b.record.id.cmp(&a.record.id))
        });

        Ok(SearchResults::paginate(ranked, query.limit, query.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;
    use crate::model::MemoryType;
    use crate::search::{SearchFilters, TagFilter};

    async fn seeded() -> InMemorySearchIndex {
        let index = InMemorySearchIndex::new();
        for (id, text, user) in [
            ("01", "User prefers dark mode in all applications", "u1"),
            ("02", "User is a data scientist working with Python", "u1"),
            ("03", "User dislikes spicy food", "u2"),
        ] {
            let record = MemoryRecord::new(text, MemoryType::Semantic)
                .with_id(id)
                .with_user_id(user);
            index.upsert(&record).await.unwrap();
        }
        index
    }

    #[tokio::test]
    async fn test_text_query_ranks_by_overlap() {
        let index = seeded().await;
        let results = index
            .search(&SearchQuery::new("dark mode preference"))
            .await
            .unwrap();

        assert_eq!(results.total, 3);
        assert_eq!(results.memories[0].record.id, "01");
        assert!(results.memories[0].dist < results.memories[1].dist);
    }

    #[tokio::test]
    async fn test_empty_text_uses_filters_only() {
        let index = seeded().await;
        let query = SearchQuery::new("")
            .with_filters(SearchFilters::new().with_user_id(TagFilter::eq("u1")));
        let results = index.search(&query).await.unwrap();

        assert_eq!(results.total, 2);
        assert!(results
            .memories
            .iter()
            .all(|m| m.record.user_id.as_deref() == Some("u1")));
        assert!(results.memories.iter().all(|m| m.dist == 0.0));
    }

    #[tokio::test]
    async fn test_distance_threshold_and_remove() {
        let index = seeded().await;
        let query = SearchQuery::new("User dislikes spicy food").with_distance_threshold(0.1);
        let results = index.search(&query).await.unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.memories[0].record.id, "03");

        index.remove(&["03".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(index.search(&query).await.unwrap().total, 0);
        assert_eq!(index.len(), 2);
    }

    struct Rewriter(Result<&'static str, ()>);

    #[async_trait::async_trait]
    impl QueryOptimizer for Rewriter {
        async fn optimize(&self, _text: &str) -> MemoryResult<String> {
            self.0
                .map(String::from)
                .map_err(|_| MemoryError::Search("rewriter offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_optimize_query_only_when_requested() {
        let index = seeded()
            .await
            .with_query_optimizer(Arc::new(Rewriter(Ok("spicy food"))));

        let raw = SearchQuery::new("what does the user think about python");
        let raw_results = index.search(&raw).await.unwrap();
        assert_eq!(raw_results.memories[0].record.id, "02");

        let optimized = index
            .search(&raw.clone().with_optimize_query(true))
            .await
            .unwrap();
        assert_eq!(optimized.memories[0].record.id, "03");
    }

    #[tokio::test]
    async fn test_optimizer_failure_falls_back_to_raw_text() {
        let index = seeded().await.with_query_optimizer(Arc::new(Rewriter(Err(()))));
        let query = SearchQuery::new("python data scientist").with_optimize_query(true);

        let results = index.search(&query).await.unwrap();
        assert_eq!(results.memories[0].record.id, "02");
    }
}
