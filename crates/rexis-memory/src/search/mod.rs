//! Search capability over long-term memory
//!
//! Ranking and indexing live behind [`SearchIndex`]; the long-term gateway only
//! builds a [`SearchQuery`] and shapes the page it gets back. An empty query text
//! means "filters only", ordered however the index natively orders records.
//!
//! `optimize_query` asks the index to rewrite the text first (for example with an
//! LLM that turns a chatty question into a search phrase). Indexes that have no
//! rewriter ignore the flag.

mod filters;
mod in_memory;

pub use filters::{DateTimeFilter, SearchFilters, TagFilter};
pub use in_memory::InMemorySearchIndex;

use crate::error::MemoryResult;
use crate::model::MemoryRecord;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default page size
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// A search request
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// Query text; empty for filter-only search
    pub text: String,

    /// Field filters
    pub filters: SearchFilters,

    /// Drop results farther than this distance (0.0 = identical)
    pub distance_threshold: Option<f32>,

    /// Page size
    pub limit: usize,

    /// Page start
    pub offset: usize,

    /// Let the index rewrite `text` before searching
    pub optimize_query: bool,
}

impl SearchQuery {
    /// Query with default paging
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filters: SearchFilters::default(),
            distance_threshold: None,
            limit: DEFAULT_SEARCH_LIMIT,
            offset: 0,
            optimize_query: false,
        }
    }

    /// Set filters
    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Set the distance threshold
    pub fn with_distance_threshold(mut self, threshold: f32) -> Self {
        self.distance_threshold = Some(threshold);
        self
    }

    /// Set paging
    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Request query rewriting
    pub fn with_optimize_query(mut self, optimize: bool) -> Self {
        self.optimize_query = optimize;
        self
    }
}

/// A record together with its distance from the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoredRecord {
    /// The record
    #[serde(flatten)]
    pub record: MemoryRecord,

    /// Distance from the query text (lower is closer)
    pub dist: f32,
}

/// One page of search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct SearchResults {
    /// Total matches across all pages
    pub total: usize,

    /// This page, most relevant first
    pub memories: Vec<ScoredRecord>,

    /// Offset of the next page, if more results may exist
    pub next_offset: Option<usize>,
}

impl SearchResults {
    /// The empty result search failures degrade to
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a page from the full ranked match list
    pub fn paginate(ranked: Vec<ScoredRecord>, limit: usize, offset: usize) -> Self {
        let total = ranked.len();
        let memories: Vec<ScoredRecord> = ranked.into_iter().skip(offset).take(limit).collect();
        let end = offset + memories.len();
        let next_offset = (end < total).then_some(end);

        Self {
            total,
            memories,
            next_offset,
        }
    }
}

/// Index over long-term records
#[async_trait::async_trait]
pub trait SearchIndex: Send + Sync {
    /// Add or replace a record
    async fn upsert(&self, record: &MemoryRecord) -> MemoryResult<()>;

    /// Remove records; unknown ids are ignored
    async fn remove(&self, ids: &[String]) -> MemoryResult<()>;

    /// Run a query
    async fn search(&self, query: &SearchQuery) -> MemoryResult<SearchResults>;
}

/// Rewrites query text before search
#[async_trait::async_trait]
pub trait QueryOptimizer: Send + Sync {
    /// Produce the text to search with
    async fn optimize(&self, text: &str) -> MemoryResult<String>;
}
