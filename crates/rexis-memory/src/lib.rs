//! # Rexis Memory
//!
//! Two-tier memory for conversational agents: a session-scoped **working
//! memory** with TTL and a durable, searchable **long-term memory**, bridged by
//! a background promotion pipeline and fronted by a namespace-aware tool
//! dispatcher.
//!
//! ## Components
//!
//! - [`working`]: per-session scratch store, replaced wholesale on every write
//! - [`long_term`]: deduplicating create, search, update and delete of records
//! - [`promotion`]: mpsc-driven worker that moves pending working-memory content
//!   into long-term memory
//! - [`namespace`]: derives a tenant namespace from the transport and injects it
//!   into tool arguments
//! - [`tools`]: the [`ToolDispatcher`] every transport calls into
//! - [`clock`]: time grounding for agents and deterministic timestamps in tests
//!
//! Storage, search and extraction sit behind traits ([`Storage`],
//! [`SearchIndex`], [`ExtractionStrategy`]) with in-process reference
//! implementations and a Redis store behind the `redis` feature.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rexis_memory::{
//!     InMemorySearchIndex, InMemoryStorage, MemoryConfig, ToolDispatcher, TransportContext,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> rexis_memory::MemoryResult<()> {
//!     let dispatcher = ToolDispatcher::new(
//!         MemoryConfig::new().with_default_namespace("demo"),
//!         Arc::new(InMemoryStorage::new()),
//!         Arc::new(InMemorySearchIndex::new()),
//!     );
//!     let context = TransportContext::pipe();
//!
//!     dispatcher
//!         .call(
//!             &context,
//!             "create_long_term_memories",
//!             json!({"memories": [{"text": "User prefers dark mode", "memory_type": "semantic"}]}),
//!         )
//!         .await?;
//!     dispatcher.wait_idle().await;
//!
//!     let results = dispatcher
//!         .call(&context, "search_long_term_memory", json!({"text": "dark mode"}))
//!         .await?;
//!     println!("{}", results);
//!
//!     dispatcher.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod extraction;
pub mod long_term;
pub mod model;
pub mod namespace;
pub mod promotion;
pub mod prompt;
pub mod search;
pub mod storage;
pub mod tools;
pub mod working;

pub use clock::{Clock, CurrentDateTime, ManualClock, SystemClock};
pub use config::MemoryConfig;
pub use error::{MemoryError, MemoryResult};
pub use extraction::{ExtractionStrategy, MessageIndexStrategy, StrategyRegistry};
pub use long_term::{LongTermMemory, MemoryRecordUpdate};
pub use model::{
    MemoryMessage, MemoryRecord, MemoryStrategyConfig, MemoryType, MessageRole, WorkingMemory,
};
pub use namespace::{NamespaceInjection, NamespaceResolver, TransportContext};
pub use promotion::{PromotionJob, PromotionScheduler, SessionKey};
pub use prompt::{MemoryPrompt, PromptMessage};
pub use search::{
    DateTimeFilter, InMemorySearchIndex, QueryOptimizer, ScoredRecord, SearchFilters,
    SearchIndex, SearchQuery, SearchResults, TagFilter,
};
pub use storage::{InMemoryStorage, Storage};
#[cfg(feature = "redis")]
pub use storage::RedisStorage;
pub use tools::{ToolDescriptor, ToolDispatcher, ToolName};
