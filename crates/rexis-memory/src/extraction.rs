//! Extraction strategies for promotion
//!
//! When a session's working memory is promoted, its pending messages are handed to
//! the session's configured strategy, which turns them into long-term candidate
//! records. Strategies are looked up by name in a [`StrategyRegistry`].
//!
//! The built-in `message` strategy indexes each message verbatim as a
//! `message`-type record whose id is the message id, so promoting the same
//! message twice is caught by id dedup. Summarizing or fact-extracting strategies
//! backed by an LLM can be registered alongside it.

use crate::error::{MemoryError, MemoryResult};
use crate::model::{MemoryMessage, MemoryRecord, MemoryType, WorkingMemory};
use std::collections::HashMap;
use std::sync::Arc;

/// Strategy used when a session does not name one
pub const DEFAULT_STRATEGY: &str = "message";

/// Turns conversation messages into long-term records
#[async_trait::async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Produce candidate records from `messages`
    ///
    /// `memory` is the session the messages came from; its
    /// `long_term_memory_strategy.config` carries the strategy options.
    async fn extract(
        &self,
        memory: &WorkingMemory,
        messages: &[MemoryMessage],
    ) -> MemoryResult<Vec<MemoryRecord>>;
}

/// Indexes messages one-to-one as `message` records
///
/// Options (in the strategy config):
/// - `include_system` (bool, default false): also index system messages
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageIndexStrategy;

#[async_trait::async_trait]
impl ExtractionStrategy for MessageIndexStrategy {
    fn name(&self) -> &str {
        DEFAULT_STRATEGY
    }

    async fn extract(
        &self,
        memory: &WorkingMemory,
        messages: &[MemoryMessage],
    ) -> MemoryResult<Vec<MemoryRecord>> {
        let include_system = match memory.long_term_memory_strategy.config.get("include_system") {
            None => false,
            Some(value) => value.as_bool().ok_or_else(|| {
                MemoryError::extraction(DEFAULT_STRATEGY, "include_system must be a boolean")
            })?,
        };

        let records = messages
            .iter()
            .filter(|m| include_system || m.role != crate::model::MessageRole::System)
            .map(|message| {
                let mut record = MemoryRecord::new(message.content.clone(), MemoryType::Message)
                    .with_id(message.id.clone())
                    .with_session_id(memory.session_id.clone());
                record.namespace = memory.namespace.clone();
                record.user_id = memory.user_id.clone();
                record
            })
            .collect();

        Ok(records)
    }
}

/// Named extraction strategies
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn ExtractionStrategy>>,
}

impl StrategyRegistry {
    /// Registry holding the built-in strategies
    pub fn new() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register(Arc::new(MessageIndexStrategy));
        registry
    }

    /// Add or replace a strategy under its own name
    pub fn register(&mut self, strategy: Arc<dyn ExtractionStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    /// Look up a strategy
    pub fn get(&self, name: &str) -> Option<Arc<dyn ExtractionStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// Whether a strategy is registered
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }

    /// Reject unknown strategy names
    pub fn validate(&self, name: &str) -> MemoryResult<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(MemoryError::validation(
                "long_term_memory_strategy",
                format!(
                    "unknown strategy '{}' (available: {})",
                    name,
                    self.names().join(", ")
                ),
            ))
        }
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
