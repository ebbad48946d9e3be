//! Memory system configuration

use crate::model::DEFAULT_TTL_SECONDS;

/// Configuration shared by the dispatcher, the gateway and the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// Enable long-term storage, search and promotion
    pub long_term_memory: bool,

    /// Namespace applied when neither the caller nor the transport gives one
    pub default_namespace: Option<String>,

    /// User applied when the caller gives none
    pub default_user_id: Option<String>,

    /// TTL for working memory written without an explicit `ttl_seconds`
    pub default_ttl_seconds: u64,

    /// Distance under which a new record counts as a semantic duplicate
    ///
    /// `None` disables semantic dedup; id and hash dedup always apply.
    pub semantic_dedup_threshold: Option<f32>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            long_term_memory: true,
            default_namespace: None,
            default_user_id: None,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            semantic_dedup_threshold: None,
        }
    }
}

impl MemoryConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle long-term memory
    pub fn with_long_term_memory(mut self, enabled: bool) -> Self {
        self.long_term_memory = enabled;
        self
    }

    /// Set the default namespace
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = Some(namespace.into());
        self
    }

    /// Set the default user
    pub fn with_default_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.default_user_id = Some(user_id.into());
        self
    }

    /// Set the default working-memory TTL
    pub fn with_default_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.default_ttl_seconds = ttl_seconds;
        self
    }

    /// Enable semantic dedup at the given distance
    pub fn with_semantic_dedup_threshold(mut self, threshold: f32) -> Self {
        self.semantic_dedup_threshold = Some(threshold);
        self
    }
}
