//! Error types for memory operations
//!
//! All fallible operations in this crate return [`MemoryResult`]. The variants map
//! one-to-one onto the failure kinds a tool caller can observe, so transports can
//! turn them into status codes without string matching.

use thiserror::Error;

/// Result alias used throughout the crate
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors returned by the memory stores, the promotion pipeline and the dispatcher
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Long-term memory (or another optional feature) is switched off
    #[error("{feature} is disabled")]
    FeatureDisabled {
        /// Human-readable feature name
        feature: &'static str,
    },

    /// Input failed validation
    #[error("validation failed for '{field}': {message}")]
    Validation {
        /// Field or argument that failed validation
        field: String,
        /// Reason the value was rejected
        message: String,
    },

    /// Unknown memory record id
    #[error("memory with id {id} not found")]
    NotFound {
        /// The id that was looked up
        id: String,
    },

    /// Transport context could not be read; callers degrade to no namespace
    #[error("transport context unavailable: {0}")]
    TransportContextUnavailable(String),

    /// Tool name is not part of the tool surface
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Tool arguments could not be decoded into the tool's argument shape
    #[error("invalid arguments for {tool}: {source}")]
    InvalidArguments {
        /// Tool the arguments were meant for
        tool: String,
        /// Decoding error
        #[source]
        source: serde_json::Error,
    },

    /// Backing key-value store failed
    #[error("storage error during {operation}: {source}")]
    Storage {
        /// Operation that failed
        operation: String,
        /// Underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Value could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Search capability failed
    #[error("search error: {0}")]
    Search(String),

    /// Extraction strategy failed during promotion
    #[error("extraction strategy '{strategy}' failed: {message}")]
    Extraction {
        /// Strategy name
        strategy: String,
        /// Failure description
        message: String,
    },
}

impl MemoryError {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a storage error from any backend error
    pub fn storage(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create an extraction error
    pub fn extraction(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            strategy: strategy.into(),
            message: message.into(),
        }
    }

    /// Long-term memory is disabled
    pub fn long_term_disabled() -> Self {
        Self::FeatureDisabled {
            feature: "Long-term memory",
        }
    }

    /// Short machine-readable kind, used by transports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FeatureDisabled { .. } => "feature_disabled",
            Self::Validation { .. } => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::TransportContextUnavailable(_) => "transport_context_unavailable",
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::Storage { .. } => "storage_error",
            Self::Serialization(_) => "serialization_error",
            Self::Search(_) => "search_error",
            Self::Extraction { .. } => "extraction_error",
        }
    }

    /// Whether the error was caused by caller input rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::NotFound { .. }
                | Self::UnknownTool(_)
                | Self::InvalidArguments { .. }
                | Self::FeatureDisabled { .. }
        )
    }
}
