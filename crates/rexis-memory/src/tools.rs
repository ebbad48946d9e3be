//! Tool surface and dispatcher
//!
//! [`ToolDispatcher::call`] is the single entry point every transport uses. For
//! each call it:
//!
//! 1. parses the tool name into a [`ToolName`] (unknown names fail with
//!    `UnknownTool`)
//! 2. injects namespace and default user per the tool's
//!    [`NamespaceInjection`] declaration
//! 3. enforces the long-term memory feature gate
//! 4. decodes the arguments into the tool's typed argument struct
//! 5. normalizes records and messages once (ids assigned, `persisted_at`
//!    cleared) and calls into working memory, long-term memory or the
//!    promotion scheduler
//!
//! Every tool is also available as a typed method taking its argument struct.
//!
//! # Example
//!
//! ```rust,no_run
//! use rexis_memory::{
//!     InMemorySearchIndex, InMemoryStorage, MemoryConfig, ToolDispatcher, TransportContext,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> rexis_memory::MemoryResult<()> {
//! let dispatcher = ToolDispatcher::new(
//!     MemoryConfig::new(),
//!     Arc::new(InMemoryStorage::new()),
//!     Arc::new(InMemorySearchIndex::new()),
//! );
//!
//! let context = TransportContext::stream(Some("acme"));
//! dispatcher
//!     .call(
//!         &context,
//!         "set_working_memory",
//!         json!({"session_id": "s1", "messages": [{"role": "user", "content": "hi"}]}),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::clock::{current_datetime, parse_iso8601, Clock, CurrentDateTime, SystemClock};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::extraction::StrategyRegistry;
use crate::long_term::{LongTermMemory, MemoryRecordUpdate};
use crate::model::{
    new_id, MemoryMessage, MemoryRecord, MemoryStrategyConfig, MemoryType, WorkingMemory,
};
use crate::namespace::{NamespaceInjection, NamespaceResolver, TransportContext};
use crate::promotion::{PromotionScheduler, SessionKey};
use crate::prompt::MemoryPrompt;
use crate::search::{
    SearchFilters, SearchIndex, SearchQuery, SearchResults, DEFAULT_SEARCH_LIMIT,
};
use crate::storage::Storage;
use crate::working::WorkingMemoryStore;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;

/// Largest page a search may request
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Default page size for `list_sessions`
pub const DEFAULT_SESSION_LIMIT: usize = 20;

/// Tools exposed to agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    /// `get_current_datetime`
    GetCurrentDatetime,
    /// `create_long_term_memories`
    CreateLongTermMemories,
    /// `search_long_term_memory`
    SearchLongTermMemory,
    /// `memory_prompt`
    MemoryPrompt,
    /// `set_working_memory`
    SetWorkingMemory,
    /// `get_working_memory`
    GetWorkingMemory,
    /// `get_long_term_memory`
    GetLongTermMemory,
    /// `edit_long_term_memory`
    EditLongTermMemory,
    /// `delete_long_term_memories`
    DeleteLongTermMemories,
    /// `delete_working_memory`
    DeleteWorkingMemory,
    /// `list_sessions`
    ListSessions,
}

impl ToolName {
    /// Every tool, in listing order
    pub const ALL: [ToolName; 11] = [
        ToolName::GetCurrentDatetime,
        ToolName::CreateLongTermMemories,
        ToolName::SearchLongTermMemory,
        ToolName::MemoryPrompt,
        ToolName::SetWorkingMemory,
        ToolName::GetWorkingMemory,
        ToolName::GetLongTermMemory,
        ToolName::EditLongTermMemory,
        ToolName::DeleteLongTermMemories,
        ToolName::DeleteWorkingMemory,
        ToolName::ListSessions,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::GetCurrentDatetime => "get_current_datetime",
            ToolName::CreateLongTermMemories => "create_long_term_memories",
            ToolName::SearchLongTermMemory => "search_long_term_memory",
            ToolName::MemoryPrompt => "memory_prompt",
            ToolName::SetWorkingMemory => "set_working_memory",
            ToolName::GetWorkingMemory => "get_working_memory",
            ToolName::GetLongTermMemory => "get_long_term_memory",
            ToolName::EditLongTermMemory => "edit_long_term_memory",
            ToolName::DeleteLongTermMemories => "delete_long_term_memories",
            ToolName::DeleteWorkingMemory => "delete_working_memory",
            ToolName::ListSessions => "list_sessions",
        }
    }

    /// Whether and how the tool accepts an injected namespace
    pub fn namespace_injection(&self) -> NamespaceInjection {
        match self {
            ToolName::SearchLongTermMemory | ToolName::MemoryPrompt => NamespaceInjection::Filter,
            ToolName::SetWorkingMemory => NamespaceInjection::Plain,
            _ => NamespaceInjection::None,
        }
    }

    /// Whether the tool fails when long-term memory is disabled
    pub fn requires_long_term_memory(&self) -> bool {
        matches!(
            self,
            ToolName::CreateLongTermMemories
                | ToolName::SearchLongTermMemory
                | ToolName::GetLongTermMemory
                | ToolName::EditLongTermMemory
                | ToolName::DeleteLongTermMemories
        )
    }

    /// Description shown to agents
    pub fn description(&self) -> &'static str {
        match self {
            ToolName::GetCurrentDatetime => {
                "Get the current date and time in UTC. Use it to ground relative dates such as \
                 'yesterday' or 'last week' before writing an event_date."
            }
            ToolName::CreateLongTermMemories => {
                "Create long-term memories that persist across sessions. Memories are indexed in \
                 the background and duplicates are skipped."
            }
            ToolName::SearchLongTermMemory => {
                "Search long-term memory by text and filters. Empty text searches by filters \
                 alone. Datetime filters accept ISO 8601 strings."
            }
            ToolName::MemoryPrompt => {
                "Hydrate a query with the session's conversation and relevant long-term \
                 memories, returning messages ready to send to a model."
            }
            ToolName::SetWorkingMemory => {
                "Replace a session's working memory. Pending memories and messages are \
                 promoted to long-term memory in the background."
            }
            ToolName::GetWorkingMemory => {
                "Get a session's working memory. Missing sessions return an empty value."
            }
            ToolName::GetLongTermMemory => "Get a long-term memory by id.",
            ToolName::EditLongTermMemory => {
                "Update fields of an existing long-term memory. Only the provided fields change."
            }
            ToolName::DeleteLongTermMemories => "Delete long-term memories by id.",
            ToolName::DeleteWorkingMemory => "Delete a session's working memory.",
            ToolName::ListSessions => "List sessions that currently have working memory.",
        }
    }

    /// JSON Schema of the tool's arguments
    pub fn input_schema(&self) -> Value {
        let schema = match self {
            ToolName::GetCurrentDatetime => schema_for!(GetCurrentDatetimeArgs),
            ToolName::CreateLongTermMemories => schema_for!(CreateLongTermMemoriesArgs),
            ToolName::SearchLongTermMemory => schema_for!(SearchLongTermMemoryArgs),
            ToolName::MemoryPrompt => schema_for!(MemoryPromptArgs),
            ToolName::SetWorkingMemory => schema_for!(SetWorkingMemoryArgs),
            ToolName::GetWorkingMemory => schema_for!(GetWorkingMemoryArgs),
            ToolName::GetLongTermMemory => schema_for!(GetLongTermMemoryArgs),
            ToolName::EditLongTermMemory => schema_for!(EditLongTermMemoryArgs),
            ToolName::DeleteLongTermMemories => schema_for!(DeleteLongTermMemoriesArgs),
            ToolName::DeleteWorkingMemory => schema_for!(DeleteWorkingMemoryArgs),
            ToolName::ListSessions => schema_for!(ListSessionsArgs),
        };
        schema.to_value()
    }
}

impl FromStr for ToolName {
    type Err = MemoryError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == name)
            .ok_or_else(|| MemoryError::UnknownTool(name.to_string()))
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool as listed to clients
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    /// Wire name
    pub name: &'static str,

    /// Description
    pub description: &'static str,

    /// JSON Schema of the arguments
    pub input_schema: Value,
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_session_limit() -> usize {
    DEFAULT_SESSION_LIMIT
}

/// Arguments of `get_current_datetime`
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct GetCurrentDatetimeArgs {}

/// Arguments of `create_long_term_memories`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateLongTermMemoriesArgs {
    /// Memories to create; ids are generated when missing
    pub memories: Vec<MemoryRecord>,
}

/// Filters and paging shared by search and prompt hydration
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchOptions {
    /// Field filters
    #[serde(flatten)]
    pub filters: SearchFilters,

    /// Drop results farther than this distance
    #[serde(default)]
    pub distance_threshold: Option<f32>,

    /// Page size
    #[serde(default = "default_search_limit")]
    pub limit: usize,

    /// Page start
    #[serde(default)]
    pub offset: usize,

    /// Rewrite the query text for search first
    #[serde(default)]
    pub optimize_query: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            filters: SearchFilters::default(),
            distance_threshold: None,
            limit: DEFAULT_SEARCH_LIMIT,
            offset: 0,
            optimize_query: false,
        }
    }
}

impl SearchOptions {
    fn validate(&self) -> MemoryResult<()> {
        if self.limit == 0 || self.limit > MAX_SEARCH_LIMIT {
            return Err(MemoryError::validation(
                "limit",
                format!("limit must be between 1 and {}", MAX_SEARCH_LIMIT),
            ));
        }
        if matches!(self.distance_threshold, Some(t) if !(t >= 0.0)) {
            return Err(MemoryError::validation(
                "distance_threshold",
                "distance_threshold must be a non-negative number",
            ));
        }
        Ok(())
    }

    fn to_query(&self, text: &str, filters: SearchFilters) -> SearchQuery {
        let mut query = SearchQuery::new(text)
            .with_filters(filters)
            .with_page(self.limit, self.offset)
            .with_optimize_query(self.optimize_query);
        if let Some(threshold) = self.distance_threshold {
            query = query.with_distance_threshold(threshold);
        }
        query
    }
}

/// Arguments of `search_long_term_memory`
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SearchLongTermMemoryArgs {
    /// Query text; empty searches by filters alone
    #[serde(default)]
    pub text: String,

    /// Filters and paging
    #[serde(flatten)]
    pub search: SearchOptions,
}

/// Arguments of `memory_prompt`
///
/// `session_id.eq` selects the working memory whose conversation is included;
/// the remaining filters apply to the long-term search.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct MemoryPromptArgs {
    /// The user's query
    pub query: String,

    /// Filters and paging
    #[serde(flatten)]
    pub search: SearchOptions,
}

/// Arguments of `set_working_memory`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SetWorkingMemoryArgs {
    /// Session id
    pub session_id: String,

    /// Structured memories; ids are generated when missing
    #[serde(default)]
    pub memories: Vec<MemoryRecord>,

    /// Conversation; ids are generated when missing
    #[serde(default)]
    pub messages: Vec<MemoryMessage>,

    /// Conversation summary
    #[serde(default)]
    pub context: Option<String>,

    /// Free-form structured data
    #[serde(default)]
    pub data: Option<Map<String, Value>>,

    /// Tenant namespace
    #[serde(default)]
    pub namespace: Option<String>,

    /// Owning user
    #[serde(default)]
    pub user_id: Option<String>,

    /// TTL in seconds; defaults to the configured TTL
    #[serde(default)]
    pub ttl_seconds: Option<u64>,

    /// Extraction strategy for promotion
    #[serde(default)]
    pub long_term_memory_strategy: Option<MemoryStrategyConfig>,
}

/// Arguments of `get_working_memory`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetWorkingMemoryArgs {
    /// Session id
    pub session_id: String,

    /// Return only the N most recent messages
    #[serde(default)]
    pub recent_messages_limit: Option<usize>,

    /// Namespace the session was written under
    #[serde(default)]
    pub namespace: Option<String>,

    /// User the session was written under
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Arguments of `get_long_term_memory`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetLongTermMemoryArgs {
    /// Record id
    pub memory_id: String,
}

/// Arguments of `edit_long_term_memory`
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct EditLongTermMemoryArgs {
    /// Record id
    pub memory_id: String,

    /// New text
    #[serde(default)]
    pub text: Option<String>,

    /// New topics
    #[serde(default)]
    pub topics: Option<Vec<String>>,

    /// New entities
    #[serde(default)]
    pub entities: Option<Vec<String>>,

    /// New memory type
    #[serde(default)]
    pub memory_type: Option<MemoryType>,

    /// New namespace
    #[serde(default)]
    pub namespace: Option<String>,

    /// New user
    #[serde(default)]
    pub user_id: Option<String>,

    /// New session
    #[serde(default)]
    pub session_id: Option<String>,

    /// New event date, ISO 8601 (e.g. `2024-01-15T14:30:00Z`)
    #[serde(default)]
    pub event_date: Option<String>,
}

/// Arguments of `delete_long_term_memories`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeleteLongTermMemoriesArgs {
    /// Record ids
    pub memory_ids: Vec<String>,
}

/// Arguments of `delete_working_memory`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeleteWorkingMemoryArgs {
    /// Session id
    pub session_id: String,

    /// Namespace the session was written under
    #[serde(default)]
    pub namespace: Option<String>,

    /// User the session was written under
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Arguments of `list_sessions`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListSessionsArgs {
    /// Restrict to a namespace
    #[serde(default)]
    pub namespace: Option<String>,

    /// Page size
    #[serde(default = "default_session_limit")]
    pub limit: usize,

    /// Page start
    #[serde(default)]
    pub offset: usize,
}

/// Acknowledgement for write tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    /// Always `ok`
    pub status: String,

    /// Number of records deleted, for deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<usize>,
}

impl AckResponse {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            deleted: None,
        }
    }

    fn deleted(count: usize) -> Self {
        Self {
            deleted: Some(count),
            ..Self::ok()
        }
    }
}

/// Result of `list_sessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionListResponse {
    /// Session ids on this page
    pub sessions: Vec<String>,

    /// Total live sessions
    pub total: usize,
}

/// Entry point for tool calls
pub struct ToolDispatcher {
    config: MemoryConfig,
    resolver: NamespaceResolver,
    clock: Arc<dyn Clock>,
    working: WorkingMemoryStore,
    long_term: LongTermMemory,
    strategies: StrategyRegistry,
    scheduler: PromotionScheduler,
}

impl ToolDispatcher {
    /// Create a dispatcher with the system clock and built-in strategies
    ///
    /// Spawns the promotion worker, so this must run inside a tokio runtime.
    pub fn new(config: MemoryConfig, storage: Arc<dyn Storage>, index: Arc<dyn SearchIndex>) -> Self {
        Self::with_components(config, storage, index, Arc::new(SystemClock), StrategyRegistry::new())
    }

    /// Create a dispatcher with a specific clock and strategy registry
    pub fn with_components(
        config: MemoryConfig,
        storage: Arc<dyn Storage>,
        index: Arc<dyn SearchIndex>,
        clock: Arc<dyn Clock>,
        strategies: StrategyRegistry,
    ) -> Self {
        let working = WorkingMemoryStore::new(storage.clone()).with_clock(clock.clone());
        let long_term = LongTermMemory::new(storage.clone(), index)
            .with_clock(clock.clone())
            .with_semantic_dedup_threshold(config.semantic_dedup_threshold);
        let scheduler =
            PromotionScheduler::start(working.clone(), long_term.clone(), strategies.clone());

        tracing::info!(
            storage = storage.name(),
            long_term_memory = config.long_term_memory,
            default_namespace = ?config.default_namespace,
            "memory dispatcher ready"
        );

        Self {
            resolver: NamespaceResolver::new(&config),
            config,
            clock,
            working,
            long_term,
            strategies,
            scheduler,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Working memory store
    pub fn working_memory(&self) -> &WorkingMemoryStore {
        &self.working
    }

    /// Long-term memory gateway
    pub fn long_term_memory(&self) -> &LongTermMemory {
        &self.long_term
    }

    /// Background job scheduler
    pub fn scheduler(&self) -> &PromotionScheduler {
        &self.scheduler
    }

    /// Wait for background jobs to drain
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Drain background jobs and stop the worker
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    /// Describe every tool
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        ToolName::ALL
            .iter()
            .map(|tool| ToolDescriptor {
                name: tool.as_str(),
                description: tool.description(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Dispatch a tool call
    pub async fn call(
        &self,
        context: &TransportContext,
        tool: &str,
        arguments: Value,
    ) -> MemoryResult<Value> {
        let tool: ToolName = tool.parse()?;

        let mut arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(MemoryError::InvalidArguments {
                    tool: tool.to_string(),
                    source: serde::de::Error::custom("arguments must be a JSON object"),
                })
            }
        };
        self.resolver
            .inject(context, tool.namespace_injection(), &mut arguments);

        if tool.requires_long_term_memory() {
            self.ensure_long_term()?;
        }

        tracing::debug!(tool = %tool, "dispatching tool call");
        let arguments = Value::Object(arguments);

        let result = match tool {
            ToolName::GetCurrentDatetime => {
                decode::<GetCurrentDatetimeArgs>(tool, arguments)?;
                serde_json::to_value(self.get_current_datetime())?
            }
            ToolName::CreateLongTermMemories => {
                serde_json::to_value(self.create_long_term_memories(decode(tool, arguments)?)?)?
            }
            ToolName::SearchLongTermMemory => serde_json::to_value(
                self.search_long_term_memory(decode(tool, arguments)?).await?,
            )?,
            ToolName::MemoryPrompt => {
                serde_json::to_value(self.memory_prompt(decode(tool, arguments)?).await?)?
            }
            ToolName::SetWorkingMemory => {
                serde_json::to_value(self.set_working_memory(decode(tool, arguments)?).await?)?
            }
            ToolName::GetWorkingMemory => {
                serde_json::to_value(self.get_working_memory(decode(tool, arguments)?).await?)?
            }
            ToolName::GetLongTermMemory => {
                serde_json::to_value(self.get_long_term_memory(decode(tool, arguments)?).await?)?
            }
            ToolName::EditLongTermMemory => {
                serde_json::to_value(self.edit_long_term_memory(decode(tool, arguments)?).await?)?
            }
            ToolName::DeleteLongTermMemories => serde_json::to_value(
                self.delete_long_term_memories(decode(tool, arguments)?).await?,
            )?,
            ToolName::DeleteWorkingMemory => serde_json::to_value(
                self.delete_working_memory(decode(tool, arguments)?).await?,
            )?,
            ToolName::ListSessions => {
                serde_json::to_value(self.list_sessions(decode(tool, arguments)?).await?)?
            }
        };

        Ok(result)
    }

    /// `get_current_datetime`
    pub fn get_current_datetime(&self) -> CurrentDateTime {
        current_datetime(self.clock.as_ref())
    }

    /// `create_long_term_memories`: queue records for indexing with dedup
    pub fn create_long_term_memories(
        &self,
        args: CreateLongTermMemoriesArgs,
    ) -> MemoryResult<AckResponse> {
        self.ensure_long_term()?;

        let mut records = Vec::with_capacity(args.memories.len());
        for mut record in args.memories {
            normalize_record(&mut record);
            if record.text.trim().is_empty() {
                return Err(MemoryError::validation(
                    "memories",
                    format!("Memory text cannot be empty (memory ID: {})", record.id),
                ));
            }
            if record.namespace.is_none() {
                record.namespace = self.config.default_namespace.clone();
            }
            if record.user_id.is_none() {
                record.user_id = self.config.default_user_id.clone();
            }
            records.push(record);
        }

        let count = records.len();
        if !records.is_empty() && !self.scheduler.index(records, true) {
            tracing::warn!(count, "indexing job was not queued");
        }
        tracing::debug!(count, "long-term memories queued for indexing");

        Ok(AckResponse::ok())
    }

    /// `search_long_term_memory`: invalid paging and search failures degrade to
    /// an empty result
    pub async fn search_long_term_memory(
        &self,
        args: SearchLongTermMemoryArgs,
    ) -> MemoryResult<SearchResults> {
        self.ensure_long_term()?;
        if let Err(e) = args.search.validate() {
            tracing::warn!(error = %e, "invalid search options, returning no results");
            return Ok(SearchResults::empty());
        }

        let query = args.search.to_query(&args.text, args.search.filters.clone());
        Ok(self.search_or_empty(&query).await)
    }

    /// `memory_prompt`: hydrate a query with session and long-term context
    pub async fn memory_prompt(&self, args: MemoryPromptArgs) -> MemoryResult<MemoryPrompt> {
        let search_valid = match args.search.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "invalid search options, skipping long-term memories");
                false
            }
        };
        let filters = &args.search.filters;
        let namespace = filters.namespace.as_ref().and_then(|f| f.eq.as_deref());
        let user_id = filters.user_id.as_ref().and_then(|f| f.eq.as_deref());

        let session = match filters.session_id.as_ref().and_then(|f| f.eq.as_deref()) {
            Some(session_id) => Some(self.working.get(session_id, namespace, user_id, None).await?),
            None => None,
        };

        let search_needed = !args.query.trim().is_empty()
            || filters.topics.is_some()
            || filters.entities.is_some()
            || filters.created_at.is_some()
            || filters.last_accessed.is_some()
            || filters.event_date.is_some()
            || filters.user_id.is_some()
            || filters.memory_type.is_some();

        let memories = if self.config.long_term_memory && search_needed && search_valid {
            // the session's own conversation is already in the prompt
            let long_term_filters = SearchFilters {
                session_id: None,
                ..filters.clone()
            };
            let query = args.search.to_query(&args.query, long_term_filters);
            self.search_or_empty(&query).await.memories
        } else {
            Vec::new()
        };

        if !memories.is_empty() {
            let ids = memories.iter().map(|m| m.record.id.clone()).collect();
            self.scheduler.touch_last_accessed(ids);
        }

        Ok(MemoryPrompt::render(&args.query, session.as_ref(), &memories))
    }

    /// `set_working_memory`: replace the session and schedule promotion
    pub async fn set_working_memory(&self, args: SetWorkingMemoryArgs) -> MemoryResult<WorkingMemory> {
        let strategy = args.long_term_memory_strategy.unwrap_or_default();
        self.strategies.validate(&strategy.strategy)?;

        let mut memories = args.memories;
        for record in &mut memories {
            normalize_record(record);
        }
        let mut messages = args.messages;
        for message in &mut messages {
            if message.id.trim().is_empty() {
                message.id = new_id();
            }
            message.persisted_at = None;
        }

        let memory = WorkingMemory {
            session_id: args.session_id,
            messages,
            memories,
            context: args.context,
            data: args.data.unwrap_or_default(),
            namespace: args.namespace,
            user_id: args.user_id,
            ttl_seconds: args.ttl_seconds.unwrap_or(self.config.default_ttl_seconds),
            long_term_memory_strategy: strategy,
            last_accessed: None,
        };

        let stored = self.working.set(memory).await?;

        if self.config.long_term_memory && stored.has_pending() {
            self.scheduler.promote(SessionKey::new(
                stored.session_id.clone(),
                stored.namespace.clone(),
                stored.user_id.clone(),
            ));
        }

        Ok(stored)
    }

    /// `get_working_memory`
    pub async fn get_working_memory(&self, args: GetWorkingMemoryArgs) -> MemoryResult<WorkingMemory> {
        self.working
            .get(
                &args.session_id,
                args.namespace.as_deref(),
                args.user_id.as_deref(),
                args.recent_messages_limit,
            )
            .await
    }

    /// `get_long_term_memory`
    pub async fn get_long_term_memory(&self, args: GetLongTermMemoryArgs) -> MemoryResult<MemoryRecord> {
        self.ensure_long_term()?;
        self.long_term
            .get_by_id(&args.memory_id)
            .await?
            .ok_or_else(|| MemoryError::not_found(args.memory_id))
    }

    /// `edit_long_term_memory`
    pub async fn edit_long_term_memory(
        &self,
        args: EditLongTermMemoryArgs,
    ) -> MemoryResult<MemoryRecord> {
        self.ensure_long_term()?;

        let event_date = args
            .event_date
            .as_deref()
            .map(parse_iso8601)
            .transpose()
            .map_err(|message| MemoryError::validation("event_date", message))?;

        let update = MemoryRecordUpdate {
            text: args.text,
            topics: args.topics,
            entities: args.entities,
            memory_type: args.memory_type,
            namespace: args.namespace,
            user_id: args.user_id,
            session_id: args.session_id,
            event_date,
        };
        if update.is_empty() {
            return Err(MemoryError::validation(
                "memory_id",
                "No fields provided for update",
            ));
        }

        self.long_term.update(&args.memory_id, update).await
    }

    /// `delete_long_term_memories`
    pub async fn delete_long_term_memories(
        &self,
        args: DeleteLongTermMemoriesArgs,
    ) -> MemoryResult<AckResponse> {
        self.ensure_long_term()?;
        let deleted = self.long_term.delete(&args.memory_ids).await?;
        Ok(AckResponse::deleted(deleted))
    }

    /// `delete_working_memory`
    pub async fn delete_working_memory(
        &self,
        args: DeleteWorkingMemoryArgs,
    ) -> MemoryResult<AckResponse> {
        let existed = self
            .working
            .delete(&args.session_id, args.namespace.as_deref(), args.user_id.as_deref())
            .await?;
        tracing::debug!(session_id = %args.session_id, existed, "working memory deleted");
        Ok(AckResponse::ok())
    }

    /// `list_sessions`
    pub async fn list_sessions(&self, args: ListSessionsArgs) -> MemoryResult<SessionListResponse> {
        if args.limit == 0 || args.limit > MAX_SEARCH_LIMIT {
            return Err(MemoryError::validation(
                "limit",
                format!("limit must be between 1 and {}", MAX_SEARCH_LIMIT),
            ));
        }

        let (total, sessions) = self
            .working
            .list_sessions(args.namespace.as_deref(), args.limit, args.offset)
            .await?;
        Ok(SessionListResponse { sessions, total })
    }

    fn ensure_long_term(&self) -> MemoryResult<()> {
        if self.config.long_term_memory {
            Ok(())
        } else {
            Err(MemoryError::long_term_disabled())
        }
    }

    async fn search_or_empty(&self, query: &SearchQuery) -> SearchResults {
        match self.long_term.search(query).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "long-term search failed, returning no results");
                SearchResults::empty()
            }
        }
    }
}

/// Assign a missing id and clear the promotion flag
fn normalize_record(record: &mut MemoryRecord) {
    if record.id.trim().is_empty() {
        record.id = new_id();
    }
    record.persisted_at = None;
}

fn decode<T: DeserializeOwned>(tool: ToolName, arguments: Value) -> MemoryResult<T> {
    serde_json::from_value(arguments).map_err(|source| MemoryError::InvalidArguments {
        tool: tool.to_string(),
        source,
    })
}
