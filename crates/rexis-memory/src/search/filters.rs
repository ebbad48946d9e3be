//! Search filter expressions
//!
//! Each filterable field takes an operator expression; all operators inside an
//! expression and all fields of a [`SearchFilters`] are ANDed together. There is
//! no OR across fields.

use crate::model::MemoryRecord;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Operators for string-valued fields
///
/// On scalar fields (`session_id`, `namespace`, `user_id`, `memory_type`) `eq`/`ne`
/// compare the value and `any` is list membership. On set-valued fields
/// (`topics`, `entities`) `eq`/`ne` test containment, `any` requires at least one
/// shared element and `all` requires every listed element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TagFilter {
    /// Equal to / contains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<String>,

    /// Not equal to / does not contain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ne: Option<String>,

    /// Any of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any: Option<Vec<String>>,

    /// All of (set-valued fields only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<String>>,
}

impl TagFilter {
    /// `{"eq": value}`
    pub fn eq(value: impl Into<String>) -> Self {
        Self {
            eq: Some(value.into()),
            ..Self::default()
        }
    }

    /// `{"ne": value}`
    pub fn ne(value: impl Into<String>) -> Self {
        Self {
            ne: Some(value.into()),
            ..Self::default()
        }
    }

    /// `{"any": values}`
    pub fn any<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            any: Some(values.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// `{"all": values}`
    pub fn all<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            all: Some(values.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Match a single optional value
    pub fn matches_scalar(&self, value: Option<&str>) -> bool {
        if let Some(eq) = &self.eq {
            if value != Some(eq.as_str()) {
                return false;
            }
        }
        if let Some(ne) = &self.ne {
            if value == Some(ne.as_str()) {
                return false;
            }
        }
        if let Some(any) = &self.any {
            match value {
                Some(v) if any.iter().any(|a| a == v) => {}
                _ => return false,
            }
        }
        if let Some(all) = &self.all {
            // A scalar can only satisfy "all" of a single-valued list
            if !all.iter().all(|a| Some(a.as_str()) == value) {
                return false;
            }
        }
        true
    }

    /// Match a set of values
    pub fn matches_set(&self, values: &[String]) -> bool {
        let contains = |needle: &String| values.iter().any(|v| v == needle);

        if let Some(eq) = &self.eq {
            if !contains(eq) {
                return false;
            }
        }
        if let Some(ne) = &self.ne {
            if contains(ne) {
                return false;
            }
        }
        if let Some(any) = &self.any {
            if !any.iter().any(contains) {
                return false;
            }
        }
        if let Some(all) = &self.all {
            if !all.iter().all(contains) {
                return false;
            }
        }
        true
    }
}

/// Operators for timestamp fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DateTimeFilter {
    /// Equal to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<DateTime<Utc>>,

    /// Not equal to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ne: Option<DateTime<Utc>>,

    /// Strictly after
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<DateTime<Utc>>,

    /// At or after
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<DateTime<Utc>>,

    /// Strictly before
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<DateTime<Utc>>,

    /// At or before
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<DateTime<Utc>>,

    /// Inclusive range `[start, end]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between: Option<[DateTime<Utc>; 2]>,
}

impl DateTimeFilter {
    /// Inclusive range
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            between: Some([start, end]),
            ..Self::default()
        }
    }

    /// Match an optional timestamp; a missing value fails every operator but `ne`
    pub fn matches(&self, value: Option<DateTime<Utc>>) -> bool {
        let check = |bound: &Option<DateTime<Utc>>, op: fn(&DateTime<Utc>, &DateTime<Utc>) -> bool| {
            match (bound, value) {
                (None, _) => true,
                (Some(bound), Some(value)) => op(&value, bound),
                (Some(_), None) => false,
            }
        };

        if let (Some(ne), Some(value)) = (&self.ne, value) {
            if value == *ne {
                return false;
            }
        }

        let in_range = match (&self.between, value) {
            (None, _) => true,
            (Some([start, end]), Some(value)) => value >= *start && value <= *end,
            (Some(_), None) => false,
        };

        in_range
            && check(&self.eq, |v, b| v == b)
            && check(&self.gt, |v, b| v > b)
            && check(&self.gte, |v, b| v >= b)
            && check(&self.lt, |v, b| v < b)
            && check(&self.lte, |v, b| v <= b)
    }
}

/// Filters over long-term memory fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchFilters {
    /// Session filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<TagFilter>,

    /// Namespace filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<TagFilter>,

    /// User filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<TagFilter>,

    /// Memory type filter (`semantic`, `episodic`, `message`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<TagFilter>,

    /// Topics filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<TagFilter>,

    /// Entities filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<TagFilter>,

    /// Creation time filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTimeFilter>,

    /// Last access time filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTimeFilter>,

    /// Event date filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<DateTimeFilter>,
}

impl SearchFilters {
    /// No filters
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a namespace
    pub fn with_namespace(mut self, filter: TagFilter) -> Self {
        self.namespace = Some(filter);
        self
    }

    /// Restrict to a user
    pub fn with_user_id(mut self, filter: TagFilter) -> Self {
        self.user_id = Some(filter);
        self
    }

    /// Restrict to a session
    pub fn with_session_id(mut self, filter: TagFilter) -> Self {
        self.session_id = Some(filter);
        self
    }

    /// Restrict by memory type
    pub fn with_memory_type(mut self, filter: TagFilter) -> Self {
        self.memory_type = Some(filter);
        self
    }

    /// Restrict by topics
    pub fn with_topics(mut self, filter: TagFilter) -> Self {
        self.topics = Some(filter);
        self
    }

    /// Whether no field is filtered
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether a record passes every filter
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        fn scalar(filter: &Option<TagFilter>, value: Option<&str>) -> bool {
            filter.as_ref().map_or(true, |f| f.matches_scalar(value))
        }
        fn set(filter: &Option<TagFilter>, values: &[String]) -> bool {
            filter.as_ref().map_or(true, |f| f.matches_set(values))
        }
        fn time(filter: &Option<DateTimeFilter>, value: Option<DateTime<Utc>>) -> bool {
            filter.as_ref().map_or(true, |f| f.matches(value))
        }

        scalar(&self.session_id, record.session_id.as_deref())
            && scalar(&self.namespace, record.namespace.as_deref())
            && scalar(&self.user_id, record.user_id.as_deref())
            && scalar(&self.memory_type, Some(record.memory_type.as_str()))
            && set(&self.topics, &record.topics)
            && set(&self.entities, &record.entities)
            && time(&self.created_at, record.created_at)
            && time(&self.last_accessed, record.last_accessed)
            && time(&self.event_date, record.event_date)
    }
}
