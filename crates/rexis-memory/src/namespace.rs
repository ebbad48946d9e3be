//! Namespace resolution
//!
//! Every tool call carries a [`TransportContext`] describing how it arrived.
//! Stream transports (HTTP) may carry a namespace as a path segment; pipe
//! transports (stdio) never do. The [`NamespaceResolver`] turns that context
//! plus the configured defaults into a namespace and injects it into the
//! arguments of tools that declare they accept one.
//!
//! ## Precedence
//!
//! 1. An explicit `namespace` argument is never overwritten
//! 2. The transport path namespace
//! 3. The configured default namespace
//!
//! The default user is injected into the same tools when `user_id` is absent.

use crate::config::MemoryConfig;
use crate::error::{MemoryError, MemoryResult};
use serde_json::{json, Map, Value};

/// How a tool call reached the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportContext {
    /// Request/response stream transport, optionally with a path namespace
    Stream {
        /// Namespace taken from the request path
        path_namespace: Option<String>,
    },

    /// Pipe transport; has no per-request namespace
    Pipe,

    /// Context could not be read
    Unavailable(String),
}

impl TransportContext {
    /// Stream context with a path namespace
    pub fn stream(path_namespace: Option<impl Into<String>>) -> Self {
        Self::Stream {
            path_namespace: path_namespace.map(Into::into),
        }
    }

    /// Pipe context
    pub fn pipe() -> Self {
        Self::Pipe
    }

    /// The namespace carried by the transport, if any
    pub fn path_namespace(&self) -> MemoryResult<Option<&str>> {
        match self {
            Self::Stream { path_namespace } => Ok(path_namespace
                .as_deref()
                .map(str::trim)
                .filter(|ns| !ns.is_empty())),
            Self::Pipe => Ok(None),
            Self::Unavailable(reason) => Err(MemoryError::TransportContextUnavailable(reason.clone())),
        }
    }
}

/// Whether and how a tool takes an injected namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceInjection {
    /// Arguments pass through untouched
    None,

    /// Inject as a tag filter: `{"eq": namespace}`
    Filter,

    /// Inject as a plain string
    Plain,
}

/// Resolves and injects tenant namespace and default user
#[derive(Debug, Clone, Default)]
pub struct NamespaceResolver {
    default_namespace: Option<String>,
    default_user_id: Option<String>,
}

impl NamespaceResolver {
    /// Build from config
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            default_namespace: config.default_namespace.clone(),
            default_user_id: config.default_user_id.clone(),
        }
    }

    /// Namespace for a call: path segment first, then the configured default
    pub fn resolve(&self, context: &TransportContext) -> Option<String> {
        match context.path_namespace() {
            Ok(Some(namespace)) => Some(namespace.to_string()),
            Ok(None) => self.default_namespace.clone(),
            Err(e) => {
                tracing::debug!(error = %e, "no transport namespace, using default");
                self.default_namespace.clone()
            }
        }
    }

    /// Configured default user
    pub fn default_user_id(&self) -> Option<&str> {
        self.default_user_id.as_deref()
    }

    /// Configured default namespace
    pub fn default_namespace(&self) -> Option<&str> {
        self.default_namespace.as_deref()
    }

    /// Fill in `namespace` and `user_id` when absent
    pub fn inject(
        &self,
        context: &TransportContext,
        injection: NamespaceInjection,
        arguments: &mut Map<String, Value>,
    ) {
        if injection == NamespaceInjection::None {
            return;
        }

        if let Some(namespace) = self.resolve(context) {
            if inject_field(arguments, "namespace", &namespace, injection) {
                tracing::debug!(namespace = %namespace, "injected namespace");
            }
        }

        if let Some(user_id) = &self.default_user_id {
            inject_field(arguments, "user_id", user_id, injection);
        }
    }
}

fn inject_field(
    arguments: &mut Map<String, Value>,
    field: &str,
    value: &str,
    injection: NamespaceInjection,
) -> bool {
    if arguments.get(field).is_some_and(|v| !v.is_null()) {
        return false;
    }

    let injected = match injection {
        NamespaceInjection::Filter => json!({ "eq": value }),
        NamespaceInjection::Plain => Value::String(value.to_string()),
        NamespaceInjection::None => return false,
    };
    arguments.insert(field.to_string(), injected);
    true
}
