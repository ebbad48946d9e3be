//! HTTP transport
//!
//! ## Routes
//!
//! - `GET /health`: liveness, never authenticated
//! - `GET /tools`, `GET /{namespace}/tools`: tool descriptors
//! - `POST /tools/{name}`, `POST /{namespace}/tools/{name}`: invoke a tool with
//!   the JSON body as arguments
//!
//! The `{namespace}` segment is handed to the dispatcher as the transport
//! namespace. Results are wrapped as `{"result": ...}`; failures are
//! `{"error": kind, "detail": message}` with a status derived from the error kind.

use crate::auth::{require_bearer, JwtAuthenticator};
use crate::settings::Settings;
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use rexis_memory::{MemoryError, ToolDescriptor, ToolDispatcher, TransportContext};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<ToolDispatcher>,
}

impl AppState {
    /// Wrap a dispatcher
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }
}

/// A tool failure rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(MemoryError);

impl From<MemoryError> for ApiError {
    fn from(error: MemoryError) -> Self {
        Self(error)
    }
}

/// Status code for an error kind
pub fn status_for(error: &MemoryError) -> StatusCode {
    match error {
        MemoryError::Validation { .. } | MemoryError::InvalidArguments { .. } => {
            StatusCode::BAD_REQUEST
        }
        MemoryError::NotFound { .. } | MemoryError::UnknownTool(_) => StatusCode::NOT_FOUND,
        MemoryError::FeatureDisabled { .. } => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "tool call failed");
        } else {
            tracing::debug!(error = %self.0, "tool call rejected");
        }

        let body = Json(json!({"error": self.0.kind(), "detail": self.0.to_string()}));
        (status, body).into_response()
    }
}

/// Build the router; `auth` guards everything except `/health`
pub fn router(state: AppState, auth: Option<Arc<JwtAuthenticator>>) -> Router {
    let mut tools = Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/:name", post(call_tool))
        .route("/:namespace/tools", get(list_tools_in_namespace))
        .route("/:namespace/tools/:name", post(call_tool_in_namespace));

    if let Some(auth) = auth {
        tools = tools.route_layer(middleware::from_fn_with_state(auth, require_bearer));
    }

    Router::new()
        .route("/health", get(health))
        .merge(tools)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Bind and serve until ctrl-c
pub async fn serve(dispatcher: Arc<ToolDispatcher>, settings: &Settings) -> anyhow::Result<()> {
    let auth = if settings.disable_auth {
        tracing::warn!("authentication is disabled");
        None
    } else {
        Some(Arc::new(JwtAuthenticator::from_settings(settings)?))
    };

    let address = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;

    tracing::info!(address = %address, "HTTP transport listening");

    axum::serve(listener, router(AppState::new(dispatcher), auth))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolDescriptor>> {
    Json(state.dispatcher.list_tools())
}

async fn list_tools_in_namespace(
    State(state): State<AppState>,
    Path(_namespace): Path<String>,
) -> Json<Vec<ToolDescriptor>> {
    Json(state.dispatcher.list_tools())
}

async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    invoke(&state, TransportContext::stream(None::<String>), &name, &body).await
}

async fn call_tool_in_namespace(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    invoke(&state, TransportContext::stream(Some(namespace)), &name, &body).await
}

async fn invoke(
    state: &AppState,
    context: TransportContext,
    name: &str,
    body: &[u8],
) -> Result<Json<Value>, ApiError> {
    let arguments = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(body).map_err(|source| MemoryError::InvalidArguments {
            tool: name.to_string(),
            source,
        })?
    };

    let result = state.dispatcher.call(&context, name, arguments).await?;
    Ok(Json(json!({ "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{jwks_server, sign, valid_claims, TEST_KID};
    use axum::body::Body;
    use axum::http::{header, Request};
    use pretty_assertions::assert_eq;
    use rexis_memory::{InMemorySearchIndex, InMemoryStorage, MemoryConfig};
    use tower::ServiceExt;

    fn app(config: MemoryConfig, auth: Option<Arc<JwtAuthenticator>>) -> Router {
        let dispatcher = ToolDispatcher::new(
            config,
            Arc::new(InMemoryStorage::new()),
            Arc::new(InMemorySearchIndex::new()),
        );
        router(AppState::new(Arc::new(dispatcher)), auth)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_health_and_tool_listing() {
        let app = app(MemoryConfig::new(), None);

        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));

        let (status, body) = send(&app, Request::get("/acme/tools").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body
            .as_array()
            .unwrap()
            .iter()
            .any(|tool| tool["name"] == "memory_prompt"));
    }

    #[tokio::test]
    async fn test_path_namespace_reaches_dispatcher() {
        let app = app(MemoryConfig::new(), None);

        let (status, body) = send(
            &app,
            post_json(
                "/acct42/tools/set_working_memory",
                json!({"session_id": "s1", "messages": [{"role": "user", "content": "hi"}]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["namespace"], "acct42");

        let (_, body) = send(
            &app,
            post_json(
                "/tools/get_working_memory",
                json!({"session_id": "s1", "namespace": "acct42"}),
            ),
        )
        .await;
        assert_eq!(body["result"]["messages"][0]["content"], "hi");
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let app = app(MemoryConfig::new().with_long_term_memory(false), None);

        let (status, body) = send(&app, post_json("/tools/unknown_tool", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_tool");

        let (status, body) = send(
            &app,
            post_json("/tools/get_long_term_memory", json!({"memory_id": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "feature_disabled");
        assert_eq!(body["detail"], "Long-term memory is disabled");

        let (status, body) = send(
            &app,
            post_json(
                "/tools/set_working_memory",
                json!({"session_id": "s1", "messages": [{"id": "m1", "role": "user", "content": " "}]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");

        let bad_json = Request::post("/tools/get_working_memory")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, bad_json).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_arguments");
    }

    #[tokio::test]
    async fn test_empty_body_means_no_arguments() {
        let app = app(MemoryConfig::new(), None);
        let request = Request::post("/tools/get_current_datetime")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["result"]["iso_utc"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_auth_guards_tools_but_not_health() {
        let server = jwks_server(1).await;
        let auth = JwtAuthenticator::new(format!("{}/jwks", server.uri()))
            .with_issuer("https://auth.example.com")
            .with_audience("memory-api");
        let app = app(MemoryConfig::new(), Some(Arc::new(auth)));

        let (status, _) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, Request::get("/tools").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let request = Request::get("/tools")
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", sign(TEST_KID, valid_claims())),
            )
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
    }
}
