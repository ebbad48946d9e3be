//! Line-delimited JSON transport over stdin/stdout
//!
//! Each input line is one request:
//!
//! ```json
//! {"id": 1, "tool": "search_long_term_memory", "arguments": {"text": "coffee"}}
//! {"id": 2, "list_tools": true}
//! ```
//!
//! and each output line one response, `{"id", "result"}` or
//! `{"id", "error": {"kind", "detail"}}`. Requests run concurrently, so responses
//! may arrive out of order; match them by `id`. There is no path namespace on
//! this transport, so namespace injection only applies configured defaults.

use futures::{SinkExt, StreamExt};
use rexis_memory::{MemoryError, ToolDispatcher, TransportContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    list_tools: bool,
}

#[derive(Debug, Serialize)]
struct Response {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    detail: String,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorBody {
                kind,
                detail: detail.into(),
            }),
        }
    }

    fn from_error(id: Value, error: &MemoryError) -> Self {
        Self::err(id, error.kind(), error.to_string())
    }
}

/// Serve the process's stdin and stdout until stdin closes
pub async fn serve(dispatcher: Arc<ToolDispatcher>) -> anyhow::Result<()> {
    tracing::info!("stdio transport ready");
    run(dispatcher, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve requests from `input`, writing responses to `output`
pub async fn run<R, W>(dispatcher: Arc<ToolDispatcher>, input: R, output: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();

    let writer = tokio::spawn(async move {
        let mut sink = FramedWrite::new(output, LinesCodec::new());
        while let Some(response) = rx.recv().await {
            let line = match serde_json::to_string(&response) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode response");
                    continue;
                }
            };
            sink.send(line).await?;
        }
        anyhow::Ok(())
    });

    let mut lines = FramedRead::new(input, LinesCodec::new());
    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let _ = tx.send(Response::err(Value::Null, "invalid_request", e.to_string()));
                continue;
            }
        };

        if request.list_tools {
            let tools = serde_json::to_value(dispatcher.list_tools())?;
            let _ = tx.send(Response::ok(request.id, tools));
            continue;
        }

        let Some(tool) = request.tool else {
            let _ = tx.send(Response::err(
                request.id,
                "invalid_request",
                "request needs either 'tool' or 'list_tools'",
            ));
            continue;
        };

        let dispatcher = Arc::clone(&dispatcher);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = match dispatcher
                .call(&TransportContext::pipe(), &tool, request.arguments)
                .await
            {
                Ok(result) => Response::ok(request.id, result),
                Err(e) => {
                    if !e.is_client_error() {
                        tracing::error!(tool = %tool, error = %e, "tool call failed");
                    }
                    Response::from_error(request.id, &e)
                }
            };
            let _ = tx.send(response);
        });
    }

    tracing::info!("stdin closed");
    drop(tx);
    writer.await??;
    Ok(())
}
