//! Shared fixtures: an in-process MCP tool server and a scripted model

#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{StreamExt, channel::mpsc, stream};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use mcp_interpreter::llm::{GenerateRequest, ModelClient};
use mcp_interpreter::{Error, Result};

/// Observable state of a fake MCP server
#[derive(Default)]
pub struct ServerState {
    tools: Vec<Value>,
    failing_tools: Vec<String>,
    sse_replies: bool,
    /// `tools/call` params received, in order
    pub calls: Mutex<Vec<Value>>,
    /// `tools/list` requests received
    pub lists: AtomicUsize,
    /// DELETE requests carrying our session id
    pub closes: AtomicUsize,
    /// Legacy mode: sender feeding the open event stream
    events: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

/// A running MCP tool server on an ephemeral port
pub struct FakeMcpServer {
    /// Streamable HTTP endpoint
    pub url: String,
    /// Shared state
    pub state: Arc<ServerState>,
}

const SESSION_ID: &str = "fake-session-1";
const LEGACY_SESSION_ID: &str = "abc";

impl FakeMcpServer {
    /// Server exposing tools with the given names and empty schemas
    pub async fn start(name: &str, tools: &[&str]) -> Self {
        let tools = tools
            .iter()
            .map(|t| json!({"name": t, "description": format!("{t} on {name}"), "inputSchema": {"type": "object"}}))
            .collect();
        Self::spawn(ServerState {
            tools,
            ..ServerState::default()
        })
        .await
    }

    /// Server exposing fully described tools
    pub async fn with_tools(tools: Vec<Value>) -> Self {
        Self::spawn(ServerState {
            tools,
            ..ServerState::default()
        })
        .await
    }

    /// Server whose replies are SSE-framed
    pub async fn sse(tools: &[&str]) -> Self {
        let tools = tools
            .iter()
            .map(|t| json!({"name": t, "inputSchema": {"type": "object"}}))
            .collect();
        Self::spawn(ServerState {
            tools,
            sse_replies: true,
            ..ServerState::default()
        })
        .await
    }

    /// Server where every call to `failing` reports an error
    pub async fn failing_on(tools: &[&str], failing: &str) -> Self {
        let tools = tools
            .iter()
            .map(|t| json!({"name": t, "inputSchema": {"type": "object"}}))
            .collect();
        Self::spawn(ServerState {
            tools,
            failing_tools: vec![failing.to_string()],
            ..ServerState::default()
        })
        .await
    }

    /// Legacy HTTP+SSE server: GET /sse streams the endpoint event and
    /// every reply, POST /messages/ only answers 202
    pub async fn legacy(tools: &[&str]) -> Self {
        let tools = tools
            .iter()
            .map(|t| json!({"name": t, "inputSchema": {"type": "object"}}))
            .collect();
        let state = Arc::new(ServerState {
            tools,
            ..ServerState::default()
        });
        let app = Router::new()
            .route("/sse", get(legacy_stream_handler))
            .route("/messages/", post(legacy_message_handler))
            .with_state(Arc::clone(&state));
        let addr = serve(app).await;

        Self {
            url: format!("http://{addr}/sse"),
            state,
        }
    }

    async fn spawn(state: ServerState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/mcp", post(rpc_handler).delete(delete_handler))
            .with_state(Arc::clone(&state));
        let addr = serve(app).await;

        Self {
            url: format!("http://{addr}/mcp"),
            state,
        }
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.lock().len()
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Wait briefly for in-flight DELETEs to land
    pub async fn wait_for_closes(&self, expected: usize) -> usize {
        for _ in 0..100 {
            if self.close_count() >= expected {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.close_count()
    }
}

async fn serve(app: Router) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Full JSON-RPC reply to `body`, `None` for notifications
fn rpc_reply(state: &ServerState, body: &Value) -> Option<Value> {
    let id = body.get("id").cloned()?;
    let method = body["method"].as_str().unwrap_or_default();

    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "fake", "version": "1.0.0"}
        }),
        "tools/list" => {
            state.lists.fetch_add(1, Ordering::SeqCst);
            json!({"tools": state.tools})
        }
        "tools/call" => {
            let params = body["params"].clone();
            state.calls.lock().push(params.clone());
            let name = params["name"].as_str().unwrap_or_default();
            if state.failing_tools.iter().any(|t| t == name) {
                json!({"content": [{"type": "text", "text": "database is locked"}], "isError": true})
            } else {
                let payload = json!({"status": "ok", "tool": name, "arguments": params["arguments"]});
                json!({"content": [{"type": "text", "text": payload.to_string()}], "isError": false})
            }
        }
        _ => {
            return Some(json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}}));
        }
    };

    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

async fn rpc_handler(State(state): State<Arc<ServerState>>, Json(body): Json<Value>) -> Response {
    let Some(message) = rpc_reply(&state, &body) else {
        return StatusCode::ACCEPTED.into_response();
    };
    let method = body["method"].as_str().unwrap_or_default();

    let mut response = if state.sse_replies {
        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            format!("event: message\ndata: {message}\n\n"),
        )
            .into_response()
    } else {
        Json(message).into_response()
    };

    if method == "initialize" {
        response
            .headers_mut()
            .insert("mcp-session-id", SESSION_ID.parse().unwrap());
    }
    response
}

async fn legacy_stream_handler(State(state): State<Arc<ServerState>>) -> Response {
    let (tx, rx) = mpsc::unbounded();
    *state.events.lock() = Some(tx);

    let endpoint = format!("event: endpoint\ndata: /messages/?session_id={LEGACY_SESSION_ID}\n\n");
    let events = stream::once(async move { endpoint })
        .chain(rx.map(|message| format!("event: message\ndata: {message}\n\n")))
        .map(Ok::<_, Infallible>);

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(events),
    )
        .into_response()
}

async fn legacy_message_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> StatusCode {
    if query.get("session_id").map(String::as_str) != Some(LEGACY_SESSION_ID) {
        return StatusCode::BAD_REQUEST;
    }
    let Some(message) = rpc_reply(&state, &body) else {
        return StatusCode::ACCEPTED;
    };
    match state.events.lock().as_ref() {
        Some(events) if events.unbounded_send(message.to_string()).is_ok() => StatusCode::ACCEPTED,
        _ => StatusCode::GONE,
    }
}

async fn delete_handler(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> StatusCode {
    if headers.get("mcp-session-id").and_then(|v| v.to_str().ok()) == Some(SESSION_ID) {
        state.closes.fetch_add(1, Ordering::SeqCst);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// Model returning a fixed reply
pub struct FixedModel {
    reply: std::result::Result<String, String>,
    pub requests: Mutex<Vec<GenerateRequest>>,
}

impl FixedModel {
    pub fn decision(tool: &str, params: Value) -> Arc<Self> {
        Self::replying(&json!({"tool": tool, "params": params}).to_string())
    }

    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            reply: Err("503 Service Unavailable".to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ModelClient for FixedModel {
    fn model(&self) -> &str {
        "fixed"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        self.requests.lock().push(request);
        self.reply.clone().map_err(Error::Model)
    }
}
