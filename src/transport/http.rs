//! HTTP transport for MCP tool servers
//!
//! Two modes:
//! - Streamable HTTP: every JSON-RPC message is POSTed to the endpoint, the
//!   reply is either plain JSON or a short SSE stream.
//! - Legacy SSE: GET the SSE endpoint and keep the stream open. The first
//!   `endpoint` event names the URL messages are POSTed to; the server
//!   answers those POSTs with `202 Accepted` and sends each reply as a
//!   `message` event on the stream, matched back to its request by id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::Transport;
use crate::protocol::{
    InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
    RequestId, is_supported_version,
};
use crate::{Error, Result};

const SESSION_HEADER: &str = "mcp-session-id";
const VERSION_HEADER: &str = "mcp-protocol-version";

/// Requests waiting for their reply on the legacy SSE stream
type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;

/// HTTP transport for one MCP server
pub struct HttpTransport {
    /// HTTP client
    client: Client,
    /// Base URL (SSE endpoint or Streamable HTTP endpoint)
    base_url: String,
    /// Message endpoint (from the SSE handshake, or the base URL)
    message_url: RwLock<Option<String>>,
    /// Custom headers
    headers: HashMap<String, String>,
    /// Session ID assigned by the server
    session_id: RwLock<Option<String>>,
    /// Protocol version negotiated during `initialize`
    protocol_version: RwLock<String>,
    /// Request ID counter
    request_id: AtomicU64,
    /// Connected flag
    connected: AtomicBool,
    /// Use Streamable HTTP (direct POST, no SSE handshake)
    streamable_http: bool,
    /// Per-message timeout
    timeout: Duration,
    /// Legacy SSE: replies not yet delivered
    pending: Pending,
    /// Legacy SSE: task reading the event stream
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransport {
    /// Create a new HTTP transport
    ///
    /// If `streamable_http` is true, uses direct POST without SSE handshake.
    /// Otherwise uses SSE protocol (GET for endpoint, POST for messages).
    pub fn new(
        url: &str,
        headers: HashMap<String, String>,
        timeout: Duration,
        streamable_http: bool,
    ) -> Result<Arc<Self>> {
        // No overall client timeout: the legacy event stream stays open for
        // the life of the connection. Messages set their own.
        let client = Client::builder()
            .connect_timeout(timeout)
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Arc::new(Self {
            client,
            base_url: url.to_string(),
            message_url: RwLock::new(None),
            headers,
            session_id: RwLock::new(None),
            protocol_version: RwLock::new(PROTOCOL_VERSION.to_string()),
            request_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            streamable_http,
            timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
            reader: Mutex::new(None),
        }))
    }

    /// Base URL this transport was created for
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Protocol version in use (negotiated once `initialize` succeeded)
    #[must_use]
    pub fn protocol_version(&self) -> String {
        self.protocol_version.read().clone()
    }

    /// Run the MCP handshake
    ///
    /// For SSE mode: reads the message endpoint from the SSE stream first.
    /// For Streamable HTTP: POSTs to the URL directly.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        if self.streamable_http {
            *self.message_url.write() = Some(self.base_url.clone());
            debug!(url = %self.base_url, "Streamable HTTP mode - direct POST");
        } else {
            let message_endpoint = self.establish_sse_connection().await?;
            let full_message_url = self.resolve_message_url(&message_endpoint)?;
            *self.message_url.write() = Some(full_message_url.clone());
            info!(sse_url = %self.base_url, message_url = %full_message_url, "SSE handshake complete");
        }

        let request = JsonRpcRequest::new(
            RequestId::Number(0),
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        );

        let result = self.send_request(&request).await?.into_result().map_err(|e| {
            Error::Protocol(format!("Initialize failed: {e}"))
        })?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| Error::Protocol(format!("Invalid initialize result: {e}")))?;

        if is_supported_version(&init.protocol_version) {
            *self.protocol_version.write() = init.protocol_version.clone();
        } else {
            warn!(
                url = %self.base_url,
                version = %init.protocol_version,
                "Server chose an unknown protocol version, keeping ours"
            );
        }

        self.notify("notifications/initialized", None).await?;

        self.connected.store(true, Ordering::Relaxed);
        debug!(
            url = %self.base_url,
            streamable = self.streamable_http,
            version = %self.protocol_version(),
            "HTTP transport initialized"
        );

        Ok(init)
    }

    /// Headers shared by every outgoing message
    fn message_headers(&self, accept: &'static str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
        headers.insert(
            HeaderName::from_static(VERSION_HEADER),
            HeaderValue::from_str(&self.protocol_version())
                .map_err(|e| Error::Transport(format!("Invalid protocol version header: {e}")))?,
        );

        if let Some(ref session_id) = *self.session_id.read() {
            headers.insert(
                HeaderName::from_static(SESSION_HEADER),
                HeaderValue::from_str(session_id)
                    .map_err(|e| Error::Transport(format!("Invalid session id header: {e}")))?,
            );
        }

        // Custom headers (auth etc.); unparsable entries are skipped
        for (key, value) in &self.headers {
            if let (Ok(k), Ok(v)) = (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                headers.insert(k, v);
            }
        }

        Ok(headers)
    }

    /// Open the legacy event stream and wait for the message endpoint.
    ///
    /// The stream is handed to a reader task that stays alive until
    /// [`Transport::close`], routing replies to waiting requests.
    async fn establish_sse_connection(&self) -> Result<String> {
        let headers = self.message_headers("text/event-stream")?;

        debug!(url = %self.base_url, "Establishing SSE connection");

        let response = tokio::time::timeout(
            self.timeout,
            self.client.get(&self.base_url).headers(headers).send(),
        )
        .await
        .map_err(|_| Error::Transport(format!("SSE connection timed out after {:?}", self.timeout)))?
        .map_err(|e| Error::Transport(format!("SSE connection failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("SSE endpoint returned: {status}")));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_event_stream(
            response,
            endpoint_tx,
            Arc::clone(&self.pending),
            self.base_url.clone(),
        ));
        if let Some(previous) = self.reader.lock().replace(reader) {
            previous.abort();
        }

        let endpoint = match tokio::time::timeout(self.timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                return Err(Error::Transport(
                    "SSE stream ended without endpoint event. Server may not support MCP SSE protocol."
                        .to_string(),
                ));
            }
            Err(_) => {
                return Err(Error::Transport(format!(
                    "No endpoint event within {:?}",
                    self.timeout
                )));
            }
        };

        debug!(endpoint = %endpoint, "Received message endpoint from SSE");
        self.capture_session_from_endpoint(&endpoint);
        Ok(endpoint)
    }

    /// Legacy servers put the session id in the endpoint's query string
    fn capture_session_from_endpoint(&self, endpoint: &str) {
        let parsed = Url::parse(endpoint).or_else(|_| Url::parse(&format!("http://localhost{endpoint}")));
        if let Ok(url) = parsed {
            for (key, value) in url.query_pairs() {
                if key == "session_id" || key == "sessionId" {
                    *self.session_id.write() = Some(value.to_string());
                    debug!(session_id = %value, "Extracted session ID");
                }
            }
        }
    }

    /// Resolve a potentially relative message URL against the SSE URL
    fn resolve_message_url(&self, endpoint: &str) -> Result<String> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }

        let base_url = Url::parse(&self.base_url)
            .map_err(|e| Error::Transport(format!("Invalid SSE URL: {e}")))?;

        let resolved = base_url
            .join(endpoint)
            .map_err(|e| Error::Transport(format!("Failed to resolve endpoint URL: {e}")))?;

        Ok(resolved.to_string())
    }

    /// Get the message URL, falling back to the base URL if not set
    fn get_message_url(&self) -> String {
        self.message_url
            .read()
            .clone()
            .unwrap_or_else(|| self.base_url.clone())
    }

    /// Send a raw request to the message endpoint
    async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let message_url = self.get_message_url();
        let headers = self.message_headers("application/json, text/event-stream")?;

        if !self.streamable_http && !self.stream_open() {
            return Err(Error::Transport("SSE stream is closed".to_string()));
        }
        // Registered before posting; the reply can beat the POST response
        let reply = (!self.streamable_http).then(|| PendingReply::register(&self.pending, &request.id));

        debug!(method = %request.method, url = %message_url, "Sending request");

        let response = self
            .client
            .post(&message_url)
            .timeout(self.timeout)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Request failed: {e}")))?;

        if self.session_id.read().is_none() {
            if let Some(id) = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                debug!(session_id = %id, url = %message_url, "Stored session ID from response");
                *self.session_id.write() = Some(id.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("HTTP {status}: {body}")));
        }

        if let Some(reply) = reply {
            return self.legacy_reply(response, reply, &request.id).await;
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let text = response
                .text()
                .await
                .map_err(|e| Error::Transport(format!("Failed to read SSE response: {e}")))?;
            parse_sse_response(&text, &request.id)
        } else {
            response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("Failed to parse response: {e}")))
        }
    }

    /// Legacy SSE: whether the event stream reader is still running
    fn stream_open(&self) -> bool {
        self.reader.lock().as_ref().is_some_and(|reader| !reader.is_finished())
    }

    /// Legacy SSE: take an inline reply if the server sent one, otherwise
    /// wait for it on the event stream
    async fn legacy_reply(
        &self,
        response: Response,
        reply: PendingReply,
        id: &RequestId,
    ) -> Result<JsonRpcResponse> {
        if response.status() != StatusCode::ACCEPTED {
            let body = response
                .text()
                .await
                .map_err(|e| Error::Transport(format!("Failed to read response: {e}")))?;
            if let Ok(inline) = serde_json::from_str::<JsonRpcResponse>(&body) {
                if inline.id.as_ref() == Some(id) {
                    return Ok(inline);
                }
            }
        }
        reply.wait(self.timeout).await
    }

    /// Get next request ID
    fn next_id(&self) -> RequestId {
        RequestId::Number(i64::try_from(self.request_id.fetch_add(1, Ordering::Relaxed)).unwrap_or(i64::MAX))
    }
}

/// Pick the response for `id` out of an SSE body.
///
/// Servers may interleave notifications (progress, logging) before the
/// actual response, so every `data:` line is checked.
fn parse_sse_response(body: &str, id: &RequestId) -> Result<JsonRpcResponse> {
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let Ok(response) = serde_json::from_str::<JsonRpcResponse>(data.trim()) else {
            continue;
        };
        if response.id.as_ref() == Some(id) {
            return Ok(response);
        }
    }
    Err(Error::Transport(format!("No response for request {id} in SSE stream")))
}

/// A reply slot on the legacy event stream, removed again when dropped
struct PendingReply {
    pending: Pending,
    id: RequestId,
    rx: oneshot::Receiver<JsonRpcResponse>,
}

impl PendingReply {
    fn register(pending: &Pending, id: &RequestId) -> Self {
        let (tx, rx) = oneshot::channel();
        pending.lock().insert(id.clone(), tx);
        Self {
            pending: Arc::clone(pending),
            id: id.clone(),
            rx,
        }
    }

    async fn wait(mut self, timeout: Duration) -> Result<JsonRpcResponse> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Transport(format!(
                "SSE stream closed before the response to request {}",
                self.id
            ))),
            Err(_) => Err(Error::Transport(format!(
                "No response to request {} within {timeout:?}",
                self.id
            ))),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Reader task for the legacy event stream.
///
/// Delivers the first `endpoint` event, then hands every JSON-RPC response
/// to the request waiting for its id. When the stream ends, waiting
/// requests are failed by dropping their senders.
async fn read_event_stream(
    response: Response,
    endpoint_tx: oneshot::Sender<String>,
    pending: Pending,
    url: String,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut stream = response.bytes_stream();
    let mut parser = SseParser::default();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(url = %url, error = %e, "SSE stream read failed");
                break;
            }
        };

        for event in parser.feed(&chunk) {
            match event.event.as_deref() {
                Some("endpoint") => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data);
                    }
                }
                None | Some("message") => route_reply(&pending, &event.data),
                Some(other) => debug!(event = other, "Ignoring SSE event"),
            }
        }
    }

    debug!(url = %url, "SSE stream closed");
    pending.lock().clear();
}

fn route_reply(pending: &Pending, data: &str) {
    let Ok(message) = serde_json::from_str::<Value>(data) else {
        debug!(data = %data, "Ignoring non-JSON SSE message");
        return;
    };
    // Server-initiated requests and notifications carry a method
    if message.get("method").is_some() {
        return;
    }
    let Ok(response) = serde_json::from_value::<JsonRpcResponse>(message) else {
        return;
    };
    let Some(id) = response.id.clone() else {
        return;
    };

    let waiter = pending.lock().remove(&id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => debug!(id = %id, "No pending request for SSE response"),
    }
}

/// One dispatched server-sent event
#[derive(Debug, PartialEq, Eq)]
struct SseEvent {
    event: Option<String>,
    data: String,
}

/// Incremental `text/event-stream` parser
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed raw bytes, returning every event completed by them
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        event: self.event.take(),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
                self.event = None;
            } else if let Some(value) = line.strip_prefix("event:") {
                self.event = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }

        events
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(Error::Transport(format!("Transport to {} is closed", self.base_url)));
        }
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        self.send_request(&request).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let message_url = self.get_message_url();
        let notification = JsonRpcNotification::new(method, params);
        let headers = self.message_headers("application/json, text/event-stream")?;

        let response = self
            .client
            .post(&message_url)
            .timeout(self.timeout)
            .headers(headers)
            .json(&notification)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Notification failed: {e}")))?;

        if !response.status().is_success() {
            warn!(
                status = %response.status(),
                url = %message_url,
                "Notification failed"
            );
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);

        // Legacy sessions end with their event stream
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
        self.pending.lock().clear();

        let session_id = self.session_id.write().take();
        if !self.streamable_http {
            return Ok(());
        }

        // Terminate the server-side session if one was assigned
        if let Some(id) = session_id {
            let message_url = self.get_message_url();
            if let Err(e) = self
                .client
                .delete(&message_url)
                .timeout(self.timeout)
                .header(SESSION_HEADER, id)
                .send()
                .await
            {
                debug!(url = %message_url, error = %e, "Session termination failed");
            }
        }

        Ok(())
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sse_response_skips_notifications() {
        let body = concat!(
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{}}\n",
            "\n",
            "event: message\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":4,\"result\":{\"tools\":[]}}\n",
            "\n"
        );
        let response = parse_sse_response(body, &RequestId::Number(4)).unwrap();
        assert_eq!(response.result, Some(json!({"tools": []})));
    }

    #[test]
    fn sse_response_without_match_is_error() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n";
        assert!(parse_sse_response(body, &RequestId::Number(2)).is_err());
    }

    #[test]
    fn sse_parser_handles_split_chunks_and_crlf() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"event: endpoint\r\ndata: /messages/?sess").is_empty());

        let events = parser.feed(b"ion_id=abc\r\n\r\n: keep-alive\n\ndata: {\"a\":\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("endpoint".to_string()),
                data: "/messages/?session_id=abc".to_string(),
            }]
        );

        let events = parser.feed(b"data: 1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: None,
                data: "{\"a\":\n1}".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn replies_are_routed_by_id() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let first = PendingReply::register(&pending, &RequestId::Number(1));
        let second = PendingReply::register(&pending, &RequestId::Number(2));

        route_reply(&pending, r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#);
        route_reply(&pending, r#"{"jsonrpc":"2.0","id":2,"result":{"n":2}}"#);
        route_reply(&pending, r#"{"jsonrpc":"2.0","id":1,"result":{"n":1}}"#);

        let timeout = Duration::from_secs(1);
        assert_eq!(second.wait(timeout).await.unwrap().result, Some(json!({"n": 2})));
        assert_eq!(first.wait(timeout).await.unwrap().result, Some(json!({"n": 1})));
        assert!(pending.lock().is_empty());
    }

    #[tokio::test]
    async fn closed_stream_fails_waiting_request() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reply = PendingReply::register(&pending, &RequestId::Number(7));
        pending.lock().clear();

        let err = reply.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("SSE stream closed"));
    }

    #[test]
    fn resolves_relative_message_url() {
        let transport =
            HttpTransport::new("http://localhost:8000/sse", HashMap::new(), Duration::from_secs(5), false)
                .unwrap();
        assert_eq!(
            transport.resolve_message_url("/messages/?session_id=abc").unwrap(),
            "http://localhost:8000/messages/?session_id=abc"
        );
        assert_eq!(
            transport.resolve_message_url("https://other/msg").unwrap(),
            "https://other/msg"
        );
    }

    #[test]
    fn captures_session_from_endpoint_query() {
        let transport =
            HttpTransport::new("http://localhost:8000/sse", HashMap::new(), Duration::from_secs(5), false)
                .unwrap();
        transport.capture_session_from_endpoint("/messages/?session_id=s-123");
        assert_eq!(transport.session_id.read().as_deref(), Some("s-123"));
    }

    #[test]
    fn new_transport_is_not_connected() {
        let transport =
            HttpTransport::new("http://localhost:8000/mcp", HashMap::new(), Duration::from_secs(5), true)
                .unwrap();
        assert!(!transport.is_connected());
        assert_eq!(transport.protocol_version(), PROTOCOL_VERSION);
        assert_eq!(transport.base_url(), "http://localhost:8000/mcp");
    }

    #[test]
    fn ids_increase() {
        let transport =
            HttpTransport::new("http://localhost:8000/mcp", HashMap::new(), Duration::from_secs(5), true)
                .unwrap();
        assert_eq!(transport.next_id(), RequestId::Number(1));
        assert_eq!(transport.next_id(), RequestId::Number(2));
    }
}
