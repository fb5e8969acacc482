//! In-memory fakes shared by unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::backend::{BackendConnector, BackendSession, ToolBackend};
use crate::config::BackendConfig;
use crate::llm::{GenerateRequest, ModelClient};
use crate::protocol::Tool;
use crate::{Error, Result};

/// Backend with a fixed tool list that echoes calls
pub struct StaticBackend {
    address: String,
    tools: Vec<Tool>,
    fail_listing: bool,
    fail_calls: bool,
    pub list_calls: AtomicUsize,
    pub calls: Mutex<Vec<(String, Value)>>,
    pub closed: AtomicBool,
}

impl StaticBackend {
    fn build(address: &str, tools: Vec<Tool>, fail_listing: bool, fail_calls: bool) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            tools,
            fail_listing,
            fail_calls,
            list_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Tools named `names`, each taking no parameters
    pub fn new(address: &str, names: &[&str]) -> Arc<Self> {
        Self::build(address, bare_tools(names), false, false)
    }

    pub fn with_tools(address: &str, tools: Vec<Tool>) -> Arc<Self> {
        Self::build(address, tools, false, false)
    }

    /// Every listing fails
    pub fn failing(address: &str) -> Arc<Self> {
        Self::build(address, Vec::new(), true, false)
    }

    /// Lists `names` but every invocation fails
    pub fn broken_calls(address: &str, names: &[&str]) -> Arc<Self> {
        Self::build(address, bare_tools(names), false, true)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

fn bare_tools(names: &[&str]) -> Vec<Tool> {
    names
        .iter()
        .map(|n| Tool::new(*n, format!("{n} tool"), json!({"type": "object", "properties": {}})))
        .collect()
}

#[async_trait]
impl ToolBackend for StaticBackend {
    fn name(&self) -> &str {
        &self.address
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing {
            return Err(Error::Transport("connection reset".to_string()));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value> {
        self.calls.lock().push((tool.to_string(), arguments));
        if self.fail_calls {
            return Err(Error::Protocol("database is locked".to_string()));
        }
        Ok(json!({"from": self.address, "tool": tool}))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Session over the given fakes, in order
pub fn session(backends: Vec<Arc<StaticBackend>>) -> BackendSession {
    BackendSession::from_backends(
        backends
            .into_iter()
            .map(|b| b as Arc<dyn ToolBackend>)
            .collect(),
    )
}

/// Connector handing out prepared backends by URL
pub struct StaticConnector {
    backends: Vec<Arc<StaticBackend>>,
}

impl StaticConnector {
    pub fn new(backends: Vec<Arc<StaticBackend>>) -> Arc<Self> {
        Arc::new(Self { backends })
    }
}

#[async_trait]
impl BackendConnector for StaticConnector {
    async fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn ToolBackend>> {
        self.backends
            .iter()
            .find(|b| b.address() == config.url)
            .map(|b| Arc::clone(b) as Arc<dyn ToolBackend>)
            .ok_or_else(|| Error::Transport(format!("connection refused: {}", config.url)))
    }
}

/// Model that returns a canned reply and records requests
pub struct ScriptedModel {
    reply: Result<String>,
    pub requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedModel {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn decision(tool: &str, params: Value) -> Arc<Self> {
        Self::replying(&json!({"tool": tool, "params": params}).to_string())
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(Error::Model(message.to_string())),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        self.requests.lock().push(request);
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(e) => Err(Error::Model(e.to_string())),
        }
    }
}
