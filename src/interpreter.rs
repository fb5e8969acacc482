//! Request pipeline: message → catalog → decision → dispatch

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::backend::{BackendConnector, BackendSession, McpConnector};
use crate::catalog::Catalog;
use crate::config::{API_KEY_ENV, Config};
use crate::decision::DecisionEngine;
use crate::dispatch::{Dispatcher, ResponseEnvelope};
use crate::llm::{GeminiClient, ModelClient};
use crate::protocol::Tool;
use crate::{Error, Result};

/// Answers free-text messages by running the tool the model selects
pub struct Interpreter {
    config: Config,
    connector: Arc<dyn BackendConnector>,
    engine: Option<DecisionEngine>,
    dispatcher: Dispatcher,
}

impl Interpreter {
    /// Build an interpreter with real MCP connections and Gemini.
    ///
    /// A missing API key is not an error here; requests report it instead.
    pub fn from_config(config: Config) -> Result<Self> {
        let model = match config.model.resolve_api_key() {
            Some(key) => Some(Arc::new(GeminiClient::new(&config.model, key)?) as Arc<dyn ModelClient>),
            None => None,
        };
        Ok(Self::new(config, Arc::new(McpConnector), model))
    }

    /// Build an interpreter from explicit parts
    pub fn new(config: Config, connector: Arc<dyn BackendConnector>, model: Option<Arc<dyn ModelClient>>) -> Self {
        let dispatcher = Dispatcher::new(config.dispatch);
        Self {
            config,
            connector,
            engine: model.map(DecisionEngine::new),
            dispatcher,
        }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether a model API key was available
    #[must_use]
    pub fn model_configured(&self) -> bool {
        self.engine.is_some()
    }

    /// Number of enabled backends
    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.config.enabled_backends().count()
    }

    /// Interpret `message` using today's local date
    pub async fn interpret(&self, message: &str) -> Result<ResponseEnvelope> {
        self.interpret_on(message, Local::now().date_naive()).await
    }

    /// Interpret `message` as if today were `today`
    pub async fn interpret_on(&self, message: &str, today: NaiveDate) -> Result<ResponseEnvelope> {
        let span = info_span!("interpret", request_id = %Uuid::new_v4());
        self.handle(message, today).instrument(span).await
    }

    async fn handle(&self, message: &str, today: NaiveDate) -> Result<ResponseEnvelope> {
        if message.trim().is_empty() {
            return Err(Error::MissingMessage);
        }
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| Error::Config(format!("{API_KEY_ENV} not set")))?;
        if self.backend_count() == 0 {
            return Err(Error::Config("No MCP endpoints configured".to_string()));
        }

        let session = BackendSession::open(self.connector.as_ref(), self.config.enabled_backends()).await;
        let outcome = Self::run(engine, &self.dispatcher, message, &session, today).await;
        session.close().await;

        if let Ok(envelope) = &outcome {
            info!(tool = ?envelope.tool, executed_from = ?envelope.executed_from, "Interpretation complete");
        }
        outcome
    }

    async fn run(
        engine: &DecisionEngine,
        dispatcher: &Dispatcher,
        message: &str,
        session: &BackendSession,
        today: NaiveDate,
    ) -> Result<ResponseEnvelope> {
        let catalog = Catalog::aggregate(session).await;
        debug!(backends = session.len(), tools = catalog.len(), "Catalog aggregated");

        let decision = engine.decide(message, &catalog, today).await;
        dispatcher.dispatch(decision, session, &catalog).await
    }

    /// Aggregated catalog of every enabled backend
    pub async fn list_catalog(&self) -> Result<Vec<(String, Tool)>> {
        if self.backend_count() == 0 {
            return Err(Error::Config("No MCP endpoints configured".to_string()));
        }

        let session = BackendSession::open(self.connector.as_ref(), self.config.enabled_backends()).await;
        let catalog = Catalog::aggregate(&session).await;
        let listing = catalog
            .entries()
            .iter()
            .map(|e| {
                let address = session.backends()[e.backend].address().to_string();
                (address, e.tool.clone())
            })
            .collect();
        session.close().await;
        Ok(listing)
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("backends", &self.backend_count())
            .field("engine", &self.engine)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
