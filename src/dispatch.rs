//! Dispatcher: routes a decision to the backend that owns the tool

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::backend::{BackendSession, ToolBackend};
use crate::catalog::Catalog;
use crate::config::DispatchConfig;
use crate::decision::Decision;
use crate::validation::validate;
use crate::{Error, Result};

/// Result text when the model picked no tool
pub const NO_MATCH_RESULT: &str = "No matching tool found.";

/// Result text when no backend advertises the chosen tool
pub const NOT_FOUND_RESULT: &str = "Tool not found in any client.";

/// Uniform response of one interpretation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Chosen tool, `null` when none applied
    pub tool: Option<String>,
    /// Parameters used for the tool
    pub params: Map<String, Value>,
    /// Tool output or a status string
    pub result: Value,
    /// Address of the backend that ran the tool
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub executed_from: Option<String>,
}

impl ResponseEnvelope {
    /// Envelope for "no tool applies"
    #[must_use]
    pub fn no_match() -> Self {
        Self::status(None, Map::new(), NO_MATCH_RESULT)
    }

    fn status(tool: Option<String>, params: Map<String, Value>, result: impl Into<String>) -> Self {
        Self {
            tool,
            params,
            result: Value::String(result.into()),
            executed_from: None,
        }
    }
}

/// Routes decisions to backends
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    settings: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher with the given settings
    #[must_use]
    pub fn new(settings: DispatchConfig) -> Self {
        Self { settings }
    }

    /// Execute `decision` against the backends of `session`.
    ///
    /// Only a failing tool invocation is an error; every other outcome is
    /// reported inside the envelope.
    pub async fn dispatch(
        &self,
        decision: Decision,
        session: &BackendSession,
        catalog: &Catalog,
    ) -> Result<ResponseEnvelope> {
        let Decision::Invoke { tool, params } = decision else {
            return Ok(ResponseEnvelope::no_match());
        };

        let Some((owner, schema)) = self.find_owner(&tool, session, catalog).await else {
            info!(tool = %tool, "No backend exposes tool");
            return Ok(ResponseEnvelope::status(Some(tool), params, NOT_FOUND_RESULT));
        };

        let params = if self.settings.validate_params {
            let validation = validate(&params, &schema);
            if !validation.is_valid() {
                let details = validation.describe(&schema);
                warn!(tool = %tool, backend = %owner.address(), details = %details, "Rejected model parameters");
                let result = format!("Invalid parameters for tool '{tool}': {details}");
                return Ok(ResponseEnvelope::status(Some(tool), params, result));
            }
            validation.params
        } else {
            params
        };

        debug!(tool = %tool, backend = %owner.address(), "Invoking tool");
        let result = owner
            .call_tool(&tool, Value::Object(params.clone()))
            .await
            .map_err(|e| Error::ToolExecution {
                tool: tool.clone(),
                backend: owner.address().to_string(),
                message: e.to_string(),
            })?;

        info!(tool = %tool, backend = %owner.address(), "Tool executed");
        Ok(ResponseEnvelope {
            executed_from: Some(owner.address().to_string()),
            tool: Some(tool),
            params,
            result,
        })
    }

    /// First backend, in configuration order, advertising `tool`, with the
    /// tool's input schema
    async fn find_owner<'s>(
        &self,
        tool: &str,
        session: &'s BackendSession,
        catalog: &Catalog,
    ) -> Option<(&'s dyn ToolBackend, Value)> {
        if self.settings.reuse_catalog {
            let entry = catalog.owner_of(tool)?;
            let backend = session.backends().get(entry.backend)?;
            return Some((backend.as_ref(), entry.tool.input_schema.clone()));
        }

        for backend in session.backends() {
            match backend.list_tools().await {
                Ok(tools) => {
                    if let Some(found) = tools.into_iter().find(|t| t.name == tool) {
                        return Some((backend.as_ref(), found.input_schema));
                    }
                }
                Err(e) => {
                    warn!(backend = %backend.name(), error = %e, "Failed to list tools during dispatch, skipping");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Tool;
    use crate::testing::{StaticBackend, session};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn invoke(tool: &str, params: Value) -> Decision {
        let Value::Object(params) = params else {
            panic!("params must be an object");
        };
        Decision::Invoke {
            tool: tool.to_string(),
            params,
        }
    }

    fn permissive() -> Dispatcher {
        Dispatcher::new(DispatchConfig {
            validate_params: false,
            reuse_catalog: false,
        })
    }

    #[tokio::test]
    async fn no_match_queries_nothing() {
        let backend = StaticBackend::new("http://a/mcp", &["add_expense"]);
        let session = session(vec![backend.clone()]);

        let envelope = Dispatcher::default()
            .dispatch(Decision::NoMatch, &session, &Catalog::default())
            .await
            .unwrap();

        assert_eq!(envelope, ResponseEnvelope::no_match());
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"tool": null, "params": {}, "result": "No matching tool found."})
        );
        assert_eq!(backend.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(backend.call_count(), 0);
        session.close().await;
    }

    #[tokio::test]
    async fn first_owner_in_configuration_order_wins() {
        let first = StaticBackend::new("http://first/mcp", &["shared"]);
        let second = StaticBackend::new("http://second/mcp", &["shared"]);
        let session = session(vec![first.clone(), second.clone()]);

        let envelope = permissive()
            .dispatch(invoke("shared", json!({"x": 1})), &session, &Catalog::default())
            .await
            .unwrap();

        assert_eq!(envelope.executed_from.as_deref(), Some("http://first/mcp"));
        assert_eq!(envelope.result, json!({"from": "http://first/mcp", "tool": "shared"}));
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 0);
        session.close().await;
    }

    #[tokio::test]
    async fn listing_failure_skips_backend() {
        let broken = StaticBackend::failing("http://broken/mcp");
        let good = StaticBackend::new("http://foodcard/mcp", &["add_card_action"]);
        let session = session(vec![broken, good.clone()]);

        let envelope = permissive()
            .dispatch(invoke("add_card_action", json!({})), &session, &Catalog::default())
            .await
            .unwrap();

        assert_eq!(envelope.executed_from.as_deref(), Some("http://foodcard/mcp"));
        assert_eq!(good.call_count(), 1);
        session.close().await;
    }

    #[tokio::test]
    async fn unknown_tool_reports_not_found() {
        let backend = StaticBackend::new("http://a/mcp", &["add_expense"]);
        let session = session(vec![backend.clone()]);

        let envelope = permissive()
            .dispatch(invoke("ghost_tool", json!({"a": 1})), &session, &Catalog::default())
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"tool": "ghost_tool", "params": {"a": 1}, "result": "Tool not found in any client."})
        );
        assert_eq!(backend.call_count(), 0);
        session.close().await;
    }

    #[tokio::test]
    async fn invocation_failure_is_an_error() {
        let backend = StaticBackend::broken_calls("http://a/mcp", &["add_expense"]);
        let session = session(vec![backend]);

        let err = permissive()
            .dispatch(invoke("add_expense", json!({})), &session, &Catalog::default())
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Error calling tool 'add_expense' on http://a/mcp: Protocol error: database is locked"
        );
        session.close().await;
    }

    #[tokio::test]
    async fn params_are_passed_through_when_validation_is_off() {
        let backend = StaticBackend::new("http://a/mcp", &["add_expense"]);
        let session = session(vec![backend.clone()]);

        permissive()
            .dispatch(invoke("add_expense", json!({"anything": "goes"})), &session, &Catalog::default())
            .await
            .unwrap();

        assert_eq!(backend.calls.lock()[0].1, json!({"anything": "goes"}));
        session.close().await;
    }

    #[tokio::test]
    async fn invalid_params_are_reported_without_invocation() {
        let tool = Tool::new(
            "add_expense",
            "Record an expense",
            json!({
                "type": "object",
                "properties": {"amount": {"type": "number"}, "category": {"type": "string"}},
                "required": ["amount", "category"]
            }),
        );
        let backend = StaticBackend::with_tools("http://a/mcp", vec![tool]);
        let session = session(vec![backend.clone()]);

        let envelope = Dispatcher::default()
            .dispatch(invoke("add_expense", json!({"amount": 5})), &session, &Catalog::default())
            .await
            .unwrap();

        let result = envelope.result.as_str().unwrap();
        assert!(result.starts_with("Invalid parameters for tool 'add_expense': parameter 'category'"));
        assert!(envelope.executed_from.is_none());
        assert_eq!(backend.call_count(), 0);
        session.close().await;
    }

    #[tokio::test]
    async fn coerced_params_reach_backend() {
        let tool = Tool::new(
            "add_expense",
            "Record an expense",
            json!({"type": "object", "properties": {"amount": {"type": "integer"}}}),
        );
        let backend = StaticBackend::with_tools("http://a/mcp", vec![tool]);
        let session = session(vec![backend.clone()]);

        let envelope = Dispatcher::default()
            .dispatch(invoke("add_expense", json!({"amount": "200"})), &session, &Catalog::default())
            .await
            .unwrap();

        assert_eq!(backend.calls.lock()[0].1, json!({"amount": 200}));
        assert_eq!(envelope.params["amount"], json!(200));
        session.close().await;
    }

    #[tokio::test]
    async fn reuse_catalog_skips_relisting() {
        let first = StaticBackend::new("http://first/mcp", &["add_expense"]);
        let second = StaticBackend::new("http://second/mcp", &["add_card_action"]);
        let session = session(vec![first.clone(), second.clone()]);
        let catalog = Catalog::aggregate(&session).await;

        let dispatcher = Dispatcher::new(DispatchConfig {
            validate_params: true,
            reuse_catalog: true,
        });
        let envelope = dispatcher
            .dispatch(invoke("add_card_action", json!({})), &session, &catalog)
            .await
            .unwrap();

        assert_eq!(envelope.executed_from.as_deref(), Some("http://second/mcp"));
        assert_eq!(first.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.list_calls.load(Ordering::SeqCst), 1);
        session.close().await;
    }
}
