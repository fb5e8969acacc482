//! Decision engine: asks the model which tool answers a message.
//!
//! The catalog is rendered into the system instruction, the reply is forced
//! into [`decision_schema`] and parsed into a [`Decision`]. Every failure on
//! the way (model unreachable, malformed JSON, wrong shape) degrades to
//! [`Decision::NoMatch`].

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::llm::{GenerateRequest, ModelClient};
use crate::protocol::Tool;

/// Sentinel the model uses for "no tool applies"
pub const NO_TOOL: &str = "None";

/// Which tool to run, if any
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Run `tool` with `params`
    Invoke {
        /// Tool name
        tool: String,
        /// Arguments chosen by the model
        params: Map<String, Value>,
    },
    /// No tool applies
    NoMatch,
}

impl Decision {
    /// Interpret a decoded reply.
    ///
    /// The reply must be an object with a `tool` (string or null) and a
    /// `params` object. `null`, `"None"` and an empty name mean no match.
    pub fn from_reply(reply: Value) -> Result<Self, String> {
        let Value::Object(mut reply) = reply else {
            return Err(format!("expected a JSON object, got {reply}"));
        };

        let params = match reply.remove("params") {
            Some(Value::Object(params)) => params,
            Some(other) => return Err(format!("'params' must be an object, got {other}")),
            None => return Err("missing 'params'".to_string()),
        };

        match reply.remove("tool") {
            Some(Value::String(tool)) if !tool.trim().is_empty() && tool != NO_TOOL => {
                Ok(Self::Invoke { tool, params })
            }
            Some(Value::String(_) | Value::Null) => Ok(Self::NoMatch),
            Some(other) => Err(format!("'tool' must be a string, got {other}")),
            None => Err("missing 'tool'".to_string()),
        }
    }

    /// Chosen tool name, `None` for no match
    #[must_use]
    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::Invoke { tool, .. } => Some(tool),
            Self::NoMatch => None,
        }
    }
}

/// JSON Schema the model's reply is constrained to
#[must_use]
pub fn decision_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tool": {"type": "string"},
            "params": {"type": "object", "minProperties": 0}
        },
        "required": ["tool", "params"]
    })
}

/// Render one block per tool: name, description and parameters
#[must_use]
pub fn render_catalog<'a>(tools: impl IntoIterator<Item = &'a Tool>) -> String {
    let blocks: Vec<String> = tools.into_iter().map(render_tool).collect();
    blocks.join("\n")
}

fn render_tool(tool: &Tool) -> String {
    let params = tool.parameters();
    let params_line = if params.is_empty() {
        "None".to_string()
    } else {
        params
            .iter()
            .map(|p| {
                let mut line = format!("'{}' ({})", p.name, p.param_type);
                if let Some(desc) = &p.description {
                    let _ = write!(line, " - {desc}");
                }
                line
            })
            .collect::<Vec<_>>()
            .join("; ")
    };

    format!(
        "- Name: {}\n  Description: {}\n  Parameters: {params_line}",
        tool.name,
        tool.description.as_deref().unwrap_or_default()
    )
}

/// System instruction anchoring the date and listing the tools
#[must_use]
pub fn system_instruction(today: NaiveDate, tools_context: &str) -> String {
    format!(
        "Assume today is {today}. \
         If the user refers to a month only (e.g., 'October expenses'), use the current year. \
         You are an AI financial assistant. \
         Respond ONLY with a JSON object matching the provided schema, no markdown or text. \
         If no tool fits, use 'None' and '{{}}'.\n\
         ---TOOLS---\n{tools_context}\n---END_TOOLS---",
        today = today.format("%Y-%m-%d")
    )
}

/// Turns a message and a catalog into a [`Decision`]
#[derive(Clone)]
pub struct DecisionEngine {
    model: Arc<dyn ModelClient>,
}

impl DecisionEngine {
    /// Create an engine backed by `model`
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    /// Ask the model for a decision; never fails
    pub async fn decide(&self, message: &str, catalog: &Catalog, today: NaiveDate) -> Decision {
        let request = GenerateRequest {
            system_instruction: system_instruction(today, &render_catalog(catalog.tools())),
            contents: message.to_string(),
            response_schema: decision_schema(),
        };

        let text = match self.model.generate(request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(model = %self.model.model(), error = %e, "Model call failed, falling back to no match");
                return Decision::NoMatch;
            }
        };

        let decision = serde_json::from_str::<Value>(text.trim())
            .map_err(|e| format!("invalid JSON: {e}"))
            .and_then(Decision::from_reply);

        match decision {
            Ok(decision) => {
                debug!(tool = ?decision.tool(), "Model decided");
                decision
            }
            Err(reason) => {
                warn!(model = %self.model.model(), reason = %reason, "Unusable model reply, falling back to no match");
                Decision::NoMatch
            }
        }
    }
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("model", &self.model.model())
            .finish()
    }
}
