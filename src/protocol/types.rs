//! MCP protocol type definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition as advertised by a backend's `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (unique within one backend)
    pub name: String,
    /// Human-readable title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input JSON Schema
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

impl Tool {
    /// Create a tool with a description and input schema
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: Some(description.into()),
            input_schema,
        }
    }

    /// Parameters declared under the input schema's `properties`, in
    /// declaration order
    #[must_use]
    pub fn parameters(&self) -> Vec<ParameterSpec> {
        let Some(properties) = self.input_schema.get("properties").and_then(Value::as_object) else {
            return Vec::new();
        };

        properties
            .iter()
            .map(|(name, schema)| ParameterSpec {
                name: name.clone(),
                param_type: declared_type(schema).unwrap_or_else(|| "string".to_string()),
                description: schema
                    .get("description")
                    .and_then(Value::as_str)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
            })
            .collect()
    }
}

/// One declared tool parameter, flattened for prompt rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    /// Parameter name
    pub name: String,
    /// JSON Schema type (`string` when undeclared)
    pub param_type: String,
    /// Optional description
    pub description: Option<String>,
}

/// Resolve the JSON Schema type of a property.
///
/// Handles plain `type`, type arrays (`["string", "null"]`) and the
/// `anyOf` shape servers emit for optional parameters. `null` members are
/// ignored; several remaining types are joined with `|`.
#[must_use]
pub fn declared_type(schema: &Value) -> Option<String> {
    let mut types: Vec<&str> = match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => schema
            .get("anyOf")
            .and_then(Value::as_array)
            .map(|variants| {
                variants
                    .iter()
                    .filter_map(|v| v.get("type").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default(),
    };
    types.retain(|t| *t != "null");

    if types.is_empty() {
        None
    } else {
        Some(types.join("|"))
    }
}

/// Content item in a tool call response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    /// Text content
    #[serde(rename = "text")]
    Text {
        /// Text value
        text: String,
    },
    /// Image content
    #[serde(rename = "image")]
    Image {
        /// Base64-encoded data
        data: String,
        /// MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Audio content
    #[serde(rename = "audio")]
    Audio {
        /// Base64-encoded audio data
        data: String,
        /// MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Resource link
    #[serde(rename = "resource_link")]
    ResourceLink {
        /// Resource URI
        uri: String,
        /// Resource name
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Embedded resource
    #[serde(rename = "resource")]
    Resource {
        /// Resource contents
        resource: ResourceContents,
    },
}

/// Resource contents (text or blob)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContents {
    /// Text resource
    Text {
        /// Resource URI
        uri: String,
        /// MIME type
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Text content
        text: String,
    },
    /// Binary resource
    Blob {
        /// Resource URI
        uri: String,
        /// MIME type
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Base64-encoded blob data
        blob: String,
    },
}

/// Client/Server info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    /// Name
    pub name: String,
    /// Version
    pub version: String,
}
