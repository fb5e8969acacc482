//! Google Gemini client (Generative Language REST API)

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{GenerateRequest, ModelClient};
use crate::config::ModelConfig;
use crate::{Error, Result};

/// Gemini API client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    /// Create a client for `config` with an already-resolved API key
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Model(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    /// Build the `generateContent` request body
    fn build_body(request: &GenerateRequest) -> Value {
        json!({
            "systemInstruction": {
                "parts": [{"text": request.system_instruction}]
            },
            "contents": [{
                "role": "user",
                "parts": [{"text": request.contents}]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseJsonSchema": request.response_schema
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

/// Concatenate the text parts of the first candidate
fn extract_text(response: GenerateResponse) -> Result<String> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .map_or_else(|| "no candidates".to_string(), |f| format!("no candidates ({f})"));
        return Err(Error::Model(reason));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(Error::Model(format!(
            "empty reply (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(text)
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let body = Self::build_body(&request);

        debug!(model = %self.model, "Calling generateContent");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Model(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!("API error {status}: {text}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Model(format!("Failed to parse response: {e}")))?;

        extract_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn body_requests_schema_constrained_json() {
        let request = GenerateRequest {
            system_instruction: "pick a tool".to_string(),
            contents: "Add 200 for rent".to_string(),
            response_schema: json!({"type": "object"}),
        };
        let body = GeminiClient::build_body(&request);

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "pick a tool");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Add 200 for rent");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseJsonSchema"], json!({"type": "object"}));
    }

    #[test]
    fn endpoint_uses_model_name() {
        let config = ModelConfig {
            base_url: "https://example.test/v1beta/".to_string(),
            ..ModelConfig::default()
        };
        let client = GeminiClient::new(&config, "key").unwrap();
        assert_eq!(
            client.endpoint(),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(client.model(), "gemini-2.5-flash");
    }

    #[test]
    fn extract_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"tool\":"}, {"text": "\"None\",\"params\":{}}"}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "{\"tool\":\"None\",\"params\":{}}");
    }

    #[test]
    fn extract_text_without_candidates_is_error() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        let err = extract_text(response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn extract_text_empty_reply_is_error() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]
        }))
        .unwrap();
        let err = extract_text(response).unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }
}
