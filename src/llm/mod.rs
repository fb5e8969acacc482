//! Generative model clients

mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// One structured-output generation request
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// System instruction
    pub system_instruction: String,
    /// User content
    pub contents: String,
    /// JSON Schema the reply must conform to
    pub response_schema: Value,
}

/// A model that answers with JSON constrained to a schema.
///
/// Each call is independent; no conversation state is kept.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model name, for logs
    fn model(&self) -> &str;

    /// Generate a reply and return its raw text (expected to be JSON).
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, a non-success status, or a
    /// reply without text.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;
}
