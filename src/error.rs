//! Error types for the MCP interpreter

use std::io;

use thiserror::Error;

/// Result type alias for the MCP interpreter
pub type Result<T> = std::result::Result<T, Error>;

/// MCP interpreter errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing API key, no backends, bad config file)
    #[error("{0}")]
    Config(String),

    /// The inbound request carried no usable `message`
    #[error("Missing 'message' field")]
    MissingMessage,

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error returned by a backend
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
    },

    /// Generative model call failed or returned an unusable reply
    #[error("Model error: {0}")]
    Model(String),

    /// The resolved tool failed while executing on its owning backend
    #[error("Error calling tool '{tool}' on {backend}: {message}")]
    ToolExecution {
        /// Tool name
        tool: String,
        /// Owning backend address
        backend: String,
        /// Underlying cause
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
        }
    }

    /// Whether this error was caused by the caller rather than the service
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MissingMessage)
    }
}
