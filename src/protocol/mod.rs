//! MCP protocol types (the subset a tool-calling client needs)

mod messages;
mod types;

pub use messages::*;
pub use types::*;

/// MCP protocol version requested during `initialize`
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Versions this client can speak, newest first
pub const SUPPORTED_VERSIONS: &[&str] = &[PROTOCOL_VERSION, "2025-03-26", "2024-11-05"];

/// Check whether a server-negotiated version is one we can speak
#[must_use]
pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}
