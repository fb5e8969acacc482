//! MCP Interpreter Library
//!
//! Turns free-text requests into tool calls on Model Context Protocol (MCP)
//! servers: a generative model picks one tool from the merged catalog of all
//! configured servers, and the interpreter runs it on the server that owns it.
//!
//! # Pipeline
//!
//! 1. **Aggregate**: connect to every backend and merge their `tools/list`
//!    results in configuration order ([`catalog`]).
//! 2. **Decide**: render the catalog into a system instruction and ask the
//!    model for a schema-constrained `{tool, params}` reply ([`decision`]).
//! 3. **Dispatch**: find the first backend exposing the tool, validate the
//!    parameters and call it ([`dispatch`]).
//!
//! Every request gets fresh connections that are closed before the response
//! is returned.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod decision;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod interpreter;
pub mod llm;
pub mod protocol;
pub mod transport;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).try_init(),
        _ => subscriber.with(fmt::layer().with_writer(std::io::stderr)).try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
