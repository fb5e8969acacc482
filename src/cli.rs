//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{BackendConfig, Config};

/// Natural-language front door for MCP tool servers
#[derive(Parser, Debug)]
#[command(name = "mcp-interpreter")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_INTERPRETER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_INTERPRETER_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MCP_INTERPRETER_HOST")]
    pub host: Option<String>,

    /// Model API key (overrides GOOGLE_API_KEY)
    #[arg(long, global = true)]
    pub api_key: Option<String>,

    /// MCP endpoint URL, repeatable; appended after configured backends
    #[arg(short, long = "backend", global = true)]
    pub backends: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MCP_INTERPRETER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_INTERPRETER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,

    /// Print the aggregated tool catalog of all backends
    Tools {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Interpret one message and print the response envelope
    Ask {
        /// The message to interpret
        #[arg(required = true)]
        message: String,
    },
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref host) = self.host {
            config.server.host.clone_from(host);
        }
        if let Some(ref key) = self.api_key {
            config.model.api_key = Some(key.clone());
        }
        for url in &self.backends {
            if !config.backends.iter().any(|b| &b.url == url) {
                config.backends.push(BackendConfig::from_url(url.clone()));
            }
        }
    }
}
