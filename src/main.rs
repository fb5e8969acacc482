//! MCP Interpreter - natural-language front door for MCP tool servers

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_interpreter::{
    cli::{Cli, Command},
    config::Config,
    decision::render_catalog,
    gateway::Gateway,
    interpreter::Interpreter,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            cli.apply_overrides(&mut config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Tools { ref format }) => run_tools(config, format).await,
        Some(Command::Ask { ref message }) => run_ask(config, message).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Print the merged tool catalog
async fn run_tools(config: Config, format: &str) -> ExitCode {
    let interpreter = match Interpreter::from_config(config) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let listing = match interpreter.list_catalog().await {
        Ok(listing) => listing,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    if format == "json" {
        let tools: Vec<_> = listing
            .iter()
            .map(|(backend, tool)| serde_json::json!({"backend": backend, "tool": tool}))
            .collect();
        match serde_json::to_string_pretty(&tools) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("❌ Failed to serialize to JSON: {e}");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    if listing.is_empty() {
        println!("No tools found (are the backends reachable?)");
        return ExitCode::SUCCESS;
    }

    println!("Found {} tool(s):\n", listing.len());
    let mut current = None;
    for (backend, tool) in &listing {
        if current != Some(backend) {
            println!("📦 {backend}");
            current = Some(backend);
        }
        println!("{}", render_catalog([tool]));
    }
    ExitCode::SUCCESS
}

/// Interpret one message and print the envelope
async fn run_ask(config: Config, message: &str) -> ExitCode {
    let interpreter = match Interpreter::from_config(config) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    match interpreter.interpret(message).await {
        Ok(envelope) => match serde_json::to_string_pretty(&envelope) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Failed to serialize to JSON: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        backends = config.enabled_backends().count(),
        model = %config.model.model,
        "Starting MCP Interpreter"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create interpreter: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
