use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod utils;

use commands::{config, health, serve, synth, token, validate};

/// Stack CLI - synthesize, check and serve the serverless backend stack
#[derive(Parser)]
#[command(name = "stackc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Stack configuration file (YAML)
    #[arg(short, long, global = true, env = "STACK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the finalized resource graph
    Synth {
        /// Output format (json, yaml, text)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Check the configuration and the authorization properties of the graph
    Validate {
        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the resolved configuration
    Config {
        /// Output format (json, yaml, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run the gateway with an in-memory directory and table store
    Serve {
        /// Port to listen on; overrides the configuration
        #[arg(short, long)]
        port: Option<u16>,

        #[command(flatten)]
        demo: token::DemoUser,
    },

    /// Sign the demo user in and print its tokens
    Token {
        /// Scopes to request through the hosted flow; none signs in directly
        #[arg(short, long = "scope")]
        scopes: Vec<String>,

        /// Output format (json, text)
        #[arg(short, long, default_value = "json")]
        format: String,

        #[command(flatten)]
        demo: token::DemoUser,
    },

    /// Query a running gateway's health route
    Health {
        /// Gateway base URL
        #[arg(long, default_value = "http://localhost:3030")]
        url: String,

        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    // Execute the command
    match cli.command {
        Commands::Synth { format } => {
            synth::execute(config_path, &format)?;
        }
        Commands::Validate { format } => {
            validate::execute(config_path, &format)?;
        }
        Commands::Config { format } => {
            config::show(config_path, &format)?;
        }
        Commands::Serve { port, demo } => {
            serve::execute(config_path, port, demo).await?;
        }
        Commands::Token {
            scopes,
            format,
            demo,
        } => {
            token::execute(config_path, &scopes, demo, &format).await?;
        }
        Commands::Health { url, format } => {
            health::execute(&url, &format).await?;
        }
    }

    Ok(())
}
