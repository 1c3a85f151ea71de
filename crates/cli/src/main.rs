//! agentflux CLI: the main entry point.
//!
//! Commands:
//! - `serve`   start the HTTP/SSE gateway
//! - `chat`    send a prompt to a gateway and stream the answer
//! - `config`  print the effective configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "agentflux",
    about = "agentflux: streaming agent runtime",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with an agent served by a gateway
    Chat {
        /// The prompt to send
        #[arg(short, long)]
        message: String,

        /// Approve every tool call without asking
        #[arg(short, long)]
        yes: bool,

        /// Gateway base URL (defaults to `[client] endpoint`)
        #[arg(short, long, env = "AGENTFLUX_ENDPOINT")]
        endpoint: Option<String>,

        /// City reported by the local `getLocation` tool
        #[arg(long)]
        location: Option<String>,
    },

    /// Print the effective configuration
    Config {
        /// Print the built-in defaults instead
        #[arg(long)]
        defaults: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat {
            message,
            yes,
            endpoint,
            location,
        } => commands::chat::run(message, yes, endpoint, location).await?,
        Commands::Config { defaults } => commands::config_cmd::show(defaults)?,
    }

    Ok(())
}
