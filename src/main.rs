//! CLI for topicrelay
//!
//! Subcommands:
//! - `serve` (default): run the relay
//! - `token`: mint a development access token signed with the configured secret

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info};

use topicrelay::config::{DEFAULT_CONFIG_PATH, Settings, load_config_from};
use topicrelay::persistence::SledStore;
use topicrelay::server::{self, JwtKeys};
use topicrelay::utils::error::RelayError;
use topicrelay::utils::logging;

#[derive(Parser)]
#[command(name = "topicrelay", version, about = "Real-time topic relay over WebSockets")]
struct Cli {
    /// Configuration file, without extension
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the relay
    Serve,
    /// Print an access token for `sub`
    Token {
        #[arg(long)]
        sub: String,
        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match load_config_from(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log.level);

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(settings).await,
        Command::Token { sub, ttl } => print_token(&settings, &sub, ttl),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "topicrelay failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(settings: Settings) -> Result<(), RelayError> {
    let store = Arc::new(SledStore::open(&settings.storage.path)?);
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;

    server::serve(listener, &settings, Arc::clone(&store), shutdown_signal()).await?;

    store.flush()?;
    info!("store flushed, bye");
    Ok(())
}

fn print_token(settings: &Settings, sub: &str, ttl: u64) -> Result<(), RelayError> {
    let keys = JwtKeys::from_secret(&settings.server.jwt_secret);
    let token = keys.issue(sub, Duration::from_secs(ttl))?;
    println!("{token}");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received. Exiting gracefully."),
        Err(e) => {
            error!(error = %e, "unable to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
