//! Pestania CLI - drive the storefront cart from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Save a bearer token for later commands
//! pestania login --token "$TOKEN"
//!
//! # Work with the cart
//! pestania add 42 --quantity 2
//! pestania show
//! pestania update 42 3
//! pestania remove 42
//! pestania clear
//! pestania total
//!
//! # Forget the token
//! pestania logout
//! ```
//!
//! # Environment Variables
//!
//! - `PESTANIA_API_URL` - Base URL of the storefront API (or `--api-url`)
//! - `PESTANIA_TOKEN_FILE` - Where `login` stores the token (or `--token-file`)
//! - `PESTANIA_TOKEN` - Bearer token to use instead of the token file
//! - `PESTANIA_MESSAGE_TTL_SECS` - Lifetime of product success messages
//! - `SENTRY_DSN` / `SENTRY_ENVIRONMENT` - Error tracking
//! - `RUST_LOG` - Log filter (default `pestania_storefront=info,pestania_cli=info`)

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pestania_storefront::config::{DEFAULT_TOKEN_FILE, StorefrontConfig, parse_api_url};
use secrecy::SecretString;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::CliError;
use commands::cart::CartCommand;

#[derive(Parser)]
#[command(name = "pestania")]
#[command(author, version, about = "Pestania storefront cart")]
struct Cli {
    /// Base URL of the storefront API
    #[arg(long, env = "PESTANIA_API_URL", global = true)]
    api_url: Option<String>,

    /// File holding the bearer token
    #[arg(long, env = "PESTANIA_TOKEN_FILE", global = true)]
    token_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a bearer token for later commands
    Login {
        /// Bearer token issued by the storefront
        #[arg(long)]
        token: String,
    },
    /// Forget the saved bearer token
    Logout,
    #[command(flatten)]
    Cart(CartCommand),
}

impl Cli {
    fn token_file(&self) -> PathBuf {
        self.token_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE))
    }

    /// Build the cart configuration, with flags taking precedence over the environment.
    fn load_config(&self) -> Result<StorefrontConfig, CliError> {
        let raw = self.api_url.as_deref().ok_or(CliError::MissingApiUrl)?;
        let api_url = parse_api_url(raw).map_err(CliError::InvalidApiUrl)?;
        let mut config = StorefrontConfig::from_env_with_api_url(api_url)?;
        config.token_file = self.token_file();
        Ok(config)
    }
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

/// Logs go to stderr so that stdout carries only command output.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pestania_storefront=info,pestania_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // Before parsing, so that clap's `env` fallbacks see `.env` values
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Sentry must be initialized before the tracing subscriber
    let config = cli.load_config();
    let _sentry_guard = config.as_ref().ok().and_then(init_sentry);
    init_tracing();

    let token_file = cli.token_file();
    let result = match cli.command {
        Commands::Login { token } => {
            commands::session::login(&token_file, &SecretString::from(token))
        }
        Commands::Logout => commands::session::logout(&token_file),
        Commands::Cart(command) => match config {
            Ok(config) => commands::cart::run(command, &config).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
