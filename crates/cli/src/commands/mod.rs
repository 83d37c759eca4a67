//! Subcommand implementations.

use pestania_storefront::CartError;
use pestania_storefront::config::ConfigError;
use thiserror::Error;

pub mod cart;
pub mod session;

/// Errors that end a CLI command.
#[derive(Debug, Error)]
pub enum CliError {
    /// No API URL in flags or environment.
    #[error("Missing API URL: pass --api-url or set PESTANIA_API_URL")]
    MissingApiUrl,

    /// The API URL could not be used.
    #[error("Invalid API URL: {0}")]
    InvalidApiUrl(String),

    /// Invalid optional configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A read-only command was run without a session.
    #[error("Not signed in: run `pestania login --token <TOKEN>` first")]
    NotSignedIn,

    /// The cart operation failed.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// The token file could not be written or removed.
    #[error("Token file {path}: {source}")]
    TokenFile {
        path: String,
        source: std::io::Error,
    },
}
