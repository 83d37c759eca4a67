//! Cart client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PESTANIA_API_URL` - Base URL of the storefront REST API (e.g. `https://shop.example.com/`)
//!
//! ## Optional
//! - `PESTANIA_TOKEN_FILE` - File holding the bearer token (default: `.pestania/token`)
//! - `PESTANIA_TOKEN` - Bearer token; takes precedence over the token file
//! - `PESTANIA_MESSAGE_TTL_SECS` - Seconds a product success message stays visible (default: 3)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

/// Default location of the persisted bearer token.
pub const DEFAULT_TOKEN_FILE: &str = ".pestania/token";

/// Default lifetime of a product success message.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(3);

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "xxx",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Cart client configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Base URL of the REST API, always ending in `/`
    pub api_url: Url,
    /// Where the bearer token is persisted between runs
    pub token_file: PathBuf,
    /// Bearer token supplied directly through the environment
    pub token: Option<SecretString>,
    /// How long a product success message stays visible
    pub message_ttl: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g. "production", "staging")
    pub sentry_environment: Option<String>,
}

impl StorefrontConfig {
    /// Build a configuration for `api_url` with every optional setting at its default.
    #[must_use]
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            token: None,
            message_ttl: DEFAULT_MESSAGE_TTL,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid,
    /// or if `PESTANIA_TOKEN` looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_url = parse_api_url(&get_required_env("PESTANIA_API_URL")?)
            .map_err(|e| ConfigError::InvalidEnvVar("PESTANIA_API_URL".to_string(), e))?;
        Self::from_env_with_api_url(api_url)
    }

    /// Load every optional setting from the environment around an API URL
    /// supplied by the caller (e.g. a command-line flag).
    ///
    /// Does not load `.env`; call `dotenvy::dotenv()` first if needed.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an optional variable is set but invalid.
    pub fn from_env_with_api_url(api_url: Url) -> Result<Self, ConfigError> {
        let token_file = PathBuf::from(get_env_or_default("PESTANIA_TOKEN_FILE", DEFAULT_TOKEN_FILE));
        let token = get_optional_secret("PESTANIA_TOKEN")?;
        let message_ttl = get_env_or_default("PESTANIA_MESSAGE_TTL_SECS", "3")
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| {
                ConfigError::InvalidEnvVar("PESTANIA_MESSAGE_TTL_SECS".to_string(), e.to_string())
            })?;

        Ok(Self {
            api_url,
            token_file,
            token,
            message_ttl,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }
}

/// Parse and normalize the API base URL.
///
/// Paths such as `api/cart` are joined onto this URL, so it must be an
/// `http(s)` URL whose path ends with `/`. A missing trailing slash is added.
///
/// # Errors
///
/// Returns a description of the problem if the URL cannot be used as a base.
pub fn parse_api_url(raw: &str) -> Result<Url, String> {
    let mut url = Url::parse(raw.trim()).map_err(|e| e.to_string())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme {:?}", url.scheme()));
    }
    if url.cannot_be_a_base() {
        return Err("URL cannot be used as a base".to_string());
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable, treating blank values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an optional secret, rejecting obvious placeholders.
fn get_optional_secret(key: &str) -> Result<Option<SecretString>, ConfigError> {
    let Some(value) = get_optional_env(key) else {
        return Ok(None);
    };
    let secret = SecretString::from(value);
    reject_placeholder(&secret, key)?;
    Ok(Some(secret))
}

/// Reject values that look like a template placeholder rather than a real token.
fn reject_placeholder(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.expose_secret().to_lowercase();
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_url_adds_trailing_slash() {
        let url = parse_api_url("http://localhost:4000").unwrap();
        assert_eq!(url.as_str(), "http://localhost:4000/");

        let url = parse_api_url("https://shop.example.com/backend").unwrap();
        assert_eq!(url.as_str(), "https://shop.example.com/backend/");
        assert_eq!(
            url.join("api/cart").unwrap().as_str(),
            "https://shop.example.com/backend/api/cart"
        );
    }

    #[test]
    fn test_parse_api_url_keeps_existing_slash() {
        let url = parse_api_url("https://shop.example.com/").unwrap();
        assert_eq!(url.as_str(), "https://shop.example.com/");
    }

    #[test]
    fn test_parse_api_url_drops_query() {
        let url = parse_api_url("https://shop.example.com/?debug=1#top").unwrap();
        assert_eq!(url.as_str(), "https://shop.example.com/");
    }

    #[test]
    fn test_parse_api_url_rejects_bad_input() {
        assert!(parse_api_url("not a url").is_err());
        assert!(parse_api_url("ftp://shop.example.com/").is_err());
        assert!(parse_api_url("mailto:shop@example.com").is_err());
    }

    #[test]
    fn test_reject_placeholder() {
        let result = reject_placeholder(&SecretString::from("your-token-here"), "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));

        let result = reject_placeholder(&SecretString::from("eyJhbGciOiJIUzI1NiJ9.e30.sig"), "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_new_uses_defaults() {
        let config = StorefrontConfig::new(parse_api_url("http://localhost:4000").unwrap());
        assert_eq!(config.token_file, PathBuf::from(DEFAULT_TOKEN_FILE));
        assert_eq!(config.message_ttl, Duration::from_secs(3));
        assert!(config.token.is_none());
        assert!(config.sentry_dsn.is_none());
    }
}
