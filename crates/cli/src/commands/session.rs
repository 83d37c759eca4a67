//! Token file management.
//!
//! # Usage
//!
//! ```bash
//! pestania login --token "$TOKEN"
//! pestania logout
//! ```

use std::path::Path;

use pestania_storefront::session::TokenFileSession;
use secrecy::SecretString;
use tracing::info;

use super::CliError;

/// Save `token` so later commands run signed in.
///
/// # Errors
///
/// Returns an error if the token file cannot be written.
pub fn login(path: &Path, token: &SecretString) -> Result<(), CliError> {
    TokenFileSession::new(path)
        .store(token)
        .map_err(|source| token_file_error(path, source))?;

    info!(path = %path.display(), "Token saved");
    println!("Signed in (token saved to {})", path.display());
    Ok(())
}

/// Remove the saved token. Succeeds if there was none.
///
/// # Errors
///
/// Returns an error if the token file exists but cannot be removed.
pub fn logout(path: &Path) -> Result<(), CliError> {
    TokenFileSession::new(path)
        .clear()
        .map_err(|source| token_file_error(path, source))?;

    info!(path = %path.display(), "Token removed");
    println!("Signed out");
    Ok(())
}

fn token_file_error(path: &Path, source: std::io::Error) -> CliError {
    CliError::TokenFile {
        path: path.display().to_string(),
        source,
    }
}
