//! Bearer session sources.
//!
//! The cart never owns authentication. It is handed an [`AuthSession`] and
//! asks it, on every request, whether the user is signed in and which bearer
//! token to send. Two sources are provided:
//!
//! - [`MemorySession`] keeps the token in process and broadcasts sign-in and
//!   sign-out on a `watch` channel, for embedding applications.
//! - [`TokenFileSession`] keeps the token in a file and re-reads it on every
//!   call, so a token written by another process is picked up immediately.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Read-only view of the caller's authentication state.
pub trait AuthSession: Send + Sync {
    /// Whether a user is currently signed in.
    fn is_authenticated(&self) -> bool;

    /// The bearer token to attach to requests, if any.
    fn bearer_token(&self) -> Option<SecretString>;
}

// =============================================================================
// MemorySession
// =============================================================================

/// In-process session whose authentication flag can be observed.
#[derive(Debug)]
pub struct MemorySession {
    token: RwLock<Option<SecretString>>,
    authenticated: watch::Sender<bool>,
}

impl MemorySession {
    /// Create a signed-out session.
    #[must_use]
    pub fn new() -> Self {
        let (authenticated, _) = watch::channel(false);
        Self {
            token: RwLock::new(None),
            authenticated,
        }
    }

    /// Create a session that is already signed in with `token`.
    #[must_use]
    pub fn signed_in(token: SecretString) -> Self {
        let session = Self::new();
        session.sign_in(token);
        session
    }

    /// Sign in with `token` and notify subscribers.
    pub fn sign_in(&self, token: SecretString) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
        self.authenticated.send_replace(true);
        debug!("Session signed in");
    }

    /// Drop the token and notify subscribers.
    pub fn sign_out(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.authenticated.send_replace(false);
        debug!("Session signed out");
    }

    /// Subscribe to authentication changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession for MemorySession {
    fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    fn bearer_token(&self) -> Option<SecretString> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// =============================================================================
// TokenFileSession
// =============================================================================

/// Session backed by a token file.
///
/// The file is the only storage: nothing is cached in memory, so every call
/// reflects the file's current contents. A missing or blank file means the
/// user is signed out.
#[derive(Debug, Clone)]
pub struct TokenFileSession {
    path: PathBuf,
}

impl TokenFileSession {
    /// Create a session reading from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the token file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `token`, creating parent directories as needed.
    ///
    /// On unix the file is readable and writable by its owner only.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn store(&self, token: &SecretString) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        // `mode` only applies on creation; tighten a pre-existing file too
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(token.expose_secret().trim().as_bytes())?;
        debug!(path = %self.path.display(), "Token stored");
        Ok(())
    }

    /// Remove the token file. Removing a file that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be removed.
    pub fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Token cleared");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn read_token(&self) -> Option<SecretString> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| SecretString::from(token.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read token file");
                None
            }
        }
    }
}

impl AuthSession for TokenFileSession {
    fn is_authenticated(&self) -> bool {
        self.read_token().is_some()
    }

    fn bearer_token(&self) -> Option<SecretString> {
        self.read_token()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn temp_token_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("pestania-session-{}-{name}", std::process::id()))
            .join("token")
    }

    #[test]
    fn test_memory_session_sign_in_out() {
        let session = MemorySession::new();
        assert!(!session.is_authenticated());
        assert!(session.bearer_token().is_none());

        session.sign_in(SecretString::from("abc"));
        assert!(session.is_authenticated());
        assert_eq!(session.bearer_token().unwrap().expose_secret(), "abc");

        session.sign_out();
        assert!(!session.is_authenticated());
        assert!(session.bearer_token().is_none());
    }

    #[tokio::test]
    async fn test_memory_session_notifies_subscribers() {
        let session = MemorySession::new();
        let mut rx = session.subscribe();

        session.sign_in(SecretString::from("abc"));
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        session.sign_out();
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }

    #[test]
    fn test_token_file_round_trip() {
        let path = temp_token_path("round-trip");
        let session = TokenFileSession::new(&path);
        session.clear().unwrap();
        assert!(!session.is_authenticated());

        session.store(&SecretString::from("  tok-123\n")).unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.bearer_token().unwrap().expose_secret(), "tok-123");

        session.clear().unwrap();
        assert!(!session.is_authenticated());
        // Clearing twice is fine
        session.clear().unwrap();
    }

    #[test]
    fn test_token_file_is_read_on_every_call() {
        let path = temp_token_path("reread");
        let session = TokenFileSession::new(&path);
        session.store(&SecretString::from("first")).unwrap();
        assert_eq!(session.bearer_token().unwrap().expose_secret(), "first");

        // Another writer replaces the token behind our back
        std::fs::write(&path, "second").unwrap();
        assert_eq!(session.bearer_token().unwrap().expose_secret(), "second");

        session.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let path = temp_token_path("mode");
        let session = TokenFileSession::new(&path);
        session.clear().unwrap();
        session.store(&SecretString::from("secret")).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // A file left world-readable by another writer is tightened on store
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        session.store(&SecretString::from("secret")).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        session.clear().unwrap();
    }

    #[test]
    fn test_blank_token_file_is_signed_out() {
        let path = temp_token_path("blank");
        let session = TokenFileSession::new(&path);
        session.store(&SecretString::from("x")).unwrap();
        std::fs::write(&path, "   \n").unwrap();
        assert!(!session.is_authenticated());
        session.clear().unwrap();
    }
}
