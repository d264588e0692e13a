//! Session storage backends.
//!
//! Provides the [`SessionStorage`] trait and several implementations:
//! - [`FileSessionStorage`] - Stores the session as a JSON file on disk
//! - [`MemorySessionStorage`] - In-memory storage for testing
//! - [`KeyringSessionStorage`] - System keyring storage (requires `system-keyring` feature)
//!
//! Alongside the session itself, each backend persists the *pending
//! exchange marker*: the last authorization code submitted for exchange.
//! The marker survives process restarts so that a flow interrupted
//! mid-exchange never re-submits the same single-use code.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::instrument;

use super::session::Session;
use crate::error::AuthError;

// =============================================================================
// SessionStorage trait
// =============================================================================

/// Trait for session storage backends.
///
/// All implementations must be thread-safe (`Send + Sync`). A save
/// overwrites the whole session as one unit; a clear removes every
/// field together. No partial session state is ever observable.
pub trait SessionStorage: Send + Sync {
    /// Load the stored session, if any.
    fn load(&self) -> Result<Option<Session>, AuthError>;

    /// Save a session, overwriting any previous one atomically.
    fn save(&self, session: &Session) -> Result<(), AuthError>;

    /// Remove the stored session. The pending marker is untouched.
    fn clear_session(&self) -> Result<(), AuthError>;

    /// The authorization code currently marked as submitted, if any.
    fn pending_code(&self) -> Result<Option<String>, AuthError>;

    /// Mark an authorization code as submitted for exchange.
    ///
    /// Overwrites any previous marker; only one code can be pending.
    fn mark_pending(&self, code: &str) -> Result<(), AuthError>;

    /// Remove the pending marker.
    fn clear_pending(&self) -> Result<(), AuthError>;

    /// Remove everything: session and pending marker (logout).
    fn clear_all(&self) -> Result<(), AuthError> {
        self.clear_session()?;
        self.clear_pending()
    }

    /// Check if a session exists in storage.
    fn exists(&self) -> Result<bool, AuthError> {
        Ok(self.load()?.is_some())
    }

    /// Get the name of this storage backend.
    fn name(&self) -> &str;
}

// Blanket implementation for Arc<T>
impl<T: SessionStorage + ?Sized> SessionStorage for Arc<T> {
    fn load(&self) -> Result<Option<Session>, AuthError> {
        (**self).load()
    }
    fn save(&self, session: &Session) -> Result<(), AuthError> {
        (**self).save(session)
    }
    fn clear_session(&self) -> Result<(), AuthError> {
        (**self).clear_session()
    }
    fn pending_code(&self) -> Result<Option<String>, AuthError> {
        (**self).pending_code()
    }
    fn mark_pending(&self, code: &str) -> Result<(), AuthError> {
        (**self).mark_pending(code)
    }
    fn clear_pending(&self) -> Result<(), AuthError> {
        (**self).clear_pending()
    }
    fn clear_all(&self) -> Result<(), AuthError> {
        (**self).clear_all()
    }
    fn exists(&self) -> Result<bool, AuthError> {
        (**self).exists()
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// =============================================================================
// FileSessionStorage
// =============================================================================

/// File permissions for session files (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// File name for the persisted session.
const SESSION_FILE: &str = "session.json";

/// File name for the pending exchange marker.
const PENDING_FILE: &str = "pending-code";

/// File-based session storage.
///
/// Stores the session as a JSON file in a configurable directory:
/// `{dir}/session.json`, with the pending marker next to it.
///
/// # Security
/// - File permissions are set to 0600 (owner read/write only) on Unix
/// - Parent directories are created with 0700 permissions
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    /// Directory where session files are stored.
    dir: PathBuf,
}

impl FileSessionStorage {
    /// Create a new FileSessionStorage with the specified directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory where the session is stored.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn pending_path(&self) -> PathBuf {
        self.dir.join(PENDING_FILE)
    }

    /// Ensure the storage directory exists with correct permissions.
    fn ensure_dir(&self) -> Result<(), AuthError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to create session directory '{}': {}",
                    self.dir.display(),
                    e
                ))
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(DIR_MODE);
                std::fs::set_permissions(&self.dir, perms).map_err(|e| {
                    AuthError::Storage(format!(
                        "Failed to set directory permissions on '{}': {}",
                        self.dir.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Write `content` to `path` via a temp file and atomic rename.
    fn write_atomic(&self, path: &Path, content: &str) -> Result<(), AuthError> {
        self.ensure_dir()?;

        // On Unix, set 0600 permissions at creation time to avoid a
        // window where tokens are readable by other users.
        let temp_path = path.with_extension("tmp");

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(&temp_path)
                .map_err(|e| {
                    AuthError::Storage(format!(
                        "Failed to create temp file '{}': {}",
                        temp_path.display(),
                        e
                    ))
                })?;
            file.write_all(content.as_bytes()).map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to write temp file '{}': {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.sync_all().map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to sync temp file '{}': {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&temp_path, content).map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to write temp file '{}': {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if let Err(e) = std::fs::rename(&temp_path, path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(AuthError::Storage(format!(
                "Failed to rename '{}' to '{}': {}",
                temp_path.display(),
                path.display(),
                e
            )));
        }

        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), AuthError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Storage(format!(
                "Failed to remove '{}': {}",
                path.display(),
                e
            ))),
        }
    }
}

impl SessionStorage for FileSessionStorage {
    #[instrument(skip(self))]
    fn load(&self) -> Result<Option<Session>, AuthError> {
        let path = self.session_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthError::Storage(format!(
                    "Failed to read session file '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let session: Session = serde_json::from_str(&content).map_err(|e| {
            AuthError::Storage(format!(
                "Failed to parse session file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Ok(Some(session))
    }

    #[instrument(skip(self, session))]
    fn save(&self, session: &Session) -> Result<(), AuthError> {
        let content = serde_json::to_string_pretty(session)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize session: {}", e)))?;
        self.write_atomic(&self.session_path(), &content)
    }

    #[instrument(skip(self))]
    fn clear_session(&self) -> Result<(), AuthError> {
        self.remove_file(&self.session_path())
    }

    fn pending_code(&self) -> Result<Option<String>, AuthError> {
        match std::fs::read_to_string(self.pending_path()) {
            Ok(code) => {
                let code = code.trim().to_string();
                Ok((!code.is_empty()).then_some(code))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuthError::Storage(format!(
                "Failed to read pending marker: {}",
                e
            ))),
        }
    }

    #[instrument(skip(self, code))]
    fn mark_pending(&self, code: &str) -> Result<(), AuthError> {
        self.write_atomic(&self.pending_path(), code)
    }

    fn clear_pending(&self) -> Result<(), AuthError> {
        self.remove_file(&self.pending_path())
    }

    fn exists(&self) -> Result<bool, AuthError> {
        Ok(self.session_path().exists())
    }

    fn name(&self) -> &str {
        "file"
    }
}

// =============================================================================
// KeyringSessionStorage
// =============================================================================

/// Keyring-based session storage.
///
/// Uses the system's native credential store. The session is serialized
/// to JSON before storage; the pending marker is a second entry.
///
/// Feature-gated behind `system-keyring`.
#[cfg(feature = "system-keyring")]
#[derive(Debug, Clone)]
pub struct KeyringSessionStorage {
    /// Service name for keyring entries.
    service: String,
}

#[cfg(feature = "system-keyring")]
impl Default for KeyringSessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "system-keyring")]
impl KeyringSessionStorage {
    /// Service name prefix for keyring entries.
    const SERVICE_NAME: &str = "authgate";

    /// Keyring entry key for the session.
    const SESSION_KEY: &str = "session";

    /// Keyring entry key for the pending exchange marker.
    const PENDING_KEY: &str = "pending-code";

    /// Create a new KeyringSessionStorage with default service name.
    pub fn new() -> Self {
        Self {
            service: Self::SERVICE_NAME.to_string(),
        }
    }

    /// Create a KeyringSessionStorage with a custom service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, AuthError> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| AuthError::Storage(format!("Failed to create keyring entry: {}", e)))
    }

    fn read(&self, key: &str) -> Result<Option<String>, AuthError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AuthError::Storage(format!("Keyring error: {}", e))),
        }
    }

    fn delete(&self, key: &str) -> Result<(), AuthError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Storage(format!("Keyring error: {}", e))),
        }
    }
}

#[cfg(feature = "system-keyring")]
impl SessionStorage for KeyringSessionStorage {
    #[instrument(skip(self))]
    fn load(&self) -> Result<Option<Session>, AuthError> {
        match self.read(Self::SESSION_KEY)? {
            Some(json) => {
                let session: Session = serde_json::from_str(&json).map_err(|e| {
                    AuthError::Storage(format!("Failed to parse session from keyring: {}", e))
                })?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, session))]
    fn save(&self, session: &Session) -> Result<(), AuthError> {
        let json = serde_json::to_string(session)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize session: {}", e)))?;
        self.entry(Self::SESSION_KEY)?
            .set_password(&json)
            .map_err(|e| AuthError::Storage(format!("Keyring error: {}", e)))
    }

    #[instrument(skip(self))]
    fn clear_session(&self) -> Result<(), AuthError> {
        self.delete(Self::SESSION_KEY)
    }

    fn pending_code(&self) -> Result<Option<String>, AuthError> {
        self.read(Self::PENDING_KEY)
    }

    fn mark_pending(&self, code: &str) -> Result<(), AuthError> {
        self.entry(Self::PENDING_KEY)?
            .set_password(code)
            .map_err(|e| AuthError::Storage(format!("Keyring error: {}", e)))
    }

    fn clear_pending(&self) -> Result<(), AuthError> {
        self.delete(Self::PENDING_KEY)
    }

    fn name(&self) -> &str {
        "keyring"
    }
}

// =============================================================================
// MemorySessionStorage
// =============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    session: Option<Session>,
    pending: Option<String>,
}

/// In-memory session storage.
///
/// Uses `Arc<RwLock<_>>` for thread-safe access. Useful for testing and
/// ephemeral sessions. The storage is Clone and shares its state.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStorage {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemorySessionStorage {
    /// Create a new empty MemorySessionStorage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a MemorySessionStorage holding an initial session.
    pub fn with_session(session: Session) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryInner {
                session: Some(session),
                pending: None,
            })),
        }
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<Session>, AuthError> {
        let guard = self.inner.read().expect("lock poisoned");
        Ok(guard.session.clone())
    }

    fn save(&self, session: &Session) -> Result<(), AuthError> {
        let mut guard = self.inner.write().expect("lock poisoned");
        guard.session = Some(session.clone());
        Ok(())
    }

    fn clear_session(&self) -> Result<(), AuthError> {
        let mut guard = self.inner.write().expect("lock poisoned");
        guard.session = None;
        Ok(())
    }

    fn pending_code(&self) -> Result<Option<String>, AuthError> {
        let guard = self.inner.read().expect("lock poisoned");
        Ok(guard.pending.clone())
    }

    fn mark_pending(&self, code: &str) -> Result<(), AuthError> {
        let mut guard = self.inner.write().expect("lock poisoned");
        guard.pending = Some(code.to_string());
        Ok(())
    }

    fn clear_pending(&self) -> Result<(), AuthError> {
        let mut guard = self.inner.write().expect("lock poisoned");
        guard.pending = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
