use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::token::{TokenSet, User};
use crate::error::SessionError;

const RECORD_VERSION: u32 = 1;

/// Storage abstraction for the persisted session record.
///
/// A store instance is bound to exactly one session scope. The only failure is
/// [`SessionError::StorageUnavailable`].
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredSession>, SessionError>;
    fn save(&self, session: &StoredSession) -> Result<(), SessionError>;
    fn clear(&self) -> Result<(), SessionError>;
}

/// On-disk shape of a session scope.
///
/// Fields are optional so a damaged or half-written record still parses;
/// [`StoredSession::token_set`] decides whether it amounts to a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default)]
    pub version: u32,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub csrf_token: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub user: Option<User>,
}

impl StoredSession {
    pub fn new(tokens: &TokenSet, last_activity_at: Option<DateTime<Utc>>, user: Option<&User>) -> Self {
        Self {
            version: RECORD_VERSION,
            access_token: Some(tokens.access_token.clone()),
            refresh_token: Some(tokens.refresh_token.clone()),
            csrf_token: tokens.csrf_token.clone(),
            issued_at: Some(tokens.issued_at),
            session_started_at: Some(tokens.session_started_at),
            access_expires_at: tokens.access_expires_at,
            last_activity_at,
            user: user.cloned(),
        }
    }

    /// The token pair, or `None` when either half (or the issue time) is missing.
    pub fn token_set(&self) -> Option<TokenSet> {
        let access_token = self.access_token.clone().filter(|t| !t.is_empty())?;
        let refresh_token = self.refresh_token.clone().filter(|t| !t.is_empty())?;
        let issued_at = self.issued_at?;
        Some(TokenSet {
            access_token,
            refresh_token,
            csrf_token: self.csrf_token.clone(),
            issued_at,
            session_started_at: self.session_started_at.unwrap_or(issued_at),
            access_expires_at: self.access_expires_at,
        })
    }
}

/// Process-scoped store; the session does not outlive the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    record: Mutex<Option<StoredSession>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<StoredSession>, SessionError> {
        Ok(self
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &StoredSession) -> Result<(), SessionError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// Configuration for file-backed session storage.
#[derive(Debug, Clone)]
pub struct TokenStoreConfig {
    pub base_dir: PathBuf,
    pub scope: String,
}

impl TokenStoreConfig {
    pub fn new(base_dir: PathBuf, scope: impl Into<String>) -> Self {
        Self {
            base_dir,
            scope: scope.into(),
        }
    }

    pub fn default_dir() -> PathBuf {
        default_session_dir()
    }
}

/// File-backed store writing one TOML record per scope.
///
/// # Example
/// ```no_run
/// use authsession::session::{FileTokenStore, TokenStore, TokenStoreConfig};
///
/// let store = FileTokenStore::new(TokenStoreConfig::new(
///     TokenStoreConfig::default_dir(),
///     "dashboard",
/// ));
/// let restored = store.load()?;
/// # Ok::<(), authsession::error::SessionError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(config: TokenStoreConfig) -> Self {
        let name = format!("{}.toml", normalize_label(&config.scope));
        Self {
            path: config.base_dir.join(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(path: &Path) -> Result<(), SessionError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredSession>, SessionError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record: StoredSession = toml::from_str(&raw)?;
        Ok(Some(record))
    }

    fn save(&self, session: &StoredSession) -> Result<(), SessionError> {
        Self::ensure_parent(&self.path)?;
        let serialized = toml::to_string(session)?;
        fs::write(&self.path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn default_session_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".authsession"))
        .unwrap_or_else(|| PathBuf::from(".authsession"))
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    let out: String = trimmed
        .chars()
        .map(|ch| {
            let lower = ch.to_ascii_lowercase();
            if lower.is_ascii_alphanumeric() || lower == '-' {
                lower
            } else {
                '-'
            }
        })
        .collect();
    if out.trim_matches('-').is_empty() {
        "default".to_string()
    } else {
        out
    }
}
