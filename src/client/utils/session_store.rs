use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use keyring::Entry;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::client::config::ClientConfig;
use crate::client::utils::token;
use crate::common::{ClientError, ClientResult, Role};

const SERVICE: &str = "wayfarer_app";
const USER: &str = "wayfarer_session";

/// Identity of the logged in user as the client sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        token::is_expired(&self.token)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone)]
enum Persistence {
    /// OS keyring, optionally falling back to a file when the keyring is unavailable.
    Keyring { fallback: Option<PathBuf> },
    File(PathBuf),
    Memory,
}

/// Single owner of the current session. Reads are cheap and shared; only the
/// login and logout flows write.
#[derive(Debug, Clone)]
pub struct SessionStore {
    current: Arc<RwLock<Option<Session>>>,
    persistence: Persistence,
}

impl SessionStore {
    pub fn from_config(config: &ClientConfig) -> Self {
        let fallback = config.keyring_fallback.then(|| config.session_file.clone());
        Self::with_persistence(Persistence::Keyring { fallback })
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::with_persistence(Persistence::File(path.into()))
    }

    pub fn in_memory() -> Self {
        Self::with_persistence(Persistence::Memory)
    }

    fn with_persistence(persistence: Persistence) -> Self {
        Self { current: Arc::new(RwLock::new(None)), persistence }
    }

    pub fn get_session(&self) -> Option<Session> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }

    pub fn token(&self) -> Option<String> {
        self.current.read().ok().and_then(|guard| guard.as_ref().map(|s| s.token.clone()))
    }

    pub fn is_logged_in(&self) -> bool {
        self.get_session().is_some()
    }

    pub fn set_session(&self, session: Session) -> ClientResult<()> {
        self.persist(&session)?;
        let mut guard = self.current.write().map_err(|_| ClientError::Session("session lock poisoned".into()))?;
        *guard = Some(session);
        Ok(())
    }

    pub fn clear_session(&self) -> ClientResult<()> {
        if let Ok(mut guard) = self.current.write() {
            *guard = None;
        }
        self.erase()
    }

    /// Forced logout. The in-memory session is gone even if erasing the
    /// persisted copy fails; that failure is only logged.
    pub fn discard(&self) {
        if let Err(e) = self.clear_session() {
            warn!("[SESSION_STORE] Could not erase stored session: {}", e);
        }
    }

    /// Load the persisted session at startup. An expired session is cleared
    /// instead of being restored.
    pub fn restore(&self) -> Option<Session> {
        let session = self.load()?;
        if session.is_expired() {
            info!("[SESSION_STORE] Stored session for {} has expired, clearing", session.username);
            let _ = self.erase();
            return None;
        }
        if let Ok(mut guard) = self.current.write() {
            *guard = Some(session.clone());
        }
        Some(session)
    }

    /// Forces logout when the in-memory token has expired. Returns true if it did.
    pub fn expire_if_needed(&self) -> bool {
        match self.get_session() {
            Some(session) if session.is_expired() => {
                warn!("[SESSION_STORE] Token expired, logging out {}", session.username);
                self.discard();
                true
            }
            _ => false,
        }
    }

    fn persist(&self, session: &Session) -> ClientResult<()> {
        let json = serde_json::to_string(session)?;
        match &self.persistence {
            Persistence::Memory => Ok(()),
            Persistence::File(path) => write_file(path, &json),
            Persistence::Keyring { fallback } => {
                let entry = Entry::new(SERVICE, USER);
                match entry.set_password(&json) {
                    Ok(()) => Ok(()),
                    Err(e) => match fallback {
                        Some(path) => {
                            // warn in logs but do not print token
                            warn!("[SESSION_STORE] Keyring unavailable ({}), persisted session to fallback file", e);
                            write_file(path, &json)
                        }
                        None => Err(ClientError::Session("keyring unavailable and file fallback disabled".into())),
                    },
                }
            }
        }
    }

    fn load(&self) -> Option<Session> {
        let raw = match &self.persistence {
            Persistence::Memory => None,
            Persistence::File(path) => read_file(path),
            Persistence::Keyring { fallback } => match Entry::new(SERVICE, USER).get_password() {
                Ok(t) if !t.trim().is_empty() => Some(t),
                _ => fallback.as_deref().and_then(read_file),
            },
        }?;
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("[SESSION_STORE] Ignoring unreadable stored session: {}", e);
                None
            }
        }
    }

    fn erase(&self) -> ClientResult<()> {
        match &self.persistence {
            Persistence::Memory => Ok(()),
            Persistence::File(path) => remove_file(path),
            Persistence::Keyring { fallback } => {
                let _ = Entry::new(SERVICE, USER).delete_password();
                match fallback {
                    Some(path) => remove_file(path),
                    None => Ok(()),
                }
            }
        }
    }
}

fn write_file(path: &Path, contents: &str) -> ClientResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| ClientError::Session(e.to_string()))?;
        }
    }
    std::fs::write(path, contents).map_err(|e| ClientError::Session(e.to_string()))
}

fn read_file(path: &Path) -> Option<String> {
    let s = std::fs::read_to_string(path).ok()?;
    let t = s.trim().to_string();
    if t.is_empty() { None } else { Some(t) }
}

fn remove_file(path: &Path) -> ClientResult<()> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| ClientError::Session(e.to_string()))?;
    }
    Ok(())
}
