//! Persistent cache for the harvested session.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::model::SessionDescriptor;

/// Where a session is kept between runs.
///
/// `invalidate` is called once the remote side rejects a cached session so the
/// next lookup misses and a fresh login is triggered.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionDescriptor>>;
    fn save(&self, session: &SessionDescriptor) -> Result<()>;
    fn invalidate(&self) -> Result<()>;
}

/// JSON file on disk, memoised in memory for the lifetime of the process.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    memo: Mutex<Option<SessionDescriptor>>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            memo: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn credentials_error(&self, message: impl ToString) -> Error {
        Error::Credentials {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }

    fn memo(&self) -> std::sync::MutexGuard<'_, Option<SessionDescriptor>> {
        // The memo is a plain value; a panic elsewhere cannot leave it half-written.
        self.memo.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<SessionDescriptor>> {
        if let Some(session) = self.memo().clone() {
            return Ok(Some(session));
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no cached session at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(self.credentials_error(e)),
        };

        let session: SessionDescriptor = serde_json::from_str(&content).map_err(|e| {
            self.credentials_error(format!(
                "not valid JSON with fields 'Cookie' and 'User-Agent': {e}"
            ))
        })?;

        debug!("loaded cached session from {}", self.path.display());
        *self.memo() = Some(session.clone());
        Ok(Some(session))
    }

    fn save(&self, session: &SessionDescriptor) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.credentials_error(e))?;
            }
        }
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| self.credentials_error(e))?;
        fs::write(&self.path, json).map_err(|e| self.credentials_error(e))?;

        info!("session saved to {}", self.path.display());
        *self.memo() = Some(session.clone());
        Ok(())
    }

    fn invalidate(&self) -> Result<()> {
        *self.memo() = None;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("discarded cached session at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.credentials_error(e)),
        }
    }
}

/// Store that never touches the filesystem.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    session: Mutex<Option<SessionDescriptor>>,
}

impl MemoryCredentialStore {
    pub fn with_session(session: SessionDescriptor) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<SessionDescriptor>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<SessionDescriptor>> {
        Ok(self.slot().clone())
    }

    fn save(&self, session: &SessionDescriptor) -> Result<()> {
        *self.slot() = Some(session.clone());
        Ok(())
    }

    fn invalidate(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}
