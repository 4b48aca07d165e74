use crate::error::{ClientError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// The single durable record. Never carries the access credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCredential {
    pub refresh_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Denormalized profile snapshot kept next to the refresh credential so the
/// client can show who is signed in before the first renewal completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<Value>,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
}

impl UserProfile {
    pub fn from_email(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }

    pub fn display_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            self.email.clone()
        } else {
            full
        }
    }
}

pub trait CredentialStorage: Send + Sync {
    fn read(&self) -> Result<Option<PersistedCredential>>;
    fn write(&self, record: &PersistedCredential) -> Result<()>;
    /// Removing an absent record is not an error.
    fn remove(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileCredentialStorage {
    path: PathBuf,
}

impl FileCredentialStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStorage for FileCredentialStorage {
    fn read(&self) -> Result<Option<PersistedCredential>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(storage_error(&self.path, err)),
        };
        match serde_json::from_str(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::warn!(%err, path = %self.path.display(), "discarding unreadable credential record");
                self.remove()?;
                Ok(None)
            }
        }
    }

    fn write(&self, record: &PersistedCredential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| storage_error(parent, err))?;
        }
        let serialized = serde_json::to_vec_pretty(record)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serialized).map_err(|err| storage_error(&staging, err))?;
        fs::rename(&staging, &self.path).map_err(|err| storage_error(&self.path, err))
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_error(&self.path, err)),
        }
    }
}

fn storage_error(path: &Path, err: std::io::Error) -> ClientError {
    ClientError::Storage(format!("{}: {err}", path.display()))
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStorage {
    record: Mutex<Option<PersistedCredential>>,
}

impl MemoryCredentialStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: PersistedCredential) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    pub fn snapshot(&self) -> Option<PersistedCredential> {
        self.record.lock().clone()
    }
}

impl CredentialStorage for MemoryCredentialStorage {
    fn read(&self) -> Result<Option<PersistedCredential>> {
        Ok(self.record.lock().clone())
    }

    fn write(&self, record: &PersistedCredential) -> Result<()> {
        *self.record.lock() = Some(record.clone());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        self.record.lock().take();
        Ok(())
    }
}
