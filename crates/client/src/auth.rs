//! Persisted authentication record and its storage backends.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::jwt::{decode_claims, Claims};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ClientError;

/// Namespace key the auth record is stored under.
pub const AUTH_STORAGE_KEY: &str = "auth-storage";

/// Tokens plus the claims decoded from the access token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthRecord {
    #[serde(default)]
    pub user: Option<Claims>,
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
}

impl AuthRecord {
    /// Builds a record from a token pair, decoding the user claims when the
    /// access token is a readable JWT.
    pub fn from_tokens(access: impl Into<String>, refresh: Option<String>) -> Self {
        let access = access.into();
        let user = match decode_claims(&access) {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!(error = %e, "Access token claims not readable");
                None
            }
        };
        Self {
            user,
            access: Some(access),
            refresh,
        }
    }

    /// Access token present and not expired at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        let Some(access) = self.access.as_deref() else {
            return false;
        };
        match decode_claims(access) {
            Ok(claims) => !claims.is_expired_at(now, leeway_secs),
            Err(_) => false,
        }
    }
}

/// On-disk envelope: `{"state": {...}, "version": 0}`.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedAuth {
    state: AuthRecord,
    #[serde(default)]
    version: u32,
}

/// Durable storage for the auth record.
///
/// This is the only state the client persists; devices, geofences and
/// alerts are rebuilt from the server every session.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<AuthRecord>, ClientError>;
    async fn save(&self, record: &AuthRecord) -> Result<(), ClientError>;
    async fn clear(&self) -> Result<(), ClientError>;
}

/// JSON file holding a key/value namespace; the record lives under
/// [`AUTH_STORAGE_KEY`] and other keys are preserved.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_namespace(&self) -> Result<Map<String, Value>, ClientError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "Auth storage is not a JSON object, ignoring it");
                Ok(Map::new())
            }
        }
    }

    async fn write_namespace(&self, namespace: &Map<String, Value>) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_vec_pretty(namespace)
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<AuthRecord>, ClientError> {
        let namespace = self.read_namespace().await?;
        let Some(entry) = namespace.get(AUTH_STORAGE_KEY) else {
            return Ok(None);
        };
        match serde_json::from_value::<PersistedAuth>(entry.clone()) {
            Ok(persisted) => Ok(Some(persisted.state)),
            Err(e) => {
                warn!(error = %e, "Malformed auth record, treating session as logged out");
                Ok(None)
            }
        }
    }

    async fn save(&self, record: &AuthRecord) -> Result<(), ClientError> {
        let mut namespace = self.read_namespace().await?;
        let entry = serde_json::to_value(PersistedAuth {
            state: record.clone(),
            version: 0,
        })
        .map_err(|e| ClientError::Storage(e.to_string()))?;
        namespace.insert(AUTH_STORAGE_KEY.to_string(), entry);
        self.write_namespace(&namespace).await
    }

    async fn clear(&self) -> Result<(), ClientError> {
        let mut namespace = self.read_namespace().await?;
        if namespace.remove(AUTH_STORAGE_KEY).is_none() {
            return Ok(());
        }
        self.write_namespace(&namespace).await
    }
}

/// Non-persistent store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    record: RwLock<Option<AuthRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: AuthRecord) -> Self {
        Self {
            record: RwLock::new(Some(record)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<AuthRecord>, ClientError> {
        Ok(self.record.read().await.clone())
    }

    async fn save(&self, record: &AuthRecord) -> Result<(), ClientError> {
        *self.record.write().await = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), ClientError> {
        *self.record.write().await = None;
        Ok(())
    }
}
