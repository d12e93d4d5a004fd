// Credential storage: in-memory and SQLite-backed

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use super::types::Credential;

/// Key under which the session is stored in `auth_kv`
const SESSION_KEY: &str = "travelquest:session";

/// Holder of the current access/refresh pair
///
/// Implementations must replace and remove both tokens together.
pub trait CredentialStore: Send + Sync {
    /// Current credential, if a session exists
    fn get(&self) -> Result<Option<Credential>>;

    /// Replace the stored credential
    fn set(&self, credential: Credential) -> Result<()>;

    /// Remove the stored credential
    ///
    /// Returns `true` if a credential was present and has been removed.
    fn clear(&self) -> Result<bool>;
}

/// Process-local credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            inner: Mutex::new(Some(credential)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Credential>> {
        // A panic elsewhere cannot leave a half-written pair behind, so poisoning is ignored
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<Credential>> {
        Ok(self.slot().clone())
    }

    fn set(&self, credential: Credential) -> Result<()> {
        *self.slot() = Some(credential);
        Ok(())
    }

    fn clear(&self) -> Result<bool> {
        Ok(self.slot().take().is_some())
    }
}

/// Row payload persisted in SQLite
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    access_token: String,
    refresh_token: String,
    updated_at: DateTime<Utc>,
}

/// Durable credential store in a SQLite database
///
/// The pair lives in a single `auth_kv` row so that every write replaces
/// both tokens in one statement.
pub struct SqliteCredentialStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the session database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create session directory: {}", parent.display())
                })?;
            }
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        tracing::debug!("Opened session database: {}", path.display());

        Self::from_connection(conn)
    }

    /// Session database that lives only as long as this store
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self) -> Result<Option<Credential>> {
        let conn = self.conn();
        let value: Option<String> = match conn.query_row(
            "SELECT value FROM auth_kv WHERE key = ?",
            [SESSION_KEY],
            |row| row.get(0),
        ) {
            Ok(value) => Some(value),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e).context("Failed to load session from SQLite"),
        };

        let Some(json) = value else {
            return Ok(None);
        };

        let stored: StoredSession =
            serde_json::from_str(&json).context("Failed to parse session from SQLite")?;

        Ok(Some(Credential {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
        }))
    }

    fn set(&self, credential: Credential) -> Result<()> {
        let stored = StoredSession {
            access_token: credential.access_token,
            refresh_token: credential.refresh_token,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&stored).context("Failed to serialize session")?;

        self.conn()
            .execute(
                "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![SESSION_KEY, json],
            )
            .context("Failed to save session to SQLite")?;

        Ok(())
    }

    fn clear(&self) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM auth_kv WHERE key = ?", [SESSION_KEY])
            .context("Failed to delete session from SQLite")?;

        Ok(removed > 0)
    }
}
