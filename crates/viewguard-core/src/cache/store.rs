//! SQLite-backed enforcement settings cache.
//!
//! Holds the last-known-good settings snapshot with its sync time, the
//! synced content enabled-flags, and the session accumulator.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::SettingsSource;
use crate::config::{data_dir, Config};
use crate::content::ContentFlags;
use crate::error::CacheError;
use crate::settings::EnforcementSettings;
use crate::timer::{SessionRecord, SessionStore};

const SCHEMA_VERSION: i32 = 1;
const SESSION_KEY: &str = "session";

/// A cached snapshot and when it was pulled.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSettings {
    pub settings: EnforcementSettings,
    pub synced_at: DateTime<Utc>,
}

pub struct SettingsCache {
    conn: Mutex<Connection>,
}

impl SettingsCache {
    /// Open (creating if needed) the cache file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path).map_err(|source| CacheError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open the cache named by `[storage] cache_file` in the data directory.
    pub fn open_default(config: &Config) -> Result<Self, CacheError> {
        let dir = data_dir().map_err(|e| CacheError::QueryFailed(e.to_string()))?;
        Self::open(&dir.join(&config.storage.cache_file))
    }

    pub fn open_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Settings snapshot ────────────────────────────────────────────

    pub fn store_settings(
        &self,
        settings: &EnforcementSettings,
        synced_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(settings)?;
        self.conn().execute(
            "INSERT INTO settings_snapshot (id, payload, synced_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, synced_at = excluded.synced_at",
            params![payload, synced_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_settings(&self) -> Result<Option<CachedSettings>, CacheError> {
        let row = self
            .conn()
            .query_row(
                "SELECT payload, synced_at FROM settings_snapshot WHERE id = 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((payload, synced_at)) = row else {
            return Ok(None);
        };
        Ok(Some(CachedSettings {
            settings: serde_json::from_str(&payload)?,
            synced_at: parse_timestamp(&synced_at)?,
        }))
    }

    pub fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>, CacheError> {
        Ok(self.load_settings()?.map(|c| c.synced_at))
    }

    // ── Content flags ────────────────────────────────────────────────

    /// Replace every cached flag with `flags` in one transaction.
    pub fn store_flags(&self, flags: &ContentFlags) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM content_flags", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO content_flags (kind, item_id, enabled) VALUES (?1, ?2, ?3)",
            )?;
            for (id, enabled) in &flags.videos {
                stmt.execute(params!["video", id, enabled])?;
            }
            for (id, enabled) in &flags.collections {
                stmt.execute(params!["collection", id, enabled])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_flags(&self) -> Result<ContentFlags, CacheError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT kind, item_id, enabled FROM content_flags")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?;

        let mut flags = ContentFlags::default();
        for row in rows {
            let (kind, id, enabled) = row?;
            match kind.as_str() {
                "video" => {
                    flags.videos.insert(id, enabled);
                }
                "collection" => {
                    flags.collections.insert(id, enabled);
                }
                other => warn!(kind = other, "unknown content flag kind in cache"),
            }
        }
        Ok(flags)
    }

    // ── Key-value ────────────────────────────────────────────────────

    fn kv_get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn kv_set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn kv_delete(&self, key: &str) -> Result<(), CacheError> {
        self.conn()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[async_trait]
impl SettingsSource for SettingsCache {
    async fn enforcement_settings(&self) -> EnforcementSettings {
        match self.load_settings() {
            Ok(Some(cached)) => cached.settings,
            Ok(None) => {
                debug!("no settings cached yet, using defaults");
                EnforcementSettings::default()
            }
            Err(e) => {
                warn!(error = %e, "failed to read cached settings, using defaults");
                EnforcementSettings::default()
            }
        }
    }

    async fn content_flags(&self) -> ContentFlags {
        self.load_flags().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read cached content flags");
            ContentFlags::default()
        })
    }
}

impl SessionStore for SettingsCache {
    fn load_session(&self) -> Result<Option<SessionRecord>, CacheError> {
        self.kv_get(SESSION_KEY)?
            .map(|json| serde_json::from_str(&json).map_err(CacheError::from))
            .transpose()
    }

    fn save_session(&self, record: &SessionRecord) -> Result<(), CacheError> {
        self.kv_set(SESSION_KEY, &serde_json::to_string(record)?)
    }

    fn clear_session(&self) -> Result<(), CacheError> {
        self.kv_delete(SESSION_KEY)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CacheError::QueryFailed(format!("bad timestamp '{raw}': {e}")))
}

fn migrate(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )?;
    let current: i32 = conn
        .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
        .optional()?
        .unwrap_or(0);

    if current < 1 {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings_snapshot (
                id        INTEGER PRIMARY KEY CHECK (id = 1),
                payload   TEXT NOT NULL,
                synced_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS content_flags (
                kind    TEXT NOT NULL,
                item_id TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                PRIMARY KEY (kind, item_id)
            );

            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            DELETE FROM schema_version;",
        )?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
        tx.commit()?;
    }
    Ok(())
}
