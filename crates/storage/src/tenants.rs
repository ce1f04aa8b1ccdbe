//! Per-tenant SQLite stores.
//!
//! Every account gets its own database file under the tenant root,
//! keyed by username. A store holds the tenant's chat log (append-only),
//! a single preferences row and, optionally, saved bandit estimates.
//! Handles are cached so repeated access reuses one connection per file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use shared::types::{now_timestamp, validate_username, ChatEntry, CodeLanguage, Preferences};
use tracing::{debug, warn};

use crate::{table_exists, StorageError};

type Handle = Arc<Mutex<Connection>>;

/// Manager for the per-tenant store files.
pub struct TenantStores {
    root: PathBuf,
    handles: Mutex<HashMap<String, Handle>>,
}

impl TenantStores {
    /// Opens the manager rooted at `root`, creating the directory if needed.
    pub fn open(root: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root).map_err(|source| StorageError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            handles: Mutex::new(HashMap::new()),
        })
    }

    fn db_path(&self, username: &str) -> PathBuf {
        self.root.join(format!("{username}.sqlite"))
    }

    /// Creates the store for `username`, seeding default preferences.
    /// Calling this for an existing store is a no-op.
    pub fn create(&self, username: &str) -> Result<(), StorageError> {
        validate_username(username)?;
        let handle = self.open_handle(username)?;
        let conn = handle.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                user_input TEXT NOT NULL,
                generated_code TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS user_preferences (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                temperature REAL NOT NULL DEFAULT 0.7,
                speed INTEGER NOT NULL DEFAULT 5,
                favorite_language TEXT NOT NULL DEFAULT 'python'
             );
             CREATE TABLE IF NOT EXISTS bandit_values (
                arm INTEGER PRIMARY KEY,
                estimate REAL NOT NULL
             );",
        )?;
        conn.execute(
            "INSERT INTO user_preferences (id, temperature, speed, favorite_language)
             SELECT 1, ?1, ?2, ?3
             WHERE NOT EXISTS (SELECT 1 FROM user_preferences)",
            params![
                Preferences::DEFAULT_TEMPERATURE,
                Preferences::DEFAULT_SPEED,
                CodeLanguage::default().as_str()
            ],
        )?;
        debug!("Tenant store ready: {}", username);
        Ok(())
    }

    /// Whether a store exists for `username`.
    pub fn exists(&self, username: &str) -> bool {
        if validate_username(username).is_err() {
            return false;
        }
        self.handles.lock().contains_key(username) || self.db_path(username).exists()
    }

    fn open_handle(&self, username: &str) -> Result<Handle, StorageError> {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(username) {
            return Ok(handle.clone());
        }
        let conn = Connection::open(self.db_path(username))?;
        let handle = Arc::new(Mutex::new(conn));
        handles.insert(username.to_string(), handle.clone());
        Ok(handle)
    }

    /// Handle for an already-created store. `None` when no store exists,
    /// including for names that could never name a store.
    fn existing_handle(&self, username: &str) -> Result<Option<Handle>, StorageError> {
        if validate_username(username).is_err() {
            return Ok(None);
        }
        if let Some(handle) = self.handles.lock().get(username) {
            return Ok(Some(handle.clone()));
        }
        if !self.db_path(username).exists() {
            return Ok(None);
        }
        self.open_handle(username).map(Some)
    }

    /// Appends one request/response pair to the tenant's chat log.
    pub fn append_chat(
        &self,
        username: &str,
        user_input: &str,
        generated_code: &str,
    ) -> Result<(), StorageError> {
        let handle = self
            .existing_handle(username)?
            .ok_or_else(|| StorageError::TenantMissing(username.to_string()))?;
        let conn = handle.lock();
        conn.execute(
            "INSERT INTO chat_history (timestamp, user_input, generated_code)
             VALUES (?1, ?2, ?3)",
            params![now_timestamp(), user_input, generated_code],
        )?;
        Ok(())
    }

    /// Most recent chat entries, newest first, capped at `limit`.
    /// A missing store reads as an empty log.
    pub fn load_recent_chat(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<ChatEntry>, StorageError> {
        let handle = match self.existing_handle(username)? {
            Some(h) => h,
            None => return Ok(Vec::new()),
        };
        let conn = handle.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, user_input, generated_code FROM chat_history
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ChatEntry {
                timestamp: row.get(0)?,
                user_input: row.get(1)?,
                generated_code: row.get(2)?,
            })
        })?;
        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }
        Ok(entries)
    }

    /// The tenant's preferences row. Out-of-range stored values are
    /// clamped and an unknown language falls back to the default, so a
    /// hand-edited store never poisons a session.
    pub fn get_preferences(&self, username: &str) -> Result<Preferences, StorageError> {
        let handle = match self.existing_handle(username)? {
            Some(h) => h,
            None => return Ok(Preferences::default()),
        };
        let conn = handle.lock();
        let row = conn
            .query_row(
                "SELECT temperature, speed, favorite_language FROM user_preferences WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let (temperature, speed, language) = match row {
            Some(r) => r,
            None => return Ok(Preferences::default()),
        };

        let favorite_language = match language.parse::<CodeLanguage>() {
            Ok(lang) => lang,
            Err(_) => {
                warn!("Unknown stored language {:?}, using default", language);
                CodeLanguage::default()
            }
        };

        Ok(Preferences {
            temperature: temperature
                .clamp(Preferences::TEMPERATURE_MIN, Preferences::TEMPERATURE_MAX),
            speed: speed.clamp(Preferences::SPEED_MIN as i64, Preferences::SPEED_MAX as i64) as u8,
            favorite_language,
        })
    }

    /// Replaces the tenant's preferences row.
    pub fn set_preferences(
        &self,
        username: &str,
        prefs: &Preferences,
    ) -> Result<(), StorageError> {
        let handle = self
            .existing_handle(username)?
            .ok_or_else(|| StorageError::TenantMissing(username.to_string()))?;
        let conn = handle.lock();
        conn.execute(
            "INSERT OR REPLACE INTO user_preferences (id, temperature, speed, favorite_language)
             VALUES (1, ?1, ?2, ?3)",
            params![
                prefs.temperature,
                prefs.speed,
                prefs.favorite_language.as_str()
            ],
        )?;
        Ok(())
    }

    /// Saves the bandit's per-arm estimates, replacing any previous set.
    pub fn save_bandit_values(&self, username: &str, values: &[f64]) -> Result<(), StorageError> {
        let handle = self
            .existing_handle(username)?
            .ok_or_else(|| StorageError::TenantMissing(username.to_string()))?;
        let conn = handle.lock();
        // Stores created before bandit persistence lack the table.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bandit_values (
                arm INTEGER PRIMARY KEY,
                estimate REAL NOT NULL
             )",
        )?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM bandit_values", [])?;
        for (arm, estimate) in values.iter().enumerate() {
            tx.execute(
                "INSERT INTO bandit_values (arm, estimate) VALUES (?1, ?2)",
                params![arm as i64, estimate],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Loads saved bandit estimates. `None` when nothing usable is stored,
    /// including a saved set whose arm count no longer matches.
    pub fn load_bandit_values(
        &self,
        username: &str,
        arms: usize,
    ) -> Result<Option<Vec<f64>>, StorageError> {
        let handle = match self.existing_handle(username)? {
            Some(h) => h,
            None => return Ok(None),
        };
        let conn = handle.lock();
        if !table_exists(&conn, "bandit_values")? {
            return Ok(None);
        }
        let mut stmt = conn.prepare("SELECT estimate FROM bandit_values ORDER BY arm")?;
        let rows = stmt.query_map([], |row| row.get::<_, f64>(0))?;
        let mut values = Vec::new();
        for value in rows {
            values.push(value?);
        }
        if values.len() != arms {
            if !values.is_empty() {
                debug!(
                    "Stored bandit estimates have {} arms, expected {}; ignoring",
                    values.len(),
                    arms
                );
            }
            return Ok(None);
        }
        Ok(Some(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_stores(dir: &TempDir) -> TenantStores {
        TenantStores::open(&dir.path().join("tenants")).unwrap()
    }

    #[test]
    fn test_create_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);

        stores.create("alice").unwrap();
        stores.append_chat("alice", "kept", "code").unwrap();
        stores.create("alice").unwrap();

        assert!(stores.exists("alice"));
        assert_eq!(stores.get_preferences("alice").unwrap(), Preferences::default());
        assert_eq!(stores.load_recent_chat("alice", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_store_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);

        assert!(!stores.exists("ghost"));
        assert_eq!(stores.get_preferences("ghost").unwrap(), Preferences::default());
        assert!(stores.load_recent_chat("ghost", 10).unwrap().is_empty());
        assert_eq!(stores.load_bandit_values("ghost", 4).unwrap(), None);
    }

    #[test]
    fn test_append_requires_store() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);

        let err = stores.append_chat("ghost", "q", "a").unwrap_err();
        assert!(matches!(err, StorageError::TenantMissing(_)));
    }

    #[test]
    fn test_chat_log_newest_first_capped() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);
        stores.create("alice").unwrap();

        for i in 1..=13 {
            stores
                .append_chat("alice", &format!("question {i}"), &format!("code {i}"))
                .unwrap();
        }

        let entries = stores.load_recent_chat("alice", 10).unwrap();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].user_input, "question 13");
        assert_eq!(entries[9].user_input, "question 4");
    }

    #[test]
    fn test_preferences_roundtrip() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);
        stores.create("alice").unwrap();

        let prefs = Preferences::new(0.9, 8, CodeLanguage::JavaScript).unwrap();
        stores.set_preferences("alice", &prefs).unwrap();
        assert_eq!(stores.get_preferences("alice").unwrap(), prefs);
    }

    #[test]
    fn test_set_preferences_recreates_a_vanished_row() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);
        stores.create("alice").unwrap();

        let conn = Connection::open(dir.path().join("tenants").join("alice.sqlite")).unwrap();
        conn.execute("DELETE FROM user_preferences", []).unwrap();
        drop(conn);

        let prefs = Preferences::new(0.5, 2, CodeLanguage::Java).unwrap();
        stores.set_preferences("alice", &prefs).unwrap();
        assert_eq!(stores.get_preferences("alice").unwrap(), prefs);
    }

    #[test]
    fn test_corrupt_preferences_are_clamped() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);
        stores.create("alice").unwrap();

        // Edit the row behind the manager's back.
        let conn = Connection::open(dir.path().join("tenants").join("alice.sqlite")).unwrap();
        conn.execute(
            "UPDATE user_preferences SET temperature = 9.0, speed = 99, favorite_language = 'ruby'",
            [],
        )
        .unwrap();
        drop(conn);

        let prefs = stores.get_preferences("alice").unwrap();
        assert_eq!(prefs.temperature, Preferences::TEMPERATURE_MAX);
        assert_eq!(prefs.speed, Preferences::SPEED_MAX);
        assert_eq!(prefs.favorite_language, CodeLanguage::Python);
    }

    #[test]
    fn test_tenants_are_isolated() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);
        stores.create("alice").unwrap();
        stores.create("bob").unwrap();

        stores.append_chat("alice", "alice asked", "alice code").unwrap();

        assert!(stores.load_recent_chat("bob", 10).unwrap().is_empty());
        let alice = stores.load_recent_chat("alice", 10).unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].user_input, "alice asked");
    }

    #[test]
    fn test_traversal_name_never_resolves() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);

        assert!(matches!(
            stores.create("../escape"),
            Err(StorageError::InvalidTenant(_))
        ));
        assert!(!stores.exists("../escape"));
        assert!(matches!(
            stores.append_chat("../escape", "q", "a"),
            Err(StorageError::TenantMissing(_))
        ));
    }

    #[test]
    fn test_bandit_values_roundtrip() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);
        stores.create("alice").unwrap();

        assert_eq!(stores.load_bandit_values("alice", 4).unwrap(), None);

        stores
            .save_bandit_values("alice", &[0.1, 0.2, 0.3, 0.4])
            .unwrap();
        assert_eq!(
            stores.load_bandit_values("alice", 4).unwrap(),
            Some(vec![0.1, 0.2, 0.3, 0.4])
        );
    }

    #[test]
    fn test_bandit_arm_count_mismatch_ignored() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);
        stores.create("alice").unwrap();

        stores.save_bandit_values("alice", &[0.5, 0.5]).unwrap();
        assert_eq!(stores.load_bandit_values("alice", 4).unwrap(), None);
    }
}
