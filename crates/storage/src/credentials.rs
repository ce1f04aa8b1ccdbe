//! Account registry backed by a single SQLite database.
//!
//! Passwords are stored as bcrypt hashes, never in clear text. Older
//! databases without the `created_at` column are migrated on open.

use std::path::Path;
use std::sync::Arc;

use bcrypt::{hash, verify, DEFAULT_COST};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use shared::types::{now_timestamp, validate_username, UsernameError};
use tracing::info;

use crate::{column_exists, table_exists, StorageError};

/// Shortest accepted password.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("username already exists")]
    AlreadyExists,
    #[error("unknown username")]
    NotFound,
    #[error("wrong password")]
    WrongPassword,
    #[error(transparent)]
    InvalidUsername(#[from] UsernameError),
    #[error("password must be at least 6 characters")]
    WeakPassword,
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Store of account credentials, shared by all tenants.
#[derive(Clone)]
pub struct CredentialStore {
    conn: Arc<Mutex<Connection>>,
}

impl CredentialStore {
    /// Opens (or creates) the credential database at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StorageError> {
        if table_exists(conn, "users")? && !column_exists(conn, "users", "created_at")? {
            Self::migrate_created_at(conn)?;
        }

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Rebuilds a legacy `users` table that predates the `created_at`
    /// column. Existing rows are kept and stamped with the current time.
    fn migrate_created_at(conn: &Connection) -> Result<(), StorageError> {
        info!("Migrating credential store: adding created_at column");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(
            "ALTER TABLE users RENAME TO users_old;
             CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password TEXT NOT NULL,
                created_at TEXT NOT NULL
             );",
        )?;
        tx.execute(
            "INSERT INTO users (id, username, password, created_at)
             SELECT id, username, password, ?1 FROM users_old",
            params![now_timestamp()],
        )?;
        tx.execute_batch("DROP TABLE users_old")?;
        tx.commit()?;
        Ok(())
    }

    /// Creates a new account. Fails if the username is taken, malformed,
    /// or the password is too short.
    pub fn register(&self, username: &str, password: &str) -> Result<(), AuthError> {
        validate_username(username)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let hashed = hash(password, DEFAULT_COST)?;
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO users (username, password, created_at) VALUES (?1, ?2, ?3)",
            params![username, hashed, now_timestamp()],
        );
        match inserted {
            Ok(_) => {
                info!("Registered new account: {}", username);
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(AuthError::AlreadyExists)
            }
            Err(e) => Err(StorageError::from(e).into()),
        }
    }

    /// Verifies a username/password pair against the stored hash.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let hashed = match self.lookup_hash(username)? {
            Some(h) => h,
            None => return Err(AuthError::NotFound),
        };
        if verify(password, &hashed)? {
            Ok(())
        } else {
            Err(AuthError::WrongPassword)
        }
    }

    /// Returns the registration timestamp for an existing account.
    pub fn created_at(&self, username: &str) -> Result<String, AuthError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT created_at FROM users WHERE username = ?1")
            .map_err(StorageError::from)?;
        let created = stmt
            .query_row(params![username], |row| row.get::<_, String>(0))
            .optional()
            .map_err(StorageError::from)?;
        created.ok_or(AuthError::NotFound)
    }

    fn lookup_hash(&self, username: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT password FROM users WHERE username = ?1")?;
        Ok(stmt
            .query_row(params![username], |row| row.get::<_, String>(0))
            .optional()?)
    }
}
