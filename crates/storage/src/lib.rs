//! Persistence layer: the shared credential store and the per-tenant
//! SQLite stores holding chat history, preferences and bandit state.

pub mod credentials;
pub mod tenants;

pub use credentials::{AuthError, CredentialStore};
pub use tenants::TenantStores;

use rusqlite::Connection;
use shared::types::UsernameError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no store exists for tenant {0}")]
    TenantMissing(String),
    #[error(transparent)]
    InvalidTenant(#[from] UsernameError),
}

/// Whether a table of the given name exists in the open database.
pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool, StorageError> {
    let mut stmt =
        conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    Ok(stmt.exists([table])?)
}

/// Whether the named table has a column of the given name.
pub(crate) fn column_exists(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<bool, StorageError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
