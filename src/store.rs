use crate::models::{Credentials, NewCredentials};
use log::{error, info};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database is unreachable: {0}")]
    Unreachable(#[from] r2d2::Error),
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("No auth credentials found")]
    NotFound,
}

/// Durable store for broker credentials. Append-only, latest row wins.
#[derive(Clone)]
pub struct CredentialStore {
    pool: Pool<SqliteConnectionManager>,
}

impl CredentialStore {
    /// Opens (creating if needed) the database file at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder().max_size(4).build(manager)?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory store; every pooled connection to `:memory:`
    /// would otherwise see its own empty database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        Ok(Self { pool })
    }

    /// Creates the credentials table if it does not exist yet.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;

        info!("Initializing database schema...");

        match conn.execute_batch(
            r#"
        CREATE TABLE IF NOT EXISTS mqtt (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id TEXT NOT NULL,
            password TEXT NOT NULL,
            host TEXT NOT NULL
        );
        "#,
        ) {
            Ok(_) => {
                info!("Database schema initialized successfully.");
                Ok(())
            }
            Err(e) => {
                error!("Failed to initialize database schema: {:?}", e);
                Err(e.into())
            }
        }
    }

    /// Appends a credentials row and returns the id it was assigned.
    pub fn save(&self, creds: &NewCredentials) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;

        conn.execute(
            "INSERT INTO mqtt (client_id, password, host) VALUES (?1, ?2, ?3)",
            params![creds.client_id, creds.secret, creds.host],
        )?;
        let id = conn.last_insert_rowid();
        info!("Stored broker credentials for '{}' (id {}).", creds.client_id, id);
        Ok(id)
    }

    pub fn latest(&self) -> Result<Credentials, StoreError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT id, client_id, password, host FROM mqtt ORDER BY id DESC LIMIT 1",
        )?;
        let latest = stmt
            .query_row([], |row| {
                Ok(Credentials {
                    id: row.get(0)?,
                    client_id: row.get(1)?,
                    secret: row.get(2)?,
                    host: row.get(3)?,
                })
            })
            .optional()?;

        latest.ok_or(StoreError::NotFound)
    }
}
