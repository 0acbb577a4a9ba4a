use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, Params, Row, Transaction, TransactionBehavior, ffi};
use tracing::debug;

use super::migrations;
use crate::errors::{AssetError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection to the asset database. Not shared across threads: each worker
/// opens its own with [`SqliteStorage::open`] or [`SqliteStorage::reopen`].
pub struct SqliteStorage {
    pub(super) conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStorage {
    pub fn new(conn: Connection) -> Result<Self> {
        Self::init(conn, None)
    }

    /// Opens (creating if needed) the database file, ensuring its parent directories
    /// exist and the schema is current. A file that is not a database fails here.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| AssetError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!("opened {} (journal_mode={})", path.display(), mode);
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new(conn)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn)?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// A fresh connection to the same database file, for use on another thread.
    pub fn reopen(&self) -> Result<Self> {
        match &self.path {
            Some(path) => Self::open(path),
            None => Err(AssetError::InvalidInput(
                "an in-memory store cannot be reopened on another connection".to_string(),
            )),
        }
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    pub fn fetch_one<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        match self.conn.query_row(sql, params, f) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AssetError::Storage(e)),
        }
    }

    pub fn fetch_all<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params, f)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Starts a write transaction that takes the database write lock up front.
    pub(super) fn write_tx(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

pub(super) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

pub(super) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

/// Maps constraint failures to the typed errors callers branch on.
pub(super) fn constraint_error(
    err: rusqlite::Error,
    conflict: impl FnOnce() -> String,
    missing: impl FnOnce() -> String,
) -> AssetError {
    if is_unique_violation(&err) {
        AssetError::Conflict(conflict())
    } else if is_foreign_key_violation(&err) {
        AssetError::NotFound(missing())
    } else {
        AssetError::Storage(err)
    }
}

pub(super) fn not_found(err: rusqlite::Error, what: impl FnOnce() -> String) -> AssetError {
    match err {
        rusqlite::Error::QueryReturnedNoRows => AssetError::NotFound(what()),
        other => AssetError::Storage(other),
    }
}
