use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use super::schema;
use crate::errors::{AssetError, Result};

pub const SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "index reverse tag relationships",
    sql: schema::CREATE_INDEX_RELATED_TAG,
}];

pub fn stored_version(conn: &Connection) -> Result<Option<i64>> {
    let has_table: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(None);
    }
    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(Some(version))
}

pub fn migrate(conn: &Connection) -> Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let current = match stored_version(&tx)? {
        None => {
            for ddl in schema::FULL_SCHEMA {
                tx.execute_batch(ddl)?;
            }
            set_version(&tx, SCHEMA_VERSION)?;
            tx.commit()?;
            info!("created asset schema at version {}", SCHEMA_VERSION);
            return Ok(());
        }
        Some(version) => version,
    };

    if current > SCHEMA_VERSION {
        return Err(AssetError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, SCHEMA_VERSION
        )));
    }
    if current == SCHEMA_VERSION {
        return Ok(());
    }

    for step in MIGRATIONS
        .iter()
        .filter(|m| m.version > current && m.version <= SCHEMA_VERSION)
    {
        debug!("applying migration {}: {}", step.version, step.description);
        tx.execute_batch(step.sql)?;
    }
    set_version(&tx, SCHEMA_VERSION)?;
    tx.commit()?;
    info!("migrated asset schema from version {} to {}", current, SCHEMA_VERSION);
    Ok(())
}

fn set_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}
