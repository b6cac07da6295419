//! Versioned schema for the relational event store.
//!
//! The applied version is kept in `PRAGMA user_version`. Migrations run strictly in order from
//! the recorded version up to [`LATEST_VERSION`], each inside its own transaction together with
//! the version bump. There is no downgrade path.
use rusqlite::Connection;

use crate::{Error, Result};

pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create exported_event",
        sql: "
            CREATE TABLE IF NOT EXISTS exported_event (
                id TEXT PRIMARY KEY NOT NULL,
                tries INTEGER NOT NULL DEFAULT 0,
                project_id TEXT NOT NULL,
                route TEXT NOT NULL,
                should_be_skipped INTEGER NOT NULL DEFAULT 0,
                project TEXT NOT NULL,
                event_type TEXT,
                timestamp REAL NOT NULL,
                properties TEXT NOT NULL,
                customer_ids TEXT
            );
        ",
    },
    Migration {
        version: 2,
        description: "add age",
        // -1 marks rows written before age was recorded.
        sql: "ALTER TABLE exported_event ADD COLUMN age REAL NOT NULL DEFAULT -1;",
    },
    Migration {
        version: 3,
        description: "add sdk_event_type",
        sql: "ALTER TABLE exported_event ADD COLUMN sdk_event_type TEXT DEFAULT NULL;",
    },
];

pub(crate) const LATEST_VERSION: u32 = 3;

/// Stored in the `age` column when the age is unknown.
pub(crate) const AGE_UNSET: f64 = -1.0;

pub(crate) fn configure(conn: &Connection) -> rusqlite::Result<()> {
    // In-memory databases answer "memory" and keep their journal mode.
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    // FULL so that a committed write survives power loss, not only a process crash.
    conn.pragma_update(None, "synchronous", "FULL")?;
    Ok(())
}

pub(crate) fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

pub(crate) fn migrate(conn: &mut Connection) -> Result<()> {
    migrate_to(conn, LATEST_VERSION)
}

pub(crate) fn migrate_to(conn: &mut Connection, target: u32) -> Result<()> {
    let current = current_version(conn)?;
    if current > LATEST_VERSION {
        return Err(Error::UnsupportedSchemaVersion {
            found: current,
            latest: LATEST_VERSION,
        });
    }

    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > current && m.version <= target)
    {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        log::debug!(target: "beacon",
                    version = migration.version,
                    description = migration.description;
                    "applied event store migration");
    }
    Ok(())
}
