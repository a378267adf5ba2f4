//! v001 -- Initial schema creation.
//!
//! Creates the single `snapshots` table.  All store state is persisted as
//! JSON documents keyed by store name; there is no per-entity schema on
//! purpose, since the catalog of record lives on the backend.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Snapshots
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS snapshots (
    key        TEXT PRIMARY KEY NOT NULL,   -- store name, e.g. 'auth-storage'
    json       TEXT NOT NULL,               -- serialized partial state
    updated_at TEXT NOT NULL                -- ISO-8601 / RFC-3339
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
