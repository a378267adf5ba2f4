//! Typed snapshot helpers.
//!
//! A snapshot is one JSON document per store, written whole on every flush.
//! Rehydration must tolerate a missing row (first run) and surfaces corrupt
//! JSON as an error so callers can decide whether to discard it.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Persist `value` under `key`, replacing any previous snapshot.
    pub fn save_snapshot<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO snapshots (key, json, updated_at) VALUES (?1, ?2, ?3)",
            params![key, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Load the snapshot stored under `key`, or `None` if there is none.
    pub fn load_snapshot<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT json FROM snapshots WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Remove the snapshot stored under `key`. Returns whether a row existed.
    pub fn delete_snapshot(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM snapshots WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    /// List every key with a persisted snapshot.
    pub fn snapshot_keys(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT key FROM snapshots ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Engagement {
        liked: Vec<String>,
        saved: Vec<String>,
    }

    #[test]
    fn save_and_load_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let value = Engagement {
            liked: vec!["a".into(), "b".into()],
            saved: vec![],
        };

        db.save_snapshot("video-store", &value).unwrap();
        let loaded: Option<Engagement> = db.load_snapshot("video-store").unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn missing_snapshot_is_none() {
        let db = Database::open_in_memory().unwrap();
        let loaded: Option<Engagement> = db.load_snapshot("auth-storage").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn save_replaces_previous() {
        let db = Database::open_in_memory().unwrap();
        db.save_snapshot("k", &vec![1u32]).unwrap();
        db.save_snapshot("k", &vec![2u32, 3]).unwrap();

        let loaded: Option<Vec<u32>> = db.load_snapshot("k").unwrap();
        assert_eq!(loaded, Some(vec![2, 3]));
        assert_eq!(db.snapshot_keys().unwrap(), vec!["k".to_string()]);
    }

    #[test]
    fn delete_reports_existence() {
        let db = Database::open_in_memory().unwrap();
        db.save_snapshot("k", &1u32).unwrap();
        assert!(db.delete_snapshot("k").unwrap());
        assert!(!db.delete_snapshot("k").unwrap());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO snapshots (key, json, updated_at) VALUES ('bad', '{not json', '')",
                [],
            )
            .unwrap();
        assert!(db.load_snapshot::<Engagement>("bad").is_err());
    }
}
