//! Opaque key-value document store.
//!
//! Player state is persisted as independent JSON documents behind a plain
//! get/set contract. The backing table lives in a rusqlite database under
//! the platform data directory; tests use an in-memory database.

use std::path::{Path, PathBuf};

use log::error;
use rusqlite::{params, Connection};

pub struct KvStore {
    conn: Connection,
}

impl KvStore {
    /// Opens the store at the default platform location, creating the
    /// directory and schema as needed.
    pub fn open_default() -> Result<Self, rusqlite::Error> {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cadenza");
        if !data_dir.exists() {
            if let Err(io_error) = std::fs::create_dir_all(&data_dir) {
                error!(
                    "KvStore: could not create data directory {}: {}",
                    data_dir.display(),
                    io_error
                );
            }
        }
        Self::open(&data_dir.join("state.db"))
    }

    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Reads one document. Read errors are logged and reported as absence.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        ) {
            Ok(value) => Some(value),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(db_error) => {
                error!("KvStore: failed to read key '{}': {}", key, db_error);
                None
            }
        }
    }

    /// Writes one document. Write errors are logged, never propagated.
    pub fn set(&self, key: &str, value: &str) {
        if let Err(db_error) = self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        ) {
            error!("KvStore: failed to write key '{}': {}", key, db_error);
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(db_error) = self
            .conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
        {
            error!("KvStore: failed to remove key '{}': {}", key, db_error);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_none_for_missing_key() {
        let store = KvStore::new_in_memory().expect("in-memory store should open");
        assert_eq!(store.get("missing"), None);
        assert!(!store.contains("missing"));
    }

    #[test]
    fn test_set_then_get_round_trips() {
        let store = KvStore::new_in_memory().expect("in-memory store should open");
        store.set("volume", "{\"level\":0.5}");
        assert_eq!(store.get("volume").as_deref(), Some("{\"level\":0.5}"));
    }

    #[test]
    fn test_set_overwrites_existing_value() {
        let store = KvStore::new_in_memory().expect("in-memory store should open");
        store.set("repeat", "\"none\"");
        store.set("repeat", "\"all\"");
        assert_eq!(store.get("repeat").as_deref(), Some("\"all\""));
    }

    #[test]
    fn test_remove_deletes_the_document() {
        let store = KvStore::new_in_memory().expect("in-memory store should open");
        store.set("shuffle", "true");
        store.remove("shuffle");
        assert_eq!(store.get("shuffle"), None);
    }
}
