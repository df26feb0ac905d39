//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::CachedResponse;
use crate::http::Response;

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores, each mapping a request URL to
/// a response. Every operation is atomic from the caller's point of view and
/// concurrent writes to the same key are last-write-wins.
pub trait CacheStorage: Send + Sync {
  /// Open a store, creating it if absent.
  fn open(&self, name: &str) -> Result<()>;

  /// Names of all existing stores, oldest first.
  fn names(&self) -> Result<Vec<String>>;

  /// Delete a store and all its entries. Returns false if it did not exist.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look up a key in one store.
  fn get(&self, name: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Look up a key across all stores, oldest store first.
  fn match_any(&self, key: &str) -> Result<Option<CachedResponse>> {
    for name in self.names()? {
      if let Some(hit) = self.get(&name, key)? {
        return Ok(Some(hit));
      }
    }
    Ok(None)
  }

  /// Insert or overwrite one entry, creating the store if needed.
  fn put(&self, name: &str, key: &str, response: &Response) -> Result<()>;

  /// Insert all entries or none of them.
  fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()>;

  /// Keys held by a store, in insertion order.
  fn keys(&self, name: &str) -> Result<Vec<String>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the given path, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("feedback-cache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named stores, in creation order (rowid)
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses keyed by request URL
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, url),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);
"#;

const INSERT_CACHE: &str = "INSERT OR IGNORE INTO caches (name) VALUES (?)";

// Updates in place so an overwritten key keeps its rowid
const UPSERT_ENTRY: &str =
  "INSERT INTO cache_entries (cache_name, url, status, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, datetime('now'))
   ON CONFLICT(cache_name, url) DO UPDATE SET
     status = excluded.status,
     headers = excluded.headers,
     body = excluded.body,
     cached_at = excluded.cached_at";

type EntryRow = (u16, String, Vec<u8>, String);

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_cached((status, headers, body, cached_at): EntryRow) -> Result<CachedResponse> {
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
  Ok(CachedResponse {
    response: Response {
      status,
      headers,
      body,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

fn encode_headers(response: &Response) -> Result<String> {
  serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize response headers: {}", e))
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(INSERT_CACHE, params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    Ok(())
  }

  fn names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    Ok(removed > 0)
  }

  fn get(&self, name: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE cache_name = ? AND url = ?",
        params![name, key],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} from cache {}: {}", key, name, e))?;

    row.map(into_cached).transpose()
  }

  fn match_any(&self, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row = conn
      .query_row(
        "SELECT ce.status, ce.headers, ce.body, ce.cached_at FROM cache_entries ce
         INNER JOIN caches c ON c.name = ce.cache_name
         WHERE ce.url = ?
         ORDER BY c.rowid
         LIMIT 1",
        params![key],
        read_entry,
      )
      .optional()
      .map_err(|e| eyre!("Failed to match {} across caches: {}", key, e))?;

    row.map(into_cached).transpose()
  }

  fn put(&self, name: &str, key: &str, response: &Response) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let headers = encode_headers(response)?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(INSERT_CACHE, params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    tx.execute(
      UPSERT_ENTRY,
      params![name, key, response.status, headers, response.body],
    )
    .map_err(|e| eyre!("Failed to store {} in cache {}: {}", key, name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Dropping the transaction without commit rolls everything back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(INSERT_CACHE, params![name])
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    for (key, response) in entries {
      let headers = encode_headers(response)?;
      tx.execute(
        UPSERT_ENTRY,
        params![name, key, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store {} in cache {}: {}", key, name, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn keys(&self, name: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT url FROM cache_entries WHERE cache_name = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![name], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys of cache {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    Ok(keys)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn html(body: &str) -> Response {
    Response::new(200, "text/html", body)
  }

  #[test]
  fn test_open_creates_store_once() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("my-pwa-cache-v1").unwrap();
    storage.open("my-pwa-cache-v1").unwrap();
    storage.open("api-cache-v1").unwrap();

    assert_eq!(
      storage.names().unwrap(),
      vec!["my-pwa-cache-v1".to_string(), "api-cache-v1".to_string()]
    );
  }

  #[test]
  fn test_put_overwrites_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let key = "http://localhost:3000/submissions";
    storage
      .put("api-cache-v1", key, &Response::new(200, "application/json", "[1]"))
      .unwrap();
    storage
      .put("api-cache-v1", key, &Response::new(200, "application/json", "[1,2]"))
      .unwrap();

    let hit = storage.get("api-cache-v1", key).unwrap().unwrap();
    assert_eq!(hit.response.text(), "[1,2]");
    assert_eq!(hit.response.content_type(), Some("application/json"));
    assert_eq!(storage.keys("api-cache-v1").unwrap().len(), 1);
  }

  #[test]
  fn test_delete_cascades_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put("my-pwa-cache-v0", "http://localhost:3000/", &html("old"))
      .unwrap();

    assert!(storage.delete("my-pwa-cache-v0").unwrap());
    assert!(!storage.delete("my-pwa-cache-v0").unwrap());
    assert!(storage.names().unwrap().is_empty());
    assert!(storage
      .match_any("http://localhost:3000/")
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_match_any_prefers_oldest_store() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let key = "http://localhost:3000/index.html";
    storage.put("first", key, &html("first")).unwrap();
    storage.put("second", key, &html("second")).unwrap();

    let hit = storage.match_any(key).unwrap().unwrap();
    assert_eq!(hit.response.text(), "first");
  }

  #[test]
  fn test_put_all_inserts_every_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entries = vec![
      ("http://localhost:3000/".to_string(), html("shell")),
      ("http://localhost:3000/index.html".to_string(), html("shell")),
    ];
    storage.put_all("my-pwa-cache-v1", &entries).unwrap();

    assert_eq!(
      storage.keys("my-pwa-cache-v1").unwrap(),
      vec![
        "http://localhost:3000/".to_string(),
        "http://localhost:3000/index.html".to_string()
      ]
    );
  }

  #[test]
  fn test_overwrite_keeps_insertion_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("s", "http://localhost:3000/a", &html("a")).unwrap();
    storage.put("s", "http://localhost:3000/b", &html("b")).unwrap();
    storage.put("s", "http://localhost:3000/a", &html("a2")).unwrap();

    assert_eq!(
      storage.keys("s").unwrap(),
      vec![
        "http://localhost:3000/a".to_string(),
        "http://localhost:3000/b".to_string()
      ]
    );
    let hit = storage.get("s", "http://localhost:3000/a").unwrap().unwrap();
    assert_eq!(hit.response.text(), "a2");
  }

  #[test]
  fn test_put_all_rolls_back_on_failure() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put("my-pwa-cache-v1", "http://localhost:3000/", &html("kept"))
      .unwrap();
    storage
      .conn
      .lock()
      .unwrap()
      .execute_batch(
        "CREATE TRIGGER reject_js BEFORE INSERT ON cache_entries
         WHEN NEW.url LIKE '%.js'
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
      )
      .unwrap();

    let entries = vec![
      ("http://localhost:3000/".to_string(), html("replaced")),
      ("http://localhost:3000/index.html".to_string(), html("shell")),
      ("http://localhost:3000/static/js/main.js".to_string(), html("js")),
    ];
    let err = storage.put_all("my-pwa-cache-v1", &entries).unwrap_err();

    assert!(err.to_string().contains("main.js"));
    assert_eq!(
      storage.keys("my-pwa-cache-v1").unwrap(),
      vec!["http://localhost:3000/".to_string()]
    );
    let hit = storage
      .get("my-pwa-cache-v1", "http://localhost:3000/")
      .unwrap()
      .unwrap();
    assert_eq!(hit.response.text(), "kept");
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let key = "http://localhost:3000/submissions";

    {
      let storage = SqliteStorage::open(Some(path.as_path())).unwrap();
      storage
        .put("api-cache-v1", key, &Response::new(200, "application/json", "[]"))
        .unwrap();
    }

    let storage = SqliteStorage::open(Some(path.as_path())).unwrap();
    let hit = storage.get("api-cache-v1", key).unwrap().unwrap();
    assert_eq!(hit.response.status, 200);
    assert_eq!(hit.response.text(), "[]");
  }
}
