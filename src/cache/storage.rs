//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::key::{normalize_url, request_key};
use crate::http::{Request, Response};

/// A response read back from a store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was last written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Implementations must tolerate concurrent calls from many in-flight tasks.
/// Concurrent puts for the same key are last-write-wins; nothing wraps a
/// read followed by a write.
pub trait CacheStorage: Send + Sync {
  /// Open a store by name, creating it if it does not exist yet.
  fn open(&self, store: &str) -> Result<()>;

  /// Look up the entry for a request.
  fn match_request(&self, store: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Store a response, replacing any previous entry for the request.
  /// Opens the store if needed.
  fn put(&self, store: &str, request: &Request, response: &Response) -> Result<()>;

  /// Store every entry or none of them.
  fn put_all(&self, store: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Names of all existing stores, in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and all its entries. Returns whether it existed.
  fn delete(&self, store: &str) -> Result<bool>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Non-persistent storage, dropped with the value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
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

    Ok(data_dir.join("swcache").join("cache.db"))
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
-- One row per named store; rowid keeps creation order
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, request_key)
);
"#;

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO cache_entries
  (store, request_key, method, url, status, status_text, headers, body, cached_at)
  VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))";

const ENSURE_STORE: &str = "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)";

fn upsert_entry(
  conn: &Connection,
  store: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      UPSERT_ENTRY,
      params![
        store,
        request_key(request),
        request.method.as_str(),
        normalize_url(&request.url),
        response.status,
        response.status_text,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", request.url, store, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, store: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(ENSURE_STORE, params![store])
      .map_err(|e| eyre!("Failed to open cache store {}: {}", store, e))?;

    Ok(())
  }

  fn match_request(&self, store: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, status_text, headers, body, cached_at FROM cache_entries
         WHERE store = ? AND request_key = ?",
        params![store, request_key(request)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", request.url, store, e))?;

    match row {
      Some((status, status_text, headers, body, cached_at_str)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;

        Ok(Some(CachedResponse {
          response: Response {
            status,
            status_text,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, store: &str, request: &Request, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(ENSURE_STORE, params![store])
      .map_err(|e| eyre!("Failed to open cache store {}: {}", store, e))?;
    upsert_entry(&conn, store, request, response)
  }

  fn put_all(&self, store: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(ENSURE_STORE, params![store])
      .map_err(|e| eyre!("Failed to open cache store {}: {}", store, e))?;
    for (request, response) in entries {
      // Dropping `tx` on error rolls back every earlier insert
      upsert_entry(&tx, store, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, store: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE store = ?", params![store])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", store, e))?;
    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
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
  use url::Url;

  fn get(path: &str) -> Request {
    Request::get(Url::parse("http://app.test/").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_open_is_lazy_and_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.keys().unwrap().is_empty());

    storage.open("dynamic-v1").unwrap();
    storage.open("dynamic-v1").unwrap();
    storage.open("static-v1").unwrap();

    assert_eq!(storage.keys().unwrap(), vec!["dynamic-v1", "static-v1"]);
  }

  #[test]
  fn test_put_then_match() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let response = Response::new(200, "<html></html>").with_header("Content-Type", "text/html");

    storage.put("dynamic-v1", &get("/index.html"), &response).unwrap();

    let cached = storage
      .match_request("dynamic-v1", &get("/index.html"))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response, response);
    assert!(storage.keys().unwrap().contains(&"dynamic-v1".to_string()));
  }

  #[test]
  fn test_put_overwrites_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("s", &get("/a.png"), &Response::new(200, "old")).unwrap();
    storage.put("s", &get("/a.png"), &Response::new(200, "new")).unwrap();

    let cached = storage.match_request("s", &get("/a.png")).unwrap().unwrap();
    assert_eq!(cached.response.body, b"new");
  }

  #[test]
  fn test_stores_are_isolated() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("a", &get("/x"), &Response::new(200, "x")).unwrap();

    assert!(storage.match_request("b", &get("/x")).unwrap().is_none());
    assert!(storage.match_request("a", &get("/y")).unwrap().is_none());
  }

  #[test]
  fn test_put_all_writes_every_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entries = vec![
      (get("/index.html"), Response::new(200, "shell")),
      (get("/manifest.json"), Response::new(200, "{}")),
    ];

    storage.put_all("dynamic-v1", &entries).unwrap();

    for (request, response) in &entries {
      let cached = storage.match_request("dynamic-v1", request).unwrap().unwrap();
      assert_eq!(&cached.response, response);
    }
  }

  #[test]
  fn test_delete_removes_store_and_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("old", &get("/index.html"), &Response::new(200, "v0")).unwrap();
    storage.open("current").unwrap();

    assert!(storage.delete("old").unwrap());
    assert!(!storage.delete("old").unwrap());
    assert_eq!(storage.keys().unwrap(), vec!["current"]);

    // Reopening the name starts empty
    storage.open("old").unwrap();
    assert!(storage.match_request("old", &get("/index.html")).unwrap().is_none());
  }

  #[test]
  fn test_persists_across_reopen() {
    let dir = std::env::temp_dir().join(format!("swcache-test-{}", std::process::id()));
    let path = dir.join("cache.db");
    let _ = std::fs::remove_file(&path);

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.put("v1", &get("/index.html"), &Response::new(200, "shell")).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    assert_eq!(storage.keys().unwrap(), vec!["v1"]);
    assert!(storage.match_request("v1", &get("/index.html")).unwrap().is_some());

    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2026-02-01 09:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2026-02-01T09:30:00+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
