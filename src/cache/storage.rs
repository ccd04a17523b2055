//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use url::Url;

use crate::db::{parse_datetime, Database};
use crate::net::{Request, Response, ResponseType};

use super::traits::RequestKey;

/// A response read back from a cache store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Stores are addressed by their version-qualified name, so two versions
/// never share keys.
pub trait CacheStorage: Send + Sync {
  fn has_store(&self, name: &str) -> Result<bool>;

  /// Names of every existing store, oldest first.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and all its entries. Returns false if it did not exist.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// Look up the response stored for `request`, honouring `Vary`.
  fn match_request(&self, store: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Store a response under the request's identity, replacing any previous one.
  ///
  /// Never creates the store: returns false and writes nothing when it does
  /// not exist (e.g. it was pruned while the response was in flight).
  fn put(&self, store: &str, request: &Request, response: &Response) -> Result<bool>;

  /// Create the store and write every entry in one transaction: either all
  /// of them land or none do.
  fn put_all(&self, store: &str, entries: &[(Request, Response)]) -> Result<()>;

  fn entry_count(&self, store: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self {
      conn: Mutex::new(db.into_connection()),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for SqliteStorage {
  fn has_store(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    store_exists(&conn, name)
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let deleted = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn match_request(&self, store: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let key = RequestKey::for_request(request);

    let row = conn
      .query_row(
        "SELECT vary, status, status_text, headers, body, response_type, response_url, cached_at
         FROM cache_entries
         WHERE store_name = ? AND request_key = ?",
        params![store, key.cache_hash()],
        |row| {
          Ok(StoredRow {
            vary: row.get(0)?,
            status: row.get(1)?,
            status_text: row.get(2)?,
            headers: row.get(3)?,
            body: row.get(4)?,
            response_type: row.get(5)?,
            response_url: row.get(6)?,
            cached_at: row.get(7)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    let row = match row {
      Some(row) => row,
      None => return Ok(None),
    };

    let vary: Vec<(String, Option<String>)> = serde_json::from_str(&row.vary)
      .map_err(|e| eyre!("Failed to parse vary list: {}", e))?;

    if !vary_matches(&vary, request) {
      debug!(url = key.url(), "Cached entry does not match varied headers");
      return Ok(None);
    }

    let headers: Vec<(String, String)> = serde_json::from_str(&row.headers)
      .map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;
    let response_type = ResponseType::parse(&row.response_type)
      .ok_or_else(|| eyre!("Unknown response type '{}'", row.response_type))?;
    let url = Url::parse(&row.response_url)
      .map_err(|e| eyre!("Invalid cached response url '{}': {}", row.response_url, e))?;

    Ok(Some(CachedResponse {
      response: Response {
        url,
        status: row.status,
        status_text: row.status_text,
        headers,
        body: row.body.into(),
        response_type,
      },
      cached_at: parse_datetime(&row.cached_at)?,
    }))
  }

  fn put(&self, store: &str, request: &Request, response: &Response) -> Result<bool> {
    let conn = self.lock()?;

    // Checked under the same lock as the insert, so a concurrent
    // delete_store cannot slip in between
    if !store_exists(&conn, store)? {
      debug!(%store, url = %request.url, "Cache store is gone, dropping write");
      return Ok(false);
    }

    insert_entry(&conn, store, request, response)?;
    Ok(true)
  }

  fn put_all(&self, store: &str, entries: &[(Request, Response)]) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    insert_store(&tx, store)?;
    for (request, response) in entries {
      insert_entry(&tx, store, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, store: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE store_name = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", store, e))?;

    Ok(count as usize)
  }
}

struct StoredRow {
  vary: String,
  status: u16,
  status_text: String,
  headers: String,
  body: Vec<u8>,
  response_type: String,
  response_url: String,
  cached_at: String,
}

fn store_exists(conn: &Connection, name: &str) -> Result<bool> {
  let found: Option<i64> = conn
    .query_row(
      "SELECT 1 FROM cache_stores WHERE name = ?",
      params![name],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to query cache store {}: {}", name, e))?;

  Ok(found.is_some())
}

fn insert_store(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?, datetime('now'))",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache store {}: {}", name, e))?;
  Ok(())
}

fn insert_entry(conn: &Connection, store: &str, request: &Request, response: &Response) -> Result<()> {
  let key = RequestKey::for_request(request);

  // Remember the request's value for every header the response varies on
  let vary: Vec<(String, Option<String>)> = response
    .vary()
    .into_iter()
    .map(|name| {
      let value = request.header(&name).map(String::from);
      (name, value)
    })
    .collect();

  let vary =
    serde_json::to_string(&vary).map_err(|e| eyre!("Failed to serialize vary list: {}", e))?;
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (store_name, request_key, method, url, vary, status, status_text, headers, body,
          response_type, response_url, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        store,
        key.cache_hash(),
        key.method(),
        key.url(),
        vary,
        response.status,
        response.status_text,
        headers,
        response.body.as_ref(),
        response.response_type.as_str(),
        response.url.as_str(),
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry for {}: {}", key.url(), e))?;

  Ok(())
}

/// `Vary: *` never matches; otherwise every varied header must carry the
/// same value (or be absent on both sides).
fn vary_matches(vary: &[(String, Option<String>)], request: &Request) -> bool {
  vary
    .iter()
    .all(|(name, value)| name != "*" && request.header(name) == value.as_deref())
}
