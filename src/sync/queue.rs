//! Persisted queue of actions recorded while offline.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use url::Url;
use uuid::Uuid;

use crate::db::Database;
use crate::net::Request;

/// A mutation waiting to be sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingAction {
  /// Also sent as `Idempotency-Key`, so a replayed send can be deduplicated
  pub id: String,
  /// Free-form label, e.g. "bot-start" or "add-comment"
  pub kind: String,
  pub method: String,
  pub url: Url,
  pub payload: Option<serde_json::Value>,
  pub attempts: u32,
  pub max_attempts: u32,
  pub created_at: DateTime<Utc>,
  pub last_error: Option<String>,
}

impl PendingAction {
  pub fn new(
    kind: impl Into<String>,
    method: Method,
    url: Url,
    payload: Option<serde_json::Value>,
    max_attempts: u32,
  ) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      kind: kind.into(),
      method: method.as_str().to_string(),
      url,
      payload,
      attempts: 0,
      max_attempts,
      created_at: Utc::now(),
      last_error: None,
    }
  }

  /// Build the request that replays this action.
  pub fn to_request(&self) -> Result<Request> {
    let method = Method::from_bytes(self.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}' on action {}: {}", self.method, self.id, e))?;

    let mut request =
      Request::new(method, self.url.clone()).with_header("Idempotency-Key", self.id.clone());

    if let Some(payload) = &self.payload {
      let body = serde_json::to_vec(payload)
        .map_err(|e| eyre!("Failed to serialize payload of action {}: {}", self.id, e))?;
      request = request
        .with_header("Content-Type", "application/json")
        .with_body(body);
    }

    Ok(request)
  }
}

/// SQLite-backed FIFO of pending actions.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

impl SqliteQueue {
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

  pub fn push(&self, action: &PendingAction) -> Result<()> {
    let conn = self.lock()?;
    let payload: Option<String> = action
      .payload
      .as_ref()
      .map(serde_json::to_string)
      .transpose()
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_actions
           (id, kind, method, url, payload, attempts, max_attempts, last_error, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          action.id,
          action.kind,
          action.method,
          action.url.as_str(),
          payload,
          action.attempts,
          action.max_attempts,
          action.last_error,
          action.created_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to queue action {}: {}", action.id, e))?;

    Ok(())
  }

  /// All pending actions, oldest first.
  pub fn pending(&self) -> Result<Vec<PendingAction>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, kind, method, url, payload, attempts, max_attempts, last_error, created_at
         FROM pending_actions ORDER BY seq",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok(ActionRow {
          id: row.get(0)?,
          kind: row.get(1)?,
          method: row.get(2)?,
          url: row.get(3)?,
          payload: row.get(4)?,
          attempts: row.get(5)?,
          max_attempts: row.get(6)?,
          last_error: row.get(7)?,
          created_at: row.get(8)?,
        })
      })
      .map_err(|e| eyre!("Failed to query pending actions: {}", e))?
      .collect::<rusqlite::Result<Vec<ActionRow>>>()
      .map_err(|e| eyre!("Failed to read pending action: {}", e))?;

    rows.into_iter().map(ActionRow::into_action).collect()
  }

  /// Remove an action. Returns false if it was already gone.
  pub fn remove(&self, id: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute("DELETE FROM pending_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove action {}: {}", id, e))?;
    Ok(removed > 0)
  }

  /// Count a failed send. Returns the new attempt count.
  pub fn record_failure(&self, id: &str, error: &str) -> Result<u32> {
    let conn = self.lock()?;

    conn
      .execute(
        "UPDATE pending_actions SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        params![error, id],
      )
      .map_err(|e| eyre!("Failed to record failure of action {}: {}", id, e))?;

    let attempts: Option<u32> = conn
      .query_row(
        "SELECT attempts FROM pending_actions WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read attempts of action {}: {}", id, e))?;

    attempts.ok_or_else(|| eyre!("Action {} is not queued", id))
  }

  pub fn clear(&self) -> Result<usize> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM pending_actions", [])
      .map_err(|e| eyre!("Failed to clear pending actions: {}", e))
  }

  pub fn len(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_actions", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending actions: {}", e))?;
    Ok(count as usize)
  }
}

struct ActionRow {
  id: String,
  kind: String,
  method: String,
  url: String,
  payload: Option<String>,
  attempts: u32,
  max_attempts: u32,
  last_error: Option<String>,
  created_at: String,
}

impl ActionRow {
  fn into_action(self) -> Result<PendingAction> {
    let url = Url::parse(&self.url)
      .map_err(|e| eyre!("Invalid url '{}' on action {}: {}", self.url, self.id, e))?;
    let payload: Option<serde_json::Value> = self
      .payload
      .as_deref()
      .map(serde_json::from_str)
      .transpose()
      .map_err(|e| eyre!("Failed to parse payload of action {}: {}", self.id, e))?;
    let created_at = DateTime::parse_from_rfc3339(&self.created_at)
      .map_err(|e| eyre!("Invalid timestamp on action {}: {}", self.id, e))?
      .with_timezone(&Utc);

    Ok(PendingAction {
      id: self.id,
      kind: self.kind,
      method: self.method,
      url,
      payload,
      attempts: self.attempts,
      max_attempts: self.max_attempts,
      created_at,
      last_error: self.last_error,
    })
  }
}
