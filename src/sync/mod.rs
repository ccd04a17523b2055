//! Deferred synchronization of actions recorded while offline.
//!
//! Actions are queued in SQLite and replayed oldest first when the sync
//! trigger fires. A send that fails transiently stops the replay so later
//! actions never overtake earlier ones; the trigger is expected to fire again.

mod queue;

pub use queue::{PendingAction, SqliteQueue};

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::net::{FetchError, Request, Response};

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Accepted by the backend
  pub sent: usize,
  /// Refused with a 4xx, removed without retry
  pub rejected: usize,
  /// Removed after exhausting their attempts
  pub dropped: usize,
  /// Still queued after the pass
  pub remaining: usize,
}

pub struct SyncManager {
  queue: Arc<SqliteQueue>,
  tag: String,
  max_attempts: u32,
}

impl SyncManager {
  pub fn new(queue: Arc<SqliteQueue>, config: &SyncConfig) -> Self {
    Self {
      queue,
      tag: config.tag.clone(),
      max_attempts: config.max_attempts.max(1),
    }
  }

  /// The sync trigger this manager answers to.
  pub fn tag(&self) -> &str {
    &self.tag
  }

  pub fn queue(&self) -> &SqliteQueue {
    &self.queue
  }

  /// Record an action for the next replay.
  pub fn enqueue(
    &self,
    kind: &str,
    method: Method,
    url: Url,
    payload: Option<serde_json::Value>,
  ) -> Result<PendingAction> {
    let action = PendingAction::new(kind, method, url, payload, self.max_attempts);
    self.queue.push(&action)?;
    info!(id = %action.id, kind = %action.kind, "Queued offline action");
    Ok(action)
  }

  /// Send queued actions in order.
  ///
  /// - 2xx: removed
  /// - 4xx other than 408/429: removed as rejected
  /// - anything else: attempt recorded; the action is dropped once it runs
  ///   out of attempts, otherwise replay stops with an error
  pub async fn replay<F, Fut>(&self, send: F) -> Result<SyncReport>
  where
    F: Fn(Request) -> Fut,
    Fut: Future<Output = Result<Response, FetchError>>,
  {
    let mut report = SyncReport::default();
    let actions = self.queue.pending()?;

    for action in &actions {
      let request = action.to_request()?;

      let failure = match send(request).await {
        Ok(response) if response.is_ok() => {
          self.queue.remove(&action.id)?;
          report.sent += 1;
          continue;
        }
        Ok(response) if is_rejection(response.status) => {
          warn!(
            id = %action.id,
            kind = %action.kind,
            status = response.status,
            "Backend rejected queued action, discarding"
          );
          self.queue.remove(&action.id)?;
          report.rejected += 1;
          continue;
        }
        Ok(response) => format!("backend responded with status {}", response.status),
        Err(e) => e.to_string(),
      };

      let attempts = self.queue.record_failure(&action.id, &failure)?;
      if attempts >= action.max_attempts {
        warn!(
          id = %action.id,
          kind = %action.kind,
          attempts,
          error = %failure,
          "Dropping queued action after final attempt"
        );
        self.queue.remove(&action.id)?;
        report.dropped += 1;
        continue;
      }

      let remaining = self.queue.len()?;
      return Err(eyre!(
        "Sync stopped at action {} ({}): {}; {} action(s) still pending",
        action.id,
        action.kind,
        failure,
        remaining
      ));
    }

    report.remaining = self.queue.len()?;
    info!(
      sent = report.sent,
      rejected = report.rejected,
      dropped = report.dropped,
      remaining = report.remaining,
      "Sync complete"
    );
    Ok(report)
  }
}

/// Client errors that retrying cannot fix
fn is_rejection(status: u16) -> bool {
  (400..500).contains(&status) && status != 408 && status != 429
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::net::testing::StubNetwork;
  use crate::net::Fetcher;
  use serde_json::json;

  fn manager(max_attempts: u32) -> SyncManager {
    let queue = SqliteQueue::new(Database::open_in_memory().unwrap());
    let config = SyncConfig {
      max_attempts,
      ..SyncConfig::default()
    };
    SyncManager::new(Arc::new(queue), &config)
  }

  fn backend(path: &str) -> Url {
    Url::parse("https://bot.example.com").unwrap().join(path).unwrap()
  }

  async fn replay(manager: &SyncManager, network: &StubNetwork) -> Result<SyncReport> {
    manager
      .replay(|request| async move { network.fetch(&request).await })
      .await
  }

  #[tokio::test]
  async fn test_empty_queue_is_a_successful_noop() {
    let manager = manager(3);
    let network = StubNetwork::new();

    let report = replay(&manager, &network).await.unwrap();

    assert_eq!(report, SyncReport::default());
    assert_eq!(network.calls(), 0);
  }

  #[tokio::test]
  async fn test_sent_actions_are_removed_in_order() {
    let manager = manager(3);
    let network = StubNetwork::new();
    let start = backend("/api/bot/start");
    let comment = backend("/api/comments");
    network.route(Method::POST, start.as_str(), Response::new(start.clone(), 200, "{}"));
    network.route(Method::POST, comment.as_str(), Response::new(comment.clone(), 200, "{}"));

    manager.enqueue("bot-start", Method::POST, start, None).unwrap();
    manager
      .enqueue("add-comment", Method::POST, comment, Some(json!({"text": "wow"})))
      .unwrap();

    let report = replay(&manager, &network).await.unwrap();

    assert_eq!(report.sent, 2);
    assert_eq!(report.remaining, 0);
    let paths: Vec<String> = network
      .requests()
      .iter()
      .map(|r| r.url.path().to_string())
      .collect();
    assert_eq!(paths, vec!["/api/bot/start", "/api/comments"]);

    // A second trigger finds nothing left to send
    let again = replay(&manager, &network).await.unwrap();
    assert_eq!(again.sent, 0);
    assert_eq!(network.calls(), 2);
  }

  #[tokio::test]
  async fn test_transient_failure_stops_replay_and_keeps_order() {
    let manager = manager(3);
    let network = StubNetwork::new();
    let start = backend("/api/bot/start");
    let stop = backend("/api/bot/stop");
    network.fail(start.as_str());
    network.route(Method::POST, stop.as_str(), Response::new(stop.clone(), 200, "{}"));

    manager.enqueue("bot-start", Method::POST, start, None).unwrap();
    manager.enqueue("bot-stop", Method::POST, stop, None).unwrap();

    assert!(replay(&manager, &network).await.is_err());

    // The later action was never attempted
    assert_eq!(network.calls(), 1);
    let pending = manager.queue().pending().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].attempts, 1);
    assert!(pending[0].last_error.is_some());
  }

  #[tokio::test]
  async fn test_exhausted_action_is_dropped() {
    let manager = manager(2);
    let network = StubNetwork::new();
    let start = backend("/api/bot/start");
    network.fail(start.as_str());
    manager.enqueue("bot-start", Method::POST, start, None).unwrap();

    assert!(replay(&manager, &network).await.is_err());
    let report = replay(&manager, &network).await.unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(manager.queue().len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_client_error_is_rejected_not_retried() {
    let manager = manager(3);
    let network = StubNetwork::new();
    let delete = backend("/api/comments/missing");
    network.route(Method::DELETE, delete.as_str(), Response::new(delete.clone(), 404, ""));
    manager.enqueue("delete-comment", Method::DELETE, delete, None).unwrap();

    let report = replay(&manager, &network).await.unwrap();

    assert_eq!(report.rejected, 1);
    assert_eq!(manager.queue().len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_server_error_counts_as_transient() {
    let manager = manager(3);
    let network = StubNetwork::new();
    let settings = backend("/api/settings");
    network.route(Method::PUT, settings.as_str(), Response::new(settings.clone(), 503, ""));
    manager.enqueue("update-settings", Method::PUT, settings, None).unwrap();

    assert!(replay(&manager, &network).await.is_err());
    assert_eq!(manager.queue().pending().unwrap()[0].attempts, 1);
  }

  #[test]
  fn test_rejection_statuses() {
    assert!(is_rejection(400));
    assert!(is_rejection(404));
    assert!(!is_rejection(408));
    assert!(!is_rejection(429));
    assert!(!is_rejection(500));
    assert!(!is_rejection(200));
  }
}
