use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::CacheResult;
use crate::config::SyncConfig;
use crate::net::{FetchError, Request, Response};
use crate::sync::SyncReport;
use crate::worker::{Notification, WindowOutcome, Worker};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Events delivered to the active worker
pub enum Event {
  /// Install and activate, or resume on an installed store
  Start { reply: Reply<()> },
  /// Replace the active worker with a newer version
  Update {
    worker: Worker,
    reply: Reply<Vec<String>>,
  },
  /// Intercepted request
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<CacheResult<Response>, FetchError>>,
  },
  /// Background sync trigger
  Sync { tag: String, reply: Reply<SyncReport> },
  /// Push message, with its text payload if any
  Push {
    payload: Option<String>,
    reply: Reply<Notification>,
  },
  /// Click on a shown notification, with the chosen action if any
  NotificationClick {
    tag: String,
    action: Option<String>,
    reply: Reply<Option<WindowOutcome>>,
  },
}

/// Channel the dispatcher reads events from
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Get a handle that sends events into this handler
  pub fn handle(&self) -> WorkerHandle {
    WorkerHandle {
      tx: self.tx.clone(),
    }
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

/// Cloneable front door to the dispatcher.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<Event>,
}

impl WorkerHandle {
  async fn request<T>(&self, event: impl FnOnce(Reply<T>) -> Event) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(event(reply))
      .map_err(|_| eyre!("Dispatcher stopped"))?;
    rx.await.map_err(|_| eyre!("Dispatcher dropped the event"))?
  }

  pub async fn start(&self) -> Result<()> {
    self.request(|reply| Event::Start { reply }).await
  }

  /// Returns the cache stores the new worker deleted
  pub async fn update(&self, worker: Worker) -> Result<Vec<String>> {
    self.request(|reply| Event::Update { worker, reply }).await
  }

  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Event::Fetch { request, reply })
      .map_err(|_| eyre!("Dispatcher stopped"))?;
    let result = rx
      .await
      .map_err(|_| eyre!("Dispatcher dropped the event"))?;
    Ok(result?)
  }

  pub async fn sync(&self, tag: &str) -> Result<SyncReport> {
    let tag = tag.to_string();
    self.request(|reply| Event::Sync { tag, reply }).await
  }

  pub async fn push(&self, payload: Option<String>) -> Result<Notification> {
    self.request(|reply| Event::Push { payload, reply }).await
  }

  pub async fn notification_click(
    &self,
    tag: &str,
    action: Option<String>,
  ) -> Result<Option<WindowOutcome>> {
    let tag = tag.to_string();
    self
      .request(|reply| Event::NotificationClick { tag, action, reply })
      .await
  }
}

/// How often a failing sync is re-fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRetryPolicy {
  pub max_retries: u32,
  pub delay: Duration,
}

impl From<&SyncConfig> for SyncRetryPolicy {
  fn from(config: &SyncConfig) -> Self {
    Self {
      max_retries: config.max_retries,
      delay: Duration::from_secs(config.retry_delay_secs),
    }
  }
}

/// Delivers events to the active worker.
///
/// Updates are handled in line so every later event reaches the new worker.
/// Everything else runs on its own task, so a slow fetch never holds up the
/// queue.
pub struct Dispatcher {
  worker: Worker,
  retry: SyncRetryPolicy,
}

impl Dispatcher {
  pub fn new(worker: Worker, retry: SyncRetryPolicy) -> Self {
    Self { worker, retry }
  }

  /// Run until every `WorkerHandle` is dropped, then wait for in-flight
  /// events to finish.
  pub async fn run(mut self, events: EventHandler) -> Result<()> {
    let EventHandler { tx, mut rx } = events;
    drop(tx);

    let mut tasks = JoinSet::new();

    while let Some(event) = rx.recv().await {
      match event {
        Event::Update { worker, reply } => {
          let _ = reply.send(self.update(worker).await);
        }
        event => {
          let worker = self.worker.clone();
          let retry = self.retry;
          tasks.spawn(async move { dispatch(worker, retry, event).await });
        }
      }
    }

    while let Some(joined) = tasks.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "Event task panicked");
      }
    }

    debug!("Dispatcher stopped");
    Ok(())
  }

  async fn update(&mut self, next: Worker) -> Result<Vec<String>> {
    if next.store_name() == self.worker.store_name() {
      return Err(eyre!("Version {} is already running", next.store_name()));
    }

    info!(from = %self.worker.store_name(), to = %next.store_name(), "Updating worker");

    next.install().await?;
    let deleted = next.activate().await?;

    if let Err(e) = self.worker.retire() {
      warn!(store = %self.worker.store_name(), error = %e, "Failed to retire old worker");
    }
    self.worker = next;

    Ok(deleted)
  }
}

async fn dispatch(worker: Worker, retry: SyncRetryPolicy, event: Event) {
  match event {
    Event::Start { reply } => {
      let _ = reply.send(worker.start().await);
    }
    Event::Fetch { request, reply } => {
      let _ = reply.send(worker.handle_fetch(request).await);
    }
    Event::Sync { tag, reply } => {
      let _ = reply.send(sync_with_retry(&worker, &tag, retry).await);
    }
    Event::Push { payload, reply } => {
      let _ = reply.send(worker.handle_push(payload.as_deref()));
    }
    Event::NotificationClick { tag, action, reply } => {
      let _ = reply.send(worker.handle_notification_click(&tag, action.as_deref()));
    }
    Event::Update { reply, .. } => {
      let _ = reply.send(Err(eyre!("Updates must go through the dispatcher")));
    }
  }
}

/// Re-fire a failing sync until it succeeds or the retries run out.
async fn sync_with_retry(
  worker: &Worker,
  tag: &str,
  retry: SyncRetryPolicy,
) -> Result<SyncReport> {
  let mut attempt = 0;

  loop {
    match worker.handle_sync(tag).await {
      Ok(report) => return Ok(report),
      Err(e) if attempt < retry.max_retries => {
        attempt += 1;
        warn!(%tag, attempt, error = %e, "Sync failed, retrying");
        tokio::time::sleep(retry.delay).await;
      }
      Err(e) => {
        error!(%tag, attempts = attempt + 1, error = %e, "Sync failed, giving up");
        return Err(e.wrap_err(format!("Sync '{}' failed", tag)));
      }
    }
  }
}
