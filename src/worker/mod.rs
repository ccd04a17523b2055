//! The offline cache worker.
//!
//! One `Worker` exists per cache version. It owns the lifecycle state
//! machine, routes intercepted requests to the matching caching strategy,
//! and answers sync, push and notification-click events.

mod classify;
mod clients;
mod lifecycle;
mod notification;

pub use classify::{Classifier, RequestClass};
#[cfg(test)]
pub use clients::ClientRegistry;
pub use clients::{BrowserClients, Clients, WindowOutcome};
pub use lifecycle::{Lifecycle, WorkerState};
pub use notification::{Notification, Notifier, TerminalNotifier, ACTION_OPEN};

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

use crate::cache::{CacheLayer, CacheResult, CacheStorage};
use crate::config::{Config, NotificationConfig};
use crate::net::{FetchError, Fetcher, Request, Response};
use crate::sync::{SqliteQueue, SyncManager, SyncReport};

/// Path opened when the user picks "open" on a notification
const ROOT_PATH: &str = "/";

/// Shared collaborators a worker is built from.
#[derive(Clone)]
pub struct WorkerParts {
  pub storage: Arc<dyn CacheStorage>,
  pub network: Arc<dyn Fetcher>,
  pub clients: Arc<dyn Clients>,
  pub notifier: Arc<dyn Notifier>,
  pub queue: Arc<SqliteQueue>,
}

/// Offline cache worker. Clone is cheap; clones share state.
#[derive(Clone)]
pub struct Worker {
  inner: Arc<Inner>,
}

struct Inner {
  precache: Vec<Url>,
  classifier: Classifier,
  cache: CacheLayer,
  network: Arc<dyn Fetcher>,
  clients: Arc<dyn Clients>,
  notifier: Arc<dyn Notifier>,
  sync: SyncManager,
  notifications: NotificationConfig,
  timeout: Option<Duration>,
  lifecycle: Mutex<Lifecycle>,
}

impl Worker {
  pub fn new(config: &Config, parts: WorkerParts) -> Result<Self> {
    let precache = config
      .cache
      .precache
      .iter()
      .map(|path| {
        config
          .app_url
          .join(path)
          .map_err(|e| eyre!("Invalid precache path '{}': {}", path, e))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      inner: Arc::new(Inner {
        precache,
        classifier: Classifier::new(&config.backend_url, &config.api_prefix),
        cache: CacheLayer::new(parts.storage, config.cache.store_name()),
        network: parts.network,
        clients: parts.clients,
        notifier: parts.notifier,
        sync: SyncManager::new(parts.queue, &config.sync),
        notifications: config.notifications.clone(),
        timeout: config.network.timeout(),
        lifecycle: Mutex::new(Lifecycle::new()),
      }),
    })
  }

  pub fn state(&self) -> WorkerState {
    self
      .inner
      .lifecycle
      .lock()
      .map(|l| l.state())
      .unwrap_or(WorkerState::Terminated)
  }

  /// Version-qualified name of this worker's cache store
  pub fn store_name(&self) -> &str {
    self.inner.cache.store_name()
  }

  #[cfg(test)]
  pub fn sync_manager(&self) -> &SyncManager {
    &self.inner.sync
  }

  fn transition(&self, next: WorkerState) -> Result<()> {
    let mut lifecycle = self
      .inner
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let previous = lifecycle.transition(next)?;

    info!(store = %self.store_name(), from = %previous, to = %next, "Worker state changed");
    if next == WorkerState::Terminated {
      debug!(store = %self.store_name(), path = ?lifecycle.history(), "Worker terminated");
    }
    Ok(())
  }

  /// Live fetch, bounded by the configured deadline if there is one.
  async fn fetch_network(&self, request: &Request) -> Result<Response, FetchError> {
    match self.inner.timeout {
      Some(limit) => tokio::time::timeout(limit, self.inner.network.fetch(request))
        .await
        .map_err(|_| FetchError::Timeout(limit))?,
      None => self.inner.network.fetch(request).await,
    }
  }

  /// Install: precache the asset manifest into a fresh store.
  ///
  /// All-or-nothing: a single failed asset leaves no store behind and
  /// terminates the worker.
  pub async fn install(&self) -> Result<()> {
    self.transition(WorkerState::Installing)?;

    let requests: Vec<Request> = self
      .inner
      .precache
      .iter()
      .cloned()
      .map(Request::get)
      .collect();

    let result = self
      .inner
      .cache
      .precache(requests, |request| {
        let worker = self.clone();
        async move { worker.fetch_network(&request).await }
      })
      .await;

    match result {
      Ok(count) => {
        info!(store = %self.store_name(), assets = count, "Install complete");
        // Skip waiting: go straight on to activation
        self.transition(WorkerState::Waiting)
      }
      Err(e) => {
        error!(store = %self.store_name(), error = %e, "Install failed");
        self.transition(WorkerState::Terminated)?;
        Err(e.wrap_err("Install failed"))
      }
    }
  }

  /// Activate: delete every stale store, then claim open clients.
  /// Returns the names of the deleted stores.
  pub async fn activate(&self) -> Result<Vec<String>> {
    self.transition(WorkerState::Activating)?;
    self.finish_activation()
  }

  /// Prune and claim from Activating; any failure terminates the worker.
  fn finish_activation(&self) -> Result<Vec<String>> {
    match self.prune_and_claim() {
      Ok(deleted) => {
        self.transition(WorkerState::Active)?;
        Ok(deleted)
      }
      Err(e) => {
        error!(store = %self.store_name(), error = %e, "Activation failed");
        self.transition(WorkerState::Terminated)?;
        Err(e.wrap_err("Activation failed"))
      }
    }
  }

  fn prune_and_claim(&self) -> Result<Vec<String>> {
    let storage = self.inner.cache.storage();
    let mut deleted = Vec::new();

    for name in storage.store_names()? {
      if name != self.store_name() && storage.delete_store(&name)? {
        info!(store = %name, "Deleted stale cache store");
        deleted.push(name);
      }
    }

    self.inner.clients.claim(self.store_name())?;
    Ok(deleted)
  }

  /// Bring the worker up: resume on top of an existing store, or install
  /// and activate when there is none.
  pub async fn start(&self) -> Result<()> {
    let installed = self.inner.cache.storage().has_store(self.store_name())?;

    if self.state() == WorkerState::Parsed && installed {
      debug!(store = %self.store_name(), "Resuming installed worker");
      self.transition(WorkerState::Activating)?;
      return self.finish_activation().map(|_| ());
    }

    self.install().await?;
    self.activate().await?;
    Ok(())
  }

  /// Hand over to a newer worker.
  pub fn retire(&self) -> Result<()> {
    self.transition(WorkerState::Superseded)?;
    self.transition(WorkerState::Terminated)
  }

  /// Answer an intercepted request.
  pub async fn handle_fetch(&self, request: Request) -> Result<CacheResult<Response>, FetchError> {
    if self.state() != WorkerState::Active {
      debug!(url = %request.url, state = %self.state(), "Worker not active, passing through");
      return self
        .fetch_network(&request)
        .await
        .map(CacheResult::from_network);
    }

    let class = self.inner.classifier.classify(&request.url);
    debug!(method = %request.method, url = %request.url, ?class, "Intercepted request");

    // Mutating calls are never cached nor served from cache
    if !request.is_get() {
      return self
        .fetch_network(&request)
        .await
        .map(CacheResult::from_network);
    }

    match class {
      RequestClass::Api => {
        self
          .inner
          .cache
          .network_first(&request, || self.fetch_network(&request))
          .await
      }
      RequestClass::Static => {
        self
          .inner
          .cache
          .cache_first(&request, || self.fetch_network(&request))
          .await
      }
    }
  }

  /// Answer a sync trigger. Unknown tags are acknowledged without work.
  pub async fn handle_sync(&self, tag: &str) -> Result<SyncReport> {
    if tag != self.inner.sync.tag() {
      debug!(%tag, "Ignoring unknown sync tag");
      return Ok(SyncReport::default());
    }

    info!(%tag, "Syncing pending actions");
    self
      .inner
      .sync
      .replay(|request| {
        let worker = self.clone();
        async move { worker.fetch_network(&request).await }
      })
      .await
  }

  /// Show the status notification for a push event.
  pub fn handle_push(&self, payload: Option<&str>) -> Result<Notification> {
    let notification = Notification::from_push(&self.inner.notifications, payload);
    self.inner.notifier.show(&notification)?;
    Ok(notification)
  }

  /// Close the clicked notification; only the "open" action navigates.
  pub fn handle_notification_click(
    &self,
    tag: &str,
    action: Option<&str>,
  ) -> Result<Option<WindowOutcome>> {
    self.inner.notifier.close(tag)?;

    if action != Some(ACTION_OPEN) {
      return Ok(None);
    }

    let outcome = self.inner.clients.focus_or_open(ROOT_PATH)?;
    Ok(Some(outcome))
  }
}
