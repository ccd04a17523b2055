use crate::cache::{CacheSource, CacheStorage, SqliteStorage};
use crate::commands::{parse_header, parse_method, resolve_url, Command, QueueCommand};
use crate::config::Config;
use crate::db::Database;
use crate::event::{Dispatcher, EventHandler, SyncRetryPolicy, WorkerHandle};
use crate::net::{HttpClient, Request};
use crate::sync::{SqliteQueue, SyncManager};
use crate::worker::{BrowserClients, TerminalNotifier, WindowOutcome, Worker, WorkerParts};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::warn;

/// Wires the worker to its storage, network and UI collaborators and runs
/// one command against it.
pub struct App {
  /// Application configuration
  config: Config,

  /// Collaborators shared by every worker version
  parts: WorkerParts,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db_path = config.database_path()?;

    let storage = Arc::new(SqliteStorage::new(Database::open(&db_path)?));
    let queue = Arc::new(SqliteQueue::new(Database::open(&db_path)?));
    let network = Arc::new(HttpClient::new(&config)?);

    Ok(Self {
      parts: WorkerParts {
        storage,
        network,
        clients: Arc::new(BrowserClients::new(config.app_url.clone())),
        notifier: Arc::new(TerminalNotifier),
        queue,
      },
      config,
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    if command.needs_worker() {
      return self.run_worker(command).await;
    }

    match command {
      Command::Queue(queue_command) => self.run_queue(queue_command),
      _ => self.status(),
    }
  }

  /// Run a command through a dispatcher, then shut the dispatcher down.
  async fn run_worker(&self, command: Command) -> Result<()> {
    let worker = Worker::new(&self.config, self.parts.clone())?;
    let events = EventHandler::new();
    let handle = events.handle();

    let dispatcher = Dispatcher::new(worker, SyncRetryPolicy::from(&self.config.sync));
    let task = tokio::spawn(dispatcher.run(events));

    let result = self.execute(&handle, command).await;

    drop(handle);
    task
      .await
      .map_err(|e| eyre!("Dispatcher task failed: {}", e))??;

    result
  }

  async fn execute(&self, handle: &WorkerHandle, command: Command) -> Result<()> {
    match command {
      Command::Install => {
        handle.start().await?;
        println!("Installed {}", self.config.cache.store_name());
      }
      Command::Upgrade { to } => {
        handle.start().await?;

        let mut config = self.config.clone();
        config.cache.version = to;
        let next = Worker::new(&config, self.parts.clone())?;
        let deleted = handle.update(next).await?;

        println!("Activated {}", config.cache.store_name());
        for name in deleted {
          println!("  deleted {}", name);
        }
      }
      Command::Fetch {
        url,
        method,
        headers,
        data,
      } => {
        // Without a store the worker stays inactive and requests pass through
        if let Err(e) = handle.start().await {
          warn!(error = %e, "Worker did not start, passing requests through");
        }

        let mut request = Request::new(
          parse_method(&method)?,
          resolve_url(&self.config.app_url, &url)?,
        );
        for header in &headers {
          let (name, value) = parse_header(header)?;
          request = request.with_header(name, value);
        }
        if let Some(data) = data {
          request = request.with_body(data);
        }

        let result = handle.fetch(request).await?;
        let source = match (result.source, result.cached_at) {
          (CacheSource::Network, _) | (_, None) => result.source.as_str().to_string(),
          (source, Some(at)) => format!("{}, stored {}", source.as_str(), at.to_rfc3339()),
        };

        println!(
          "{} {} ({})",
          result.data.status, result.data.status_text, source
        );
        println!("{}", result.data.text());
      }
      Command::Sync { tag } => {
        handle.start().await?;

        let tag = tag.unwrap_or_else(|| self.config.sync.tag.clone());
        let report = handle.sync(&tag).await?;
        println!(
          "sent {}, rejected {}, dropped {}, remaining {}",
          report.sent, report.rejected, report.dropped, report.remaining
        );
      }
      Command::Push { payload } => {
        handle.push(payload).await?;
      }
      Command::Click { action } => {
        let outcome = handle
          .notification_click(&self.config.notifications.tag, action)
          .await?;
        match outcome {
          Some(WindowOutcome::Focused) => println!("Focused dashboard"),
          Some(WindowOutcome::Opened) => println!("Opened dashboard"),
          None => println!("Notification closed"),
        }
      }
      Command::Status | Command::Queue(_) => {
        return Err(eyre!("{:?} does not run through the worker", command));
      }
    }

    Ok(())
  }

  fn status(&self) -> Result<()> {
    let current = self.config.cache.store_name();
    let names = self.parts.storage.store_names()?;

    println!("Current version: {}", current);
    if names.is_empty() {
      println!("No cache stores installed");
    }
    for name in &names {
      let marker = if *name == current { "*" } else { " " };
      let entries = self.parts.storage.entry_count(name)?;
      println!("{} {} ({} entries)", marker, name, entries);
    }

    println!("Pending actions: {}", self.parts.queue.len()?);
    Ok(())
  }

  fn run_queue(&self, command: QueueCommand) -> Result<()> {
    let manager = SyncManager::new(self.parts.queue.clone(), &self.config.sync);

    match command {
      QueueCommand::Add {
        kind,
        url,
        method,
        payload,
      } => {
        let payload: Option<serde_json::Value> = payload
          .map(|p| serde_json::from_str(&p))
          .transpose()
          .map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;
        let url = resolve_url(&self.config.backend_url, &url)?;

        let action = manager.enqueue(&kind, parse_method(&method)?, url, payload)?;
        println!("Queued {} ({})", action.id, action.kind);
      }
      QueueCommand::List { json } => {
        let actions = manager.queue().pending()?;

        if json {
          let out = serde_json::to_string_pretty(&actions)
            .map_err(|e| eyre!("Failed to serialize actions: {}", e))?;
          println!("{}", out);
          return Ok(());
        }

        if actions.is_empty() {
          println!("No pending actions");
        }
        for action in &actions {
          let error = action.last_error.as_deref().unwrap_or("-");
          println!(
            "{}  {:<16} {:<6} {}  attempts {}/{}  {}",
            action.created_at.format("%Y-%m-%d %H:%M:%S"),
            action.kind,
            action.method,
            action.url,
            action.attempts,
            action.max_attempts,
            error
          );
        }
      }
      QueueCommand::Clear => {
        let removed = manager.queue().clear()?;
        println!("Removed {} pending action(s)", removed);
      }
    }

    Ok(())
  }
}
