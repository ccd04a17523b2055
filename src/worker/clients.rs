//! Dashboard windows the worker can control.

use color_eyre::{eyre::eyre, Result};
#[cfg(test)]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(test)]
use std::sync::MutexGuard;
use std::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// What happened when a window was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
  /// An open window already showed the path and was focused
  #[cfg_attr(not(test), allow(dead_code))]
  Focused,
  /// A new window was opened
  Opened,
}

/// Open pages the worker controls.
pub trait Clients: Send + Sync {
  /// Take control of every open page. Returns how many were claimed.
  fn claim(&self, controller: &str) -> Result<usize>;

  /// Focus a window showing `path`, opening one if none does.
  fn focus_or_open(&self, path: &str) -> Result<WindowOutcome>;
}

/// Dashboard pages in the host's default browser.
///
/// The browser owns its tabs, so an open request always launches a new one.
pub struct BrowserClients {
  app_url: Url,
  controller: Mutex<Option<String>>,
}

impl BrowserClients {
  pub fn new(app_url: Url) -> Self {
    Self {
      app_url,
      controller: Mutex::new(None),
    }
  }

  fn target(&self, path: &str) -> Result<Url> {
    self
      .app_url
      .join(path)
      .map_err(|e| eyre!("Invalid dashboard path '{}': {}", path, e))
  }
}

impl Clients for BrowserClients {
  fn claim(&self, controller: &str) -> Result<usize> {
    *self
      .controller
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = Some(controller.to_string());

    info!(%controller, "Controlling dashboard pages");
    Ok(0)
  }

  fn focus_or_open(&self, path: &str) -> Result<WindowOutcome> {
    let url = self.target(path)?;
    let controller = self
      .controller
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .clone();
    open::that_detached(url.as_str())
      .map_err(|e| eyre!("Failed to open {} in a browser: {}", url, e))?;

    debug!(%url, ?controller, "Opened dashboard in browser");
    Ok(WindowOutcome::Opened)
  }
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: u64,
  pub path: String,
  pub focused: bool,
  /// Cache store of the worker controlling this window
  pub controller: Option<String>,
}

/// In-process registry of dashboard windows.
#[cfg(test)]
#[derive(Default)]
pub struct ClientRegistry {
  windows: Mutex<Vec<ClientWindow>>,
  controller: Mutex<Option<String>>,
  next_id: AtomicU64,
}

#[cfg(test)]
impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn windows_lock(&self) -> Result<MutexGuard<'_, Vec<ClientWindow>>> {
    self
      .windows
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Register a page that was already open. It stays uncontrolled until the
  /// next claim.
  pub fn connect(&self, path: &str) -> Result<u64> {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    self.windows_lock()?.push(ClientWindow {
      id,
      path: path.to_string(),
      focused: false,
      controller: None,
    });
    Ok(id)
  }

  pub fn windows(&self) -> Result<Vec<ClientWindow>> {
    Ok(self.windows_lock()?.clone())
  }
}

#[cfg(test)]
impl Clients for ClientRegistry {
  fn claim(&self, controller: &str) -> Result<usize> {
    *self
      .controller
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = Some(controller.to_string());

    let mut windows = self.windows_lock()?;
    for window in windows.iter_mut() {
      window.controller = Some(controller.to_string());
    }

    info!(%controller, count = windows.len(), "Claimed clients");
    Ok(windows.len())
  }

  fn focus_or_open(&self, path: &str) -> Result<WindowOutcome> {
    let controller = self
      .controller
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .clone();
    let mut windows = self.windows_lock()?;

    let existing = windows.iter().position(|w| w.path == path);
    for window in windows.iter_mut() {
      window.focused = false;
    }

    match existing {
      Some(index) => {
        windows[index].focused = true;
        debug!(%path, id = windows[index].id, "Focused existing window");
        Ok(WindowOutcome::Focused)
      }
      None => {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        windows.push(ClientWindow {
          id,
          path: path.to_string(),
          focused: true,
          controller,
        });
        debug!(%path, id, "Opened window");
        Ok(WindowOutcome::Opened)
      }
    }
  }
}
