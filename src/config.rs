use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the dashboard is served from; precache paths resolve against it
  pub app_url: Url,
  /// Backend REST API origin
  pub backend_url: Url,
  /// Path prefix reserved for backend API calls
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub prefix: String,
  pub version: String,
  /// Database location (default: $XDG_DATA_HOME/panelcache/cache.db)
  pub path: Option<PathBuf>,
  /// Static assets fetched at install time
  pub precache: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "twitter-bot".to_string(),
      version: "1.2.0".to_string(),
      path: None,
      precache: vec![
        "/".to_string(),
        "/static/js/bundle.js".to_string(),
        "/static/css/main.css".to_string(),
        "/manifest.json".to_string(),
      ],
    }
  }
}

impl CacheConfig {
  /// Version-qualified store name, e.g. "twitter-bot-v1.2.0"
  pub fn store_name(&self) -> String {
    format!("{}-v{}", self.prefix, self.version)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Deadline for a single live fetch; unset means no deadline
  pub timeout_secs: Option<u64>,
}

impl NetworkConfig {
  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_secs.map(Duration::from_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push arrives without payload
  pub default_body: String,
  pub icon: String,
  pub tag: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Twitter Engagement Bot".to_string(),
      default_body: "Twitter Bot Status Update".to_string(),
      icon: "/icon-192x192.png".to_string(),
      tag: "twitter-bot-notification".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Sync trigger that replays the pending action queue
  pub tag: String,
  /// Failed sends before an action is dropped
  pub max_attempts: u32,
  /// Times a failing sync is re-fired before giving up
  pub max_retries: u32,
  pub retry_delay_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "bot-action-sync".to_string(),
      max_attempts: 5,
      max_retries: 3,
      retry_delay_secs: 30,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./panelcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/panelcache/config.yaml
  ///
  /// `PANELCACHE_BACKEND_URL` overrides `backend_url` from the file.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/panelcache/config.yaml\n\
                 See config.example.yaml for the format."
        ))
      }
    };

    if let Ok(backend) = std::env::var("PANELCACHE_BACKEND_URL") {
      config.backend_url = Url::parse(&backend)
        .map_err(|e| eyre!("Invalid PANELCACHE_BACKEND_URL '{}': {}", backend, e))?;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("panelcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("panelcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;

    if !config.api_prefix.starts_with('/') {
      return Err(eyre!(
        "api_prefix must start with '/', got '{}'",
        config.api_prefix
      ));
    }

    Ok(config)
  }

  /// Get the database path, defaulting to the user's data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("panelcache").join("cache.db"))
  }
}
