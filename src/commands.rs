//! Command line subcommands and their argument parsing.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::{ParseError, Url};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Install the configured cache version, or resume it if already installed
  Install,
  /// Install a newer cache version and retire the current one
  Upgrade {
    /// Version to move to, e.g. 1.3.0
    to: String,
  },
  /// Send a request through the worker
  Fetch {
    /// Absolute URL, or a path relative to the dashboard origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Extra header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Fire a background sync
  Sync {
    /// Sync tag (default: the configured action sync tag)
    #[arg(long)]
    tag: Option<String>,
  },
  /// Deliver a push message
  Push {
    /// Notification body text
    payload: Option<String>,
  },
  /// Click the bot status notification
  Click {
    /// Action button, e.g. "open" or "dismiss"
    #[arg(long)]
    action: Option<String>,
  },
  /// Inspect or edit the offline action queue
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Show cache stores and queued actions
  Status,
}

impl Command {
  /// Whether the command needs the worker running behind the dispatcher
  pub fn needs_worker(&self) -> bool {
    !matches!(self, Command::Queue(_) | Command::Status)
  }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
  /// Record an action to send on the next sync
  Add {
    /// Label for the action, e.g. "bot-start"
    kind: String,
    /// Absolute URL, or a path relative to the backend origin
    url: String,
    #[arg(short = 'X', long, default_value = "POST")]
    method: String,
    /// JSON body
    #[arg(long)]
    payload: Option<String>,
  },
  /// List queued actions, oldest first
  List {
    #[arg(long)]
    json: bool,
  },
  /// Drop every queued action
  Clear,
}

/// Resolve `input` as an absolute URL, falling back to a path under `base`.
pub fn resolve_url(base: &Url, input: &str) -> Result<Url> {
  match Url::parse(input) {
    Ok(url) => Ok(url),
    Err(ParseError::RelativeUrlWithoutBase) => base
      .join(input)
      .map_err(|e| eyre!("Invalid URL '{}': {}", input, e)),
    Err(e) => Err(eyre!("Invalid URL '{}': {}", input, e)),
  }
}

pub fn parse_method(input: &str) -> Result<Method> {
  Method::from_bytes(input.to_uppercase().as_bytes())
    .map_err(|_| eyre!("Invalid HTTP method '{}'", input))
}

/// Parse a "Name: value" header
pub fn parse_header(input: &str) -> Result<(String, String)> {
  let (name, value) = input
    .split_once(':')
    .ok_or_else(|| eyre!("Invalid header '{}', expected \"Name: value\"", input))?;

  let name = name.trim();
  if name.is_empty() {
    return Err(eyre!("Invalid header '{}': empty name", input));
  }

  Ok((name.to_string(), value.trim().to_string()))
}
