//! Push notifications shown by the worker.

use color_eyre::Result;
use tracing::{debug, info};

use crate::config::NotificationConfig;

pub const ACTION_OPEN: &str = "open";
pub const ACTION_DISMISS: &str = "dismiss";

/// A button offered on a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds (on, off, on, ...)
  pub vibrate: Vec<u32>,
  /// Notifications with the same tag replace each other
  pub tag: String,
  /// Stays visible until the user interacts with it
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
}

impl Notification {
  /// Build the bot status notification for a push event.
  /// An absent or empty payload falls back to the configured default body.
  pub fn from_push(config: &NotificationConfig, payload: Option<&str>) -> Self {
    let body = payload
      .filter(|text| !text.is_empty())
      .unwrap_or(config.default_body.as_str())
      .to_string();

    Self {
      title: config.title.clone(),
      body,
      icon: config.icon.clone(),
      badge: config.icon.clone(),
      vibrate: vec![200, 100, 200],
      tag: config.tag.clone(),
      require_interaction: true,
      actions: vec![
        NotificationAction {
          action: ACTION_OPEN.to_string(),
          title: "Open dashboard".to_string(),
          icon: Some(config.icon.clone()),
        },
        NotificationAction {
          action: ACTION_DISMISS.to_string(),
          title: "Dismiss".to_string(),
          icon: None,
        },
      ],
    }
  }
}

/// Displays and closes notifications on behalf of the worker.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;

  fn close(&self, tag: &str) -> Result<()>;
}

/// Prints notifications to the terminal.
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(tag = %notification.tag, "Showing notification");

    let actions: Vec<String> = notification
      .actions
      .iter()
      .map(|a| format!("[{}] {}", a.action, a.title))
      .collect();

    println!("{}", notification.title);
    println!("  {}", notification.body);
    println!("  {}", actions.join("  "));
    Ok(())
  }

  fn close(&self, tag: &str) -> Result<()> {
    debug!(%tag, "Closing notification");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_push_without_payload_uses_default_body() {
    let config = NotificationConfig::default();
    let notification = Notification::from_push(&config, None);

    assert_eq!(notification.title, "Twitter Engagement Bot");
    assert_eq!(notification.body, "Twitter Bot Status Update");
    assert!(notification.require_interaction);
  }

  #[test]
  fn test_empty_payload_uses_default_body() {
    let config = NotificationConfig::default();
    let notification = Notification::from_push(&config, Some(""));

    assert_eq!(notification.body, config.default_body);
  }

  #[test]
  fn test_payload_becomes_body() {
    let config = NotificationConfig::default();
    let notification = Notification::from_push(&config, Some("Bot stopped: daily limit reached"));

    assert_eq!(notification.body, "Bot stopped: daily limit reached");
    assert_eq!(notification.tag, "twitter-bot-notification");
    assert_eq!(notification.vibrate, vec![200, 100, 200]);
  }

  #[test]
  fn test_offers_open_and_dismiss() {
    let notification = Notification::from_push(&NotificationConfig::default(), None);
    let actions: Vec<&str> = notification
      .actions
      .iter()
      .map(|a| a.action.as_str())
      .collect();

    assert_eq!(actions, vec![ACTION_OPEN, ACTION_DISMISS]);
  }
}
