//! Worker lifecycle states and the transitions allowed between them.

use color_eyre::{eyre::eyre, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Created, not installed yet
  Parsed,
  /// Precaching the asset manifest
  Installing,
  /// Installed, about to activate
  Waiting,
  /// Pruning stale stores and claiming clients
  Activating,
  /// Handling fetch events
  Active,
  /// A newer version took over
  Superseded,
  Terminated,
}

impl WorkerState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Activating => "activating",
      Self::Active => "active",
      Self::Superseded => "superseded",
      Self::Terminated => "terminated",
    }
  }

  pub fn can_transition_to(self, next: WorkerState) -> bool {
    use WorkerState::*;

    matches!(
      (self, next),
      (Parsed, Installing)
        // resumed on top of a store installed by an earlier run
        | (Parsed, Activating)
        | (Installing, Waiting)
        | (Installing, Terminated)
        | (Waiting, Activating)
        | (Activating, Active)
        | (Activating, Terminated)
        | (Active, Superseded)
        | (Superseded, Terminated)
    )
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Current state plus the path taken to get there.
#[derive(Debug)]
pub struct Lifecycle {
  state: WorkerState,
  history: Vec<WorkerState>,
}

impl Lifecycle {
  pub fn new() -> Self {
    Self {
      state: WorkerState::Parsed,
      history: vec![WorkerState::Parsed],
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn history(&self) -> &[WorkerState] {
    &self.history
  }

  /// Move to `next`, returning the previous state.
  pub fn transition(&mut self, next: WorkerState) -> Result<WorkerState> {
    if !self.state.can_transition_to(next) {
      return Err(eyre!(
        "Invalid worker state transition: {} -> {}",
        self.state,
        next
      ));
    }

    let previous = self.state;
    self.state = next;
    self.history.push(next);
    Ok(previous)
  }
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new()
  }
}
