use std::time::Duration;
use thiserror::Error;

/// Failure to obtain a response from the network.
#[derive(Error, Debug)]
pub enum FetchError {
  #[error("Network error: {0}")]
  Network(String),

  #[error("Request timed out after {0:?}")]
  Timeout(Duration),

  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_builder() {
      FetchError::InvalidRequest(e.to_string())
    } else {
      FetchError::Network(e.to_string())
    }
  }
}
