//! Core types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::net::Request;

/// Identity under which a request's response is stored.
///
/// Method plus absolute URL (fragment dropped). Header-sensitive matching is
/// layered on top by the storage through the stored response's `Vary` list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn for_request(request: &Request) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);

    Self {
      method: request.method.as_str().to_string(),
      url: url.to_string(),
    }
  }

  /// SHA256 hash for stable, fixed-length keys
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a cache hit.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live network response
  Network,
  /// Cache hit, network never consulted
  Cache,
  /// Network failed, serving the cached copy
  Offline,
}

impl CacheSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  #[test]
  fn test_key_ignores_fragment() {
    let plain = Request::get(Url::parse("http://localhost:3000/app.js").unwrap());
    let anchored = Request::get(Url::parse("http://localhost:3000/app.js#top").unwrap());

    assert_eq!(
      RequestKey::for_request(&plain),
      RequestKey::for_request(&anchored)
    );
  }

  #[test]
  fn test_key_depends_on_method_and_query() {
    let url = Url::parse("http://localhost:3000/api/logs?limit=10").unwrap();
    let get = RequestKey::for_request(&Request::get(url.clone()));
    let post = RequestKey::for_request(&Request::new(Method::POST, url));
    let other = RequestKey::for_request(&Request::get(
      Url::parse("http://localhost:3000/api/logs?limit=20").unwrap(),
    ));

    assert_ne!(get.cache_hash(), post.cache_hash());
    assert_ne!(get.cache_hash(), other.cache_hash());
    assert_eq!(get.cache_hash().len(), 64);
  }
}
