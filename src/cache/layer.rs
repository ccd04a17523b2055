//! Cache layer that applies the caching strategies around network fetches.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::net::{FetchError, Request, Response, ResponseType};

use super::storage::{CacheStorage, CachedResponse};
use super::traits::CacheResult;

/// Cache layer bound to one versioned cache store.
///
/// This layer sits between the worker and the network client. Cache write
/// failures are logged and swallowed: the caller's response never depends on
/// them.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  store_name: String,
}

impl CacheLayer {
  /// Create a new cache layer writing into `store_name`.
  pub fn new(storage: Arc<dyn CacheStorage>, store_name: impl Into<String>) -> Self {
    Self {
      storage,
      store_name: store_name.into(),
    }
  }

  pub fn store_name(&self) -> &str {
    &self.store_name
  }

  pub fn storage(&self) -> &Arc<dyn CacheStorage> {
    &self.storage
  }

  /// Fetch every request and commit all responses at once.
  ///
  /// Any failed fetch or non-2xx status aborts before anything is written,
  /// so the store either holds the whole manifest or does not exist.
  pub async fn precache<F, Fut>(&self, requests: Vec<Request>, fetcher: F) -> Result<usize>
  where
    F: Fn(Request) -> Fut,
    Fut: Future<Output = Result<Response, FetchError>>,
  {
    let fetcher = &fetcher;
    let entries = futures::future::try_join_all(requests.into_iter().map(|request| async move {
      let response = fetcher(request.clone())
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;

      if !response.is_ok() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          request.url,
          response.status
        ));
      }

      Ok::<_, color_eyre::Report>((request, response))
    }))
    .await?;

    self.storage.put_all(&self.store_name, &entries)?;

    Ok(entries.len())
  }

  /// Fetch with network-first strategy.
  ///
  /// 1. Fetch from network
  /// 2. On a GET answered with 200, store a copy
  /// 3. Return the live response whatever happened to the copy
  /// 4. On network failure, serve the cached copy or propagate the failure
  pub async fn network_first<F, Fut>(
    &self,
    request: &Request,
    fetcher: F,
  ) -> Result<CacheResult<Response>, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response, FetchError>>,
  {
    match fetcher().await {
      Ok(response) => {
        if request.is_get() && response.status == 200 {
          self.store(request, &response);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        if !request.is_get() {
          return Err(err);
        }

        match self.lookup(request) {
          Some(cached) => {
            debug!(url = %request.url, error = %err, "Network failed, serving cached response");
            Ok(CacheResult::offline(cached.response, cached.cached_at))
          }
          None => Err(err),
        }
      }
    }
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Check cache - on a hit, return without touching the network
  /// 2. On a miss, fetch from network
  /// 3. Store a copy only of same-origin 200 responses
  pub async fn cache_first<F, Fut>(
    &self,
    request: &Request,
    fetcher: F,
  ) -> Result<CacheResult<Response>, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response, FetchError>>,
  {
    if request.is_get() {
      if let Some(cached) = self.lookup(request) {
        debug!(url = %request.url, "Cache hit");
        return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
      }
    }

    let response = fetcher().await?;

    if request.is_get() && response.status == 200 && response.response_type == ResponseType::Basic
    {
      self.store(request, &response);
    }

    Ok(CacheResult::from_network(response))
  }

  /// Store a copy of the response; errors are logged, never returned.
  /// A store pruned by a newer version is left deleted.
  fn store(&self, request: &Request, response: &Response) {
    let copy = response.clone();
    match self.storage.put(&self.store_name, request, &copy) {
      Ok(true) => {}
      Ok(false) => {
        debug!(store = %self.store_name, url = %request.url, "Store no longer exists, not caching")
      }
      Err(e) => warn!(url = %request.url, error = %e, "Failed to write cache entry"),
    }
  }

  /// Look up a request; storage errors count as a miss.
  fn lookup(&self, request: &Request) -> Option<CachedResponse> {
    match self.storage.match_request(&self.store_name, request) {
      Ok(found) => found,
      Err(e) => {
        warn!(url = %request.url, error = %e, "Failed to read cache entry");
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::db::Database;
  use crate::net::testing::StubNetwork;
  use crate::net::Fetcher;
  use reqwest::Method;
  use url::Url;

  const STORE: &str = "twitter-bot-v1.2.0";

  /// Layer over an installed, empty store
  fn layer() -> CacheLayer {
    let layer = empty_layer();
    layer.storage().put_all(STORE, &[]).unwrap();
    layer
  }

  /// Layer whose store was never installed
  fn empty_layer() -> CacheLayer {
    let storage = SqliteStorage::new(Database::open_in_memory().unwrap());
    CacheLayer::new(Arc::new(storage), STORE)
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  /// Storage whose writes always fail, to prove writes are best effort
  struct ReadOnlyStorage;

  impl CacheStorage for ReadOnlyStorage {
    fn has_store(&self, _name: &str) -> Result<bool> {
      Ok(false)
    }
    fn store_names(&self) -> Result<Vec<String>> {
      Ok(Vec::new())
    }
    fn delete_store(&self, _name: &str) -> Result<bool> {
      Ok(false)
    }
    fn match_request(&self, _store: &str, _request: &Request) -> Result<Option<CachedResponse>> {
      Err(eyre!("store unavailable"))
    }
    fn put(&self, _store: &str, _request: &Request, _response: &Response) -> Result<bool> {
      Err(eyre!("quota exceeded"))
    }
    fn put_all(&self, _store: &str, _entries: &[(Request, Response)]) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }
    fn entry_count(&self, _store: &str) -> Result<usize> {
      Ok(0)
    }
  }

  #[tokio::test]
  async fn test_network_first_stores_successful_get() {
    let layer = layer();
    let network = StubNetwork::new();
    let url = "https://bot.example.com/api/comments";
    network.respond(url, 200, "[\"nice post\"]");
    let request = get(url);

    let result = layer
      .network_first(&request, || network.fetch(&request))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    let cached = layer.lookup(&request).unwrap();
    assert_eq!(cached.response.text(), "[\"nice post\"]");
  }

  #[tokio::test]
  async fn test_network_first_skips_non_200() {
    let layer = layer();
    let network = StubNetwork::new();
    let url = "https://bot.example.com/api/logs";
    network.respond(url, 503, "busy");
    let request = get(url);

    let result = layer
      .network_first(&request, || network.fetch(&request))
      .await
      .unwrap();

    assert_eq!(result.data.status, 503);
    assert!(layer.lookup(&request).is_none());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_when_offline() {
    let layer = layer();
    let network = StubNetwork::new();
    let url = "https://bot.example.com/api/settings";
    network.respond(url, 200, "{\"daily_limit\":50}");
    let request = get(url);

    layer
      .network_first(&request, || network.fetch(&request))
      .await
      .unwrap();

    network.set_offline(true);
    let result = layer
      .network_first(&request, || network.fetch(&request))
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.text(), "{\"daily_limit\":50}");
    assert!(result.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_network_first_propagates_failure_on_miss() {
    let layer = layer();
    let network = StubNetwork::new();
    network.set_offline(true);
    let request = get("https://bot.example.com/api/target-accounts");

    let err = layer
      .network_first(&request, || network.fetch(&request))
      .await
      .unwrap_err();

    assert!(matches!(err, FetchError::Network(_)));
  }

  #[tokio::test]
  async fn test_network_first_write_failure_still_returns_response() {
    let layer = CacheLayer::new(Arc::new(ReadOnlyStorage), STORE);
    let network = StubNetwork::new();
    let url = "https://bot.example.com/api/health";
    network.respond(url, 200, "{\"status\":\"ok\"}");
    let request = get(url);

    let result = layer
      .network_first(&request, || network.fetch(&request))
      .await
      .unwrap();

    assert_eq!(result.data.text(), "{\"status\":\"ok\"}");
  }

  #[tokio::test]
  async fn test_network_first_never_consults_cache_for_post() {
    let layer = layer();
    let network = StubNetwork::new();
    let url = "https://bot.example.com/api/bot/start";
    let request = Request::new(Method::POST, Url::parse(url).unwrap());
    // Even a GET-shaped entry under the same URL must not be served for a POST
    layer
      .storage()
      .put(STORE, &get(url), &Response::new(Url::parse(url).unwrap(), 200, "stale"))
      .unwrap();

    network.set_offline(true);
    let err = layer
      .network_first(&request, || network.fetch(&request))
      .await;

    assert!(err.is_err());
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let layer = layer();
    let network = StubNetwork::new();
    let url = "http://localhost:3000/app-icon.png";
    network.respond(url, 200, "png");
    let request = get(url);

    let first = layer
      .cache_first(&request, || network.fetch(&request))
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(network.calls(), 1);

    let second = layer
      .cache_first(&request, || network.fetch(&request))
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data.text(), "png");
    assert_eq!(network.calls(), 1);
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_cross_origin() {
    let layer = layer();
    let network = StubNetwork::new();
    let url = "https://cdn.example.net/font.woff2";
    let response =
      Response::new(Url::parse(url).unwrap(), 200, "font").with_type(ResponseType::Cors);
    network.route(Method::GET, url, response);
    let request = get(url);

    layer
      .cache_first(&request, || network.fetch(&request))
      .await
      .unwrap();

    assert!(layer.lookup(&request).is_none());
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_errors() {
    let layer = layer();
    let network = StubNetwork::new();
    let request = get("http://localhost:3000/missing.css");

    let result = layer
      .cache_first(&request, || network.fetch(&request))
      .await
      .unwrap();

    assert_eq!(result.data.status, 404);
    assert!(layer.lookup(&request).is_none());
  }

  #[tokio::test]
  async fn test_cache_first_read_failure_goes_to_network() {
    let layer = CacheLayer::new(Arc::new(ReadOnlyStorage), STORE);
    let network = StubNetwork::new();
    let url = "http://localhost:3000/static/css/main.css";
    network.respond(url, 200, "body{}");
    let request = get(url);

    let result = layer
      .cache_first(&request, || network.fetch(&request))
      .await
      .unwrap();

    assert_eq!(result.data.text(), "body{}");
    assert_eq!(network.calls(), 1);
  }

  #[tokio::test]
  async fn test_precache_commits_all_assets() {
    let layer = empty_layer();
    let network = StubNetwork::new();
    network.respond("http://localhost:3000/", 200, "<html>");
    network.respond("http://localhost:3000/bundle.js", 200, "js");

    let count = layer
      .precache(
        vec![
          get("http://localhost:3000/"),
          get("http://localhost:3000/bundle.js"),
        ],
        |request| {
          let network = &network;
          async move { network.fetch(&request).await }
        },
      )
      .await
      .unwrap();

    assert_eq!(count, 2);
    assert_eq!(layer.storage().entry_count(STORE).unwrap(), 2);
  }

  #[tokio::test]
  async fn test_precache_is_all_or_nothing() {
    let layer = empty_layer();
    let network = StubNetwork::new();
    network.respond("http://localhost:3000/", 200, "<html>");
    network.fail("http://localhost:3000/bundle.js");

    let result = layer
      .precache(
        vec![
          get("http://localhost:3000/"),
          get("http://localhost:3000/bundle.js"),
        ],
        |request| {
          let network = &network;
          async move { network.fetch(&request).await }
        },
      )
      .await;

    assert!(result.is_err());
    assert!(!layer.storage().has_store(STORE).unwrap());
    assert!(layer.lookup(&get("http://localhost:3000/")).is_none());
  }

  #[tokio::test]
  async fn test_precache_rejects_error_status() {
    let layer = empty_layer();
    let network = StubNetwork::new();
    network.respond("http://localhost:3000/", 200, "<html>");

    let result = layer
      .precache(
        vec![
          get("http://localhost:3000/"),
          get("http://localhost:3000/manifest.json"),
        ],
        |request| {
          let network = &network;
          async move { network.fetch(&request).await }
        },
      )
      .await;

    assert!(result.is_err());
    assert!(!layer.storage().has_store(STORE).unwrap());
  }
}
