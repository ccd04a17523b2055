//! In-process network double for tests.

use async_trait::async_trait;
use reqwest::Method;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use super::{FetchError, Fetcher, Request, Response};

/// Route table with an offline switch and a call counter.
/// Unrouted URLs answer 404.
#[derive(Default)]
pub struct StubNetwork {
  routes: Mutex<HashMap<(Method, String), Response>>,
  failing: Mutex<HashSet<String>>,
  offline: AtomicBool,
  calls: AtomicUsize,
  requests: Mutex<Vec<Request>>,
}

impl StubNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, method: Method, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert((method, url.to_string()), response);
  }

  /// Route a GET to a same-origin response.
  pub fn respond(&self, url: &str, status: u16, body: &str) {
    let response = Response::new(Url::parse(url).unwrap(), status, body.to_string());
    self.route(Method::GET, url, response);
  }

  /// Make every fetch of `url` fail with a network error.
  pub fn fail(&self, url: &str) {
    self.failing.lock().unwrap().insert(url.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Fetcher for StubNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.requests.lock().unwrap().push(request.clone());

    let url = request.url.to_string();
    if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&url) {
      return Err(FetchError::Network(format!("connection refused: {}", url)));
    }

    let routed = self
      .routes
      .lock()
      .unwrap()
      .get(&(request.method.clone(), url))
      .cloned();

    Ok(routed.unwrap_or_else(|| Response::new(request.url.clone(), 404, "")))
  }
}
