use url::{Origin, Url};

/// Which caching strategy a request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Backend API call: network first, cache fallback
  Api,
  /// Everything else: cache first, network fallback
  Static,
}

/// Pure URL classifier. No state beyond the backend origin and prefix.
#[derive(Debug, Clone)]
pub struct Classifier {
  backend_origin: Origin,
  api_prefix: String,
}

impl Classifier {
  pub fn new(backend_url: &Url, api_prefix: &str) -> Self {
    Self {
      backend_origin: backend_url.origin(),
      api_prefix: api_prefix.to_string(),
    }
  }

  pub fn classify(&self, url: &Url) -> RequestClass {
    if url.origin() == self.backend_origin && url.path().starts_with(&self.api_prefix) {
      RequestClass::Api
    } else {
      RequestClass::Static
    }
  }
}
